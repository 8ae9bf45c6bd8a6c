//! Scripted local HTTP server for resolver tests

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::PreviewSection;

/// Serves one scripted response per connection, in order
///
/// Requests past the end of the script get a 410 and are still counted.
pub(crate) struct ScriptedServer {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
}

impl ScriptedServer {
    pub fn start(script: Vec<(u16, Vec<u8>)>) -> Self {
        Self::start_with(|_| script)
    }

    /// Like `start`, with a script that can embed the server's own base URL
    pub fn start_with<F>(script: F) -> Self
    where
        F: FnOnce(&str) -> Vec<(u16, Vec<u8>)>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let script = script(&base_url);
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let n = counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let (status, body) = script.get(n).cloned().unwrap_or((410, Vec::new()));
                let head = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });

        Self { base_url, requests }
    }

    /// Connections served so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Resolver settings pointing the embed prefix at this server
    pub fn preview_section(&self) -> PreviewSection {
        PreviewSection {
            embed_prefix: format!("{}/embed/track/", self.base_url),
            timeout_secs: 5,
            retries: 1,
        }
    }
}

/// Embed page HTML wrapping the given track entity JSON
pub(crate) fn embed_page(entity: &str) -> Vec<u8> {
    format!(
        "<html><head><script src=\"/x.js\"></script></head><body>\
         <script id=\"__NEXT_DATA__\" type=\"application/json\">\
         {{\"props\":{{\"pageProps\":{{\"state\":{{\"data\":{{\"entity\":{entity}}}}}}}}}}}\
         </script></body></html>"
    )
    .into_bytes()
}
