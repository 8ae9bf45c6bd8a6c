//! Preview resolution through the public track embed page
//!
//! The embed page carries a `<script>` with the page state as JSON. The
//! fields used live under `props.pageProps.state.data.entity`:
//! `name`, `artists[0].name` and `audioPreview.url`.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PreviewResolver, TrackPreview};
use crate::config::PreviewSection;
use crate::error::{Result, TaggerError};

const USER_AGENT: &str = concat!("preview-tagger/", env!("CARGO_PKG_VERSION"));
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Track fields extracted from an embed page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedTrack {
    /// Track title
    pub name: String,
    /// Credited artists in display order
    #[serde(default)]
    pub artists: Vec<EmbedArtist>,
    /// Preview clip, absent for tracks without one
    #[serde(rename = "audioPreview", default)]
    pub audio_preview: Option<EmbedAudioPreview>,
}

/// One credited artist
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedArtist {
    /// Artist display name
    pub name: String,
}

/// Preview clip reference
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedAudioPreview {
    /// Clip location; may be missing or empty
    #[serde(default)]
    pub url: Option<String>,
}

impl EmbedTrack {
    /// First credited artist, empty when none is listed
    pub fn artist(&self) -> &str {
        self.artists.first().map(|a| a.name.as_str()).unwrap_or("")
    }

    /// Non-empty preview clip URL
    pub fn preview_url(&self) -> Option<&str> {
        self.audio_preview
            .as_ref()
            .and_then(|p| p.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// Extract the track entity from embed page HTML
pub fn parse_embed_page(html: &str) -> Result<EmbedTrack> {
    let mut last_error = None;

    for body in script_bodies(html).filter(|body| body.contains("props")) {
        let state: serde_json::Value = match serde_json::from_str(body.trim()) {
            Ok(value) => value,
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };
        let entity = state
            .pointer("/props/pageProps/state/data/entity")
            .cloned()
            .ok_or_else(|| TaggerError::Fetch("embed page state has no track entity".into()))?;
        return serde_json::from_value(entity)
            .map_err(|e| TaggerError::Fetch(format!("malformed track entity: {e}")));
    }

    Err(TaggerError::Fetch(match last_error {
        Some(e) => format!("embed page state is not valid JSON: {e}"),
        None => "embed page has no state script".into(),
    }))
}

/// Inner text of every `<script ...>...</script>` element
fn script_bodies(html: &str) -> impl Iterator<Item = &str> {
    let mut rest = html;
    std::iter::from_fn(move || {
        let open = rest.find("<script")?;
        let after_open = &rest[open..];
        let body_start = open + after_open.find('>')? + 1;
        let body_len = rest[body_start..].find("</script>")?;
        let body = &rest[body_start..body_start + body_len];
        rest = &rest[body_start + body_len + "</script>".len()..];
        Some(body)
    })
}

/// Resolves previews by scraping the embed page and downloading the clip
pub struct EmbedPageResolver {
    client: Client,
    embed_prefix: String,
    retries: u32,
}

impl EmbedPageResolver {
    /// Build the HTTP client with the configured timeout
    pub fn new(config: &PreviewSection) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TaggerError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            embed_prefix: config.embed_prefix.clone(),
            retries: config.retries,
        })
    }

    /// GET with retries on timeouts, connection errors and 5xx responses
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(url = %url, attempt, "GET");

            let outcome = self.client.get(url).send().and_then(|response| {
                let status = response.status();
                response.bytes().map(|body| (status, body))
            });

            let transient = match &outcome {
                Ok((status, _)) => status.is_server_error(),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if transient && attempt <= self.retries {
                warn!(url = %url, attempt, "Transient fetch failure, retrying");
                thread::sleep(RETRY_DELAY);
                continue;
            }

            let (status, body) = outcome.map_err(|e| TaggerError::Fetch(format!("{url}: {e}")))?;
            if status != StatusCode::OK {
                return Err(TaggerError::Fetch(format!("{url}: HTTP {status}")));
            }
            return Ok(body.to_vec());
        }
    }
}

impl PreviewResolver for EmbedPageResolver {
    fn resolve(&self, track_id: &str) -> Result<TrackPreview> {
        let page_url = format!("{}{}", self.embed_prefix, track_id);
        let page = self.get_bytes(&page_url)?;
        let track = parse_embed_page(&String::from_utf8_lossy(&page))?;

        info!(track_id = %track_id, name = %track.name, artist = %track.artist(), "Resolved track");

        let audio = match track.preview_url() {
            Some(url) => Some(self.get_bytes(url)?),
            None => {
                warn!(track_id = %track_id, "Track has no preview clip");
                None
            }
        };

        Ok(TrackPreview {
            display_name: track.name.clone(),
            artist_name: track.artist().to_string(),
            preview_url: track.preview_url().map(str::to_string),
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::testing::{embed_page, ScriptedServer};

    fn page(state: &str) -> String {
        format!(
            "<html><head><script src=\"/x.js\"></script></head><body>\
             <script id=\"__NEXT_DATA__\" type=\"application/json\">{state}</script>\
             </body></html>"
        )
    }

    #[test]
    fn test_parse_track_with_preview() {
        let state = r#"{"props":{"pageProps":{"state":{"data":{"entity":{
            "name":"Runaway","artists":[{"name":"Kanye West"},{"name":"Pusha T"}],
            "audioPreview":{"url":"https://p.scdn.co/mp3-preview/abc"}}}}}}}"#;
        let track = parse_embed_page(&page(state)).unwrap();
        assert_eq!(track.name, "Runaway");
        assert_eq!(track.artist(), "Kanye West");
        assert_eq!(track.preview_url(), Some("https://p.scdn.co/mp3-preview/abc"));
    }

    #[test]
    fn test_parse_track_without_preview() {
        let state = r#"{"props":{"pageProps":{"state":{"data":{"entity":{
            "name":"Quiet","artists":[{"name":"Nobody"}]}}}}}}"#;
        let track = parse_embed_page(&page(state)).unwrap();
        assert_eq!(track.preview_url(), None);

        let state = r#"{"props":{"pageProps":{"state":{"data":{"entity":{
            "name":"Quiet","artists":[],"audioPreview":{"url":""}}}}}}}"#;
        let track = parse_embed_page(&page(state)).unwrap();
        assert_eq!(track.preview_url(), None);
        assert_eq!(track.artist(), "");
    }

    #[test]
    fn test_missing_state_script() {
        let result = parse_embed_page("<html><script>var a = 1;</script></html>");
        assert!(matches!(result, Err(TaggerError::Fetch(_))));
    }

    #[test]
    fn test_missing_entity() {
        let result = parse_embed_page(&page(r#"{"props":{"pageProps":{}}}"#));
        assert!(matches!(result, Err(TaggerError::Fetch(_))));
    }

    #[test]
    fn test_script_bodies() {
        let html = "<script a=1>one</script><p></p><script>two</script>";
        let bodies: Vec<_> = script_bodies(html).collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[test]
    fn test_resolver_construction() {
        let resolver = EmbedPageResolver::new(&PreviewSection::default()).unwrap();
        assert_eq!(resolver.retries, 1);
    }

    #[test]
    fn test_retries_once_after_server_error() {
        let server = ScriptedServer::start(vec![
            (503, b"busy".to_vec()),
            (200, b"clip bytes".to_vec()),
        ]);
        let resolver = EmbedPageResolver::new(&server.preview_section()).unwrap();

        let body = resolver.get_bytes(&format!("{}/clip", server.base_url)).unwrap();
        assert_eq!(body, b"clip bytes");
        assert_eq!(server.requests(), 2);
    }

    #[test]
    fn test_gives_up_after_one_retry() {
        let server = ScriptedServer::start(vec![
            (503, Vec::new()),
            (502, Vec::new()),
            (200, b"too late".to_vec()),
        ]);
        let resolver = EmbedPageResolver::new(&server.preview_section()).unwrap();

        let result = resolver.get_bytes(&format!("{}/clip", server.base_url));
        assert!(matches!(result, Err(TaggerError::Fetch(msg)) if msg.contains("502")));
        assert_eq!(server.requests(), 2);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let server = ScriptedServer::start(vec![(404, b"not found".to_vec())]);
        let resolver = EmbedPageResolver::new(&server.preview_section()).unwrap();

        let result = resolver.resolve("missing");
        assert!(matches!(result, Err(TaggerError::Fetch(msg)) if msg.contains("404")));
        assert_eq!(server.requests(), 1);
    }

    #[test]
    fn test_resolve_downloads_preview() {
        let server = ScriptedServer::start_with(|base| {
            let entity = format!(
                r#"{{"name":"Runaway","artists":[{{"name":"Kanye West"}}],"audioPreview":{{"url":"{base}/mp3-preview/abc"}}}}"#
            );
            vec![(200, embed_page(&entity)), (200, b"RIFF-ish audio".to_vec())]
        });
        let resolver = EmbedPageResolver::new(&server.preview_section()).unwrap();

        let preview = resolver.resolve("3DK6m7It6Pw857FcQftMds").unwrap();
        assert_eq!(preview.display_name, "Runaway");
        assert_eq!(preview.artist_name, "Kanye West");
        assert_eq!(
            preview.preview_url,
            Some(format!("{}/mp3-preview/abc", server.base_url))
        );
        assert_eq!(preview.audio.as_deref(), Some(&b"RIFF-ish audio"[..]));
        assert_eq!(server.requests(), 2);
    }

    #[test]
    fn test_resolve_without_preview_skips_download() {
        let server = ScriptedServer::start(vec![(
            200,
            embed_page(r#"{"name":"Quiet","artists":[{"name":"Nobody"}]}"#),
        )]);
        let resolver = EmbedPageResolver::new(&server.preview_section()).unwrap();

        let preview = resolver.resolve("quiet").unwrap();
        assert_eq!(preview.audio, None);
        assert_eq!(preview.preview_url, None);
        assert_eq!(server.requests(), 1);
    }
}
