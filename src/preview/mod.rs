//! Track preview resolution
//!
//! A [`PreviewResolver`] turns a catalog track id into display metadata and
//! the encoded preview audio. The tagging core only ever sees the result, so
//! tests swap in an in-memory resolver.

mod embed;
#[cfg(test)]
pub(crate) mod testing;

pub use embed::{parse_embed_page, EmbedArtist, EmbedAudioPreview, EmbedPageResolver, EmbedTrack};

use crate::error::Result;

/// Metadata and audio for one track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPreview {
    /// Track title
    pub display_name: String,
    /// First credited artist
    pub artist_name: String,
    /// Where the preview clip was fetched from, if anywhere
    pub preview_url: Option<String>,
    /// Encoded preview audio; `None` when the track has no preview
    pub audio: Option<Vec<u8>>,
}

/// Source of track previews
pub trait PreviewResolver: Send + Sync {
    /// Look up one track
    ///
    /// A track that exists but has no preview is `Ok` with `audio: None`;
    /// network and parsing problems are errors.
    fn resolve(&self, track_id: &str) -> Result<TrackPreview>;
}
