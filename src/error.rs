//! Error types for the tagging pipeline
//!
//! Every stage fails fast with a typed [`TaggerError`]. [`TaggerError::stage`]
//! tells which pipeline stage produced it so per-track reports can name it.

use std::fmt;
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum TaggerError {
    /// Audio bytes could not be parsed or decoded
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// A sample rate of zero was supplied to the resampler
    #[error("invalid sample rate conversion: {from} Hz -> {to} Hz")]
    InvalidSampleRate {
        /// Source rate
        from: u32,
        /// Target rate
        to: u32,
    },

    /// The resampler itself failed
    #[error("resampling failed: {0}")]
    Resample(String),

    /// Clip shorter than a single analysis window
    #[error("audio too short: {samples} samples, need at least {window}")]
    InsufficientAudio {
        /// Samples available at 16 kHz
        samples: usize,
        /// Samples in one analysis window
        window: usize,
    },

    /// Feature extraction met or produced NaN or infinite values
    #[error("invalid features: {0}")]
    InvalidFeatures(String),

    /// Weight file unreadable or incompatible with the architecture
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Feature batch does not match the model input contract
    #[error("feature shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// `(frames, bins)` the model accepts
        expected: (usize, usize),
        /// `(frames, bins)` supplied
        actual: (usize, usize),
    },

    /// Tensor operation failed during the forward pass
    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),

    /// Label reference file could not be parsed
    #[error("invalid label catalog: {0}")]
    Labels(String),

    /// Probability vector and label catalog disagree on width
    #[error("label count mismatch: {labels} labels for {scores} scores")]
    LabelMismatch {
        /// Catalog size
        labels: usize,
        /// Probability vector length
        scores: usize,
    },

    /// Requested top-k outside `1..=labels`
    #[error("top-k must be between 1 and {labels}, got {k}")]
    InvalidTopK {
        /// Requested count
        k: usize,
        /// Catalog size
        labels: usize,
    },

    /// The resolver returned a track without preview audio
    #[error("no preview audio available for track {0}")]
    PreviewUnavailable(String),

    /// Network or page-parsing failure while resolving a preview
    #[error("preview fetch failed: {0}")]
    Fetch(String),

    /// Configuration file unreadable or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TaggerError>;

/// Pipeline stage, used when reporting per-track failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Loading configuration, labels or weights
    Setup,
    /// Looking up the track and downloading its preview
    Resolve,
    /// Container and codec decoding
    Decode,
    /// Conversion to the model sample rate
    Resample,
    /// Fbank extraction, windowing and normalization
    Features,
    /// Forward pass
    Inference,
    /// Top-K selection
    Ranking,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Resolve => "preview",
            Stage::Decode => "decode",
            Stage::Resample => "resample",
            Stage::Features => "features",
            Stage::Inference => "inference",
            Stage::Ranking => "ranking",
        };
        f.write_str(name)
    }
}

impl TaggerError {
    /// Stage that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            TaggerError::Decode(_) => Stage::Decode,
            TaggerError::InvalidSampleRate { .. } | TaggerError::Resample(_) => Stage::Resample,
            TaggerError::InsufficientAudio { .. } | TaggerError::InvalidFeatures(_) => {
                Stage::Features
            }
            TaggerError::ShapeMismatch { .. } | TaggerError::Inference(_) => Stage::Inference,
            TaggerError::LabelMismatch { .. } | TaggerError::InvalidTopK { .. } => Stage::Ranking,
            TaggerError::PreviewUnavailable(_) | TaggerError::Fetch(_) => Stage::Resolve,
            TaggerError::ModelLoad(_)
            | TaggerError::Labels(_)
            | TaggerError::Config(_)
            | TaggerError::Io(_) => Stage::Setup,
        }
    }
}

/// A failure tied to one track of a multi-track run
#[derive(Debug, Error)]
#[error("track {track_id}: {stage} stage failed: {error}")]
pub struct TrackFailure {
    /// Track that failed
    pub track_id: String,
    /// Stage that produced `error`
    pub stage: Stage,
    /// Underlying error
    #[source]
    pub error: TaggerError,
}

impl TrackFailure {
    /// Wrap an error for the given track, taking the stage from the error
    pub fn new(track_id: impl Into<String>, error: TaggerError) -> Self {
        Self {
            track_id: track_id.into(),
            stage: error.stage(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(TaggerError::Decode("x".into()).stage(), Stage::Decode);
        assert_eq!(
            TaggerError::InsufficientAudio { samples: 10, window: 400 }.stage(),
            Stage::Features
        );
        assert_eq!(
            TaggerError::PreviewUnavailable("abc".into()).stage(),
            Stage::Resolve
        );
        assert_eq!(TaggerError::InvalidTopK { k: 0, labels: 3 }.stage(), Stage::Ranking);
    }

    #[test]
    fn test_track_failure_message() {
        let failure = TrackFailure::new("3DK6m7It6Pw857FcQftMds", TaggerError::Decode("bad header".into()));
        let msg = failure.to_string();
        assert!(msg.contains("3DK6m7It6Pw857FcQftMds"));
        assert!(msg.contains("decode"));
        assert!(msg.contains("bad header"));
    }
}
