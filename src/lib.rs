//! # preview-tagger
//!
//! Audio tagging for short track previews with a pretrained Audio
//! Spectrogram Transformer (AST) running on Candle.
//!
//! ## Features
//!
//! - Decoding of WAV, MP3, AAC, FLAC and OGG previews from memory
//! - Kaldi-compatible 128-bin log-mel filterbank at 16 kHz
//! - AudioSet AST checkpoints (`.pth` or `.safetensors`), 527 labels
//! - Top-K multi-label ranking with independent sigmoid probabilities
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use preview_tagger::{Tagger, TaggerConfig};
//!
//! let config = TaggerConfig::load("config.yaml")?;
//! let tagger = Tagger::new(&config)?;
//! let tags = tagger.tag_file("clip.mp3", 10)?;
//! print!("{tags}");
//! ```

// Require docs for public items
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod audio;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod labels;
pub mod models;
pub mod preview;
pub mod ranking;

// Re-exports for convenience
pub use config::TaggerConfig;
pub use error::{Result, Stage, TaggerError, TrackFailure};
pub use inference::{Tagger, TrackPrediction};
pub use labels::LabelCatalog;
pub use preview::{EmbedPageResolver, PreviewResolver, TrackPreview};
pub use ranking::{rank, Prediction, PredictionResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sample rate the classifier was trained at (16 kHz)
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Mel bins per feature frame
pub const MEL_BINS: usize = 128;
