//! Audio processing modules
//!
//! - Decoding of encoded preview bytes (WAV via hound, MP3/AAC/FLAC/OGG via symphonia)
//! - Channel mixdown to mono
//! - Sample rate conversion to the model rate (16 kHz)

mod decoder;
mod resampler;

pub use decoder::{downmix, ensure_finite, AudioClip, AudioDecoder, MixdownPolicy};
pub use resampler::Resampler;
