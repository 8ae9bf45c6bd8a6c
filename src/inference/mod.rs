//! Inference module for audio tagging
//!
//! This module provides the main entry point for tagging:
//! - Tagger: immutable pipeline context (decode through ranking)
//! - TrackPrediction: tags plus track metadata for one resolved track

mod pipeline;

pub use pipeline::{Tagger, TrackPrediction};
