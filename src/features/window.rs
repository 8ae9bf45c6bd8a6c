//! Fixed-length windowing of feature matrices

use serde::Deserialize;
use tracing::debug;

use super::FeatureMatrix;
use crate::error::Result;

/// Which frames survive when a clip is longer than the model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Keep the first `target` frames
    #[default]
    KeepHead,
    /// Keep the middle `target` frames
    KeepCenter,
}

/// Pads or truncates features to exactly `target_frames` time frames
#[derive(Debug, Clone, Copy)]
pub struct FeatureWindower {
    /// Output length in frames
    pub target_frames: usize,
    /// Fill for frames past the end of a short clip
    pub pad_value: f32,
    /// Truncation policy for long clips
    pub oversize: OversizePolicy,
}

impl FeatureWindower {
    /// Windower producing `target_frames` frames
    pub fn new(target_frames: usize, pad_value: f32, oversize: OversizePolicy) -> Self {
        Self {
            target_frames,
            pad_value,
            oversize,
        }
    }

    /// Resize along the time axis; the output is always `(target_frames, bins)`
    pub fn apply(&self, features: FeatureMatrix) -> Result<FeatureMatrix> {
        let (frames, bins) = features.shape();
        let target = self.target_frames;

        if frames == target {
            return Ok(features);
        }

        let data = if frames < target {
            debug!("Padding {} frames to {}", frames, target);
            let mut data = features.into_vec();
            data.resize(target * bins, self.pad_value);
            data
        } else {
            let start = match self.oversize {
                OversizePolicy::KeepHead => 0,
                OversizePolicy::KeepCenter => (frames - target) / 2,
            };
            debug!("Truncating {} frames to {} starting at {}", frames, target, start);
            features.as_slice()[start * bins..(start + target) * bins].to_vec()
        };

        FeatureMatrix::new(data, target, bins)
    }
}
