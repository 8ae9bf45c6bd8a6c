//! Acoustic feature frontend
//!
//! - Kaldi-compatible log mel filterbank (128 bins, 25 ms / 10 ms framing)
//! - Fixed-length windowing to the model's time dimension
//! - Dataset normalization used when the classifier was trained

mod fbank;
mod window;

pub use fbank::{FbankExtractor, FbankNormalizer};
pub use window::{FeatureWindower, OversizePolicy};

use crate::error::{Result, TaggerError};

/// Row-major `(time_frames, mel_bins)` feature grid
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    frames: usize,
    bins: usize,
}

impl FeatureMatrix {
    /// Build from row-major data
    pub fn new(data: Vec<f32>, frames: usize, bins: usize) -> Result<Self> {
        if frames == 0 || bins == 0 {
            return Err(TaggerError::ShapeMismatch {
                expected: (frames.max(1), bins.max(1)),
                actual: (frames, bins),
            });
        }
        if data.len() != frames * bins {
            return Err(TaggerError::ShapeMismatch {
                expected: (frames, bins),
                actual: (data.len() / bins, bins),
            });
        }
        Ok(Self { data, frames, bins })
    }

    /// Number of time frames
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of mel bins
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// `(frames, bins)`
    pub fn shape(&self) -> (usize, usize) {
        (self.frames, self.bins)
    }

    /// One time frame
    pub fn frame(&self, t: usize) -> &[f32] {
        &self.data[t * self.bins..(t + 1) * self.bins]
    }

    /// Flat row-major view
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Take the row-major data
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// True when no element is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_matrix_shape() {
        let m = FeatureMatrix::new(vec![0.0; 12], 3, 4).unwrap();
        assert_eq!(m.shape(), (3, 4));
        assert_eq!(m.frame(2).len(), 4);
    }

    #[test]
    fn test_feature_matrix_rejects_bad_len() {
        assert!(FeatureMatrix::new(vec![0.0; 11], 3, 4).is_err());
        assert!(FeatureMatrix::new(vec![], 0, 4).is_err());
    }
}
