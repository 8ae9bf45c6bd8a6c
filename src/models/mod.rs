//! Classifier model and its process-wide state
//!
//! - AST architecture (candle)
//! - Checkpoint reading and strict weight validation
//! - [`ModelState`]: loaded weights bound to the architecture, read-only after load

pub mod ast;
pub mod weights;

pub use ast::{select_device, AstClassifier, AstConfig};
pub use weights::{checkpoint_layout, load_checkpoint, random_checkpoint, WeightReport};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TaggerError};
use crate::features::FeatureMatrix;

/// Pretrained classifier bound to a device
///
/// Built once at startup and only read afterwards. Forward passes take
/// `&self`, so one instance can serve several threads.
pub struct ModelState {
    classifier: AstClassifier,
    device: Device,
}

impl ModelState {
    /// Load and validate a checkpoint file
    pub fn load<P: AsRef<Path>>(path: P, config: AstConfig, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;

        let tensors = load_checkpoint(path)?;
        let report = WeightReport::inspect(
            &path.display().to_string(),
            &tensors,
            &checkpoint_layout(&config),
        );
        report.log_summary();
        report.ensure_complete()?;

        Self::from_tensors(tensors, config, device)
    }

    /// Bind an in-memory checkpoint (already stripped of any `module.` prefix)
    pub fn from_tensors(
        mut tensors: HashMap<String, Tensor>,
        config: AstConfig,
        device: &Device,
    ) -> Result<Self> {
        tensors.retain(|name, _| !weights::is_optional(name));
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let classifier = AstClassifier::load(config, vb)?;

        let (tdim, fdim) = classifier.config().input_shape();
        info!(
            "Model ready: input {}x{}, {} patches, {} labels",
            tdim,
            fdim,
            classifier.config().num_patches(),
            classifier.config().label_dim
        );

        Ok(Self {
            classifier,
            device: device.clone(),
        })
    }

    /// Architecture contract
    pub fn config(&self) -> &AstConfig {
        self.classifier.config()
    }

    /// Expected feature shape `(time_frames, mel_bins)`
    pub fn input_shape(&self) -> (usize, usize) {
        self.config().input_shape()
    }

    /// Output width
    pub fn num_labels(&self) -> usize {
        self.config().label_dim
    }

    /// Device the weights live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Raw logits for one clip
    pub fn logits(&self, features: &FeatureMatrix) -> Result<Vec<f32>> {
        let batch = self.to_batch(features)?;
        let logits = self.classifier.forward(&batch)?;
        Ok(logits.squeeze(0)?.to_vec1::<f32>()?)
    }

    /// Independent per-label probabilities (element-wise sigmoid) for one clip
    pub fn probabilities(&self, features: &FeatureMatrix) -> Result<Vec<f32>> {
        let batch = self.to_batch(features)?;
        let logits = self.classifier.forward(&batch)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        Ok(probs.squeeze(0)?.to_vec1::<f32>()?)
    }

    /// `(1, tdim, fdim)` tensor on the model device
    fn to_batch(&self, features: &FeatureMatrix) -> Result<Tensor> {
        let expected = self.input_shape();
        if features.shape() != expected {
            return Err(TaggerError::ShapeMismatch {
                expected,
                actual: features.shape(),
            });
        }
        let (frames, bins) = expected;
        Ok(Tensor::from_slice(features.as_slice(), (1, frames, bins), &self.device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AstConfig {
        AstConfig {
            input_fdim: 32,
            input_tdim: 64,
            fstride: 16,
            tstride: 16,
            embed_dim: 8,
            depth: 1,
            num_heads: 2,
            label_dim: 6,
            ..AstConfig::default()
        }
    }

    fn random_state(config: &AstConfig) -> ModelState {
        let device = Device::Cpu;
        let tensors = random_checkpoint(config, &device).unwrap();
        ModelState::from_tensors(tensors, config.clone(), &device).unwrap()
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let config = small_config();
        let state = random_state(&config);

        for scale in [0.0f32, 1.0, 50.0, -50.0] {
            let data: Vec<f32> = (0..64 * 32).map(|i| scale * ((i % 7) as f32 - 3.0)).collect();
            let features = FeatureMatrix::new(data, 64, 32).unwrap();
            let probs = state.probabilities(&features).unwrap();
            assert_eq!(probs.len(), 6);
            assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)), "{probs:?}");
        }
    }

    #[test]
    fn test_probabilities_are_sigmoid_of_logits() {
        let config = small_config();
        let state = random_state(&config);
        let features = FeatureMatrix::new(vec![0.3; 64 * 32], 64, 32).unwrap();

        let logits = state.logits(&features).unwrap();
        let probs = state.probabilities(&features).unwrap();
        for (l, p) in logits.iter().zip(&probs) {
            let expected = 1.0 / (1.0 + (-l).exp());
            assert!((expected - p).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_wrong_feature_shape() {
        let config = small_config();
        let state = random_state(&config);
        let features = FeatureMatrix::new(vec![0.0; 10 * 32], 10, 32).unwrap();
        assert!(matches!(
            state.probabilities(&features),
            Err(TaggerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_tensors_rejects_wrong_shape() {
        let config = small_config();
        let device = Device::Cpu;
        let mut tensors = random_checkpoint(&config, &device).unwrap();
        tensors.insert(
            "v.pos_embed".to_string(),
            Tensor::zeros((1, 3, 8), DType::F32, &device).unwrap(),
        );
        assert!(matches!(
            ModelState::from_tensors(tensors, config, &device),
            Err(TaggerError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_load_rejects_mismatched_checkpoint() {
        let config = small_config();
        let device = Device::Cpu;
        let mut other = config.clone();
        other.label_dim = 9;
        let tensors = random_checkpoint(&other, &device).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let result = ModelState::load(&path, config, &device);
        assert!(matches!(result, Err(TaggerError::ModelLoad(_))));
    }
}
