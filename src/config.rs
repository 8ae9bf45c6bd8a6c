//! Runtime configuration loaded from YAML
//!
//! Every field has a default that matches the AudioSet-pretrained AST
//! checkpoint, so an empty (or missing) file is a valid configuration.
//!
//! ```yaml
//! model:
//!   weights: pretrained_models/audioset_10_10_0.4593.pth
//!   labels: data/class_labels_indices.csv
//! features:
//!   oversize: keep_head
//!   mixdown: average
//! inference:
//!   top_k: 10
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::MixdownPolicy;
use crate::error::{Result, TaggerError};
use crate::features::OversizePolicy;

/// Model artifact locations and architecture overrides
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Pretrained weights (`.safetensors` or `.pth`)
    pub weights: PathBuf,
    /// Label reference file (index -> display name)
    pub labels: PathBuf,
    /// Frequency patch stride; taken from the weights file name when unset
    pub fstride: Option<usize>,
    /// Time patch stride; taken from the weights file name when unset
    pub tstride: Option<usize>,
    /// Number of time frames the model accepts
    pub input_tdim: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("pretrained_models/audioset_10_10_0.4593.pth"),
            labels: PathBuf::from("data/class_labels_indices.csv"),
            fstride: None,
            tstride: None,
            input_tdim: 1024,
        }
    }
}

/// Frontend policies
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureSection {
    /// How to fold multi-channel audio into mono
    pub mixdown: MixdownPolicy,
    /// Which frames to keep when a clip is longer than `input_tdim`
    pub oversize: OversizePolicy,
    /// Raw log-fbank value used to pad short clips
    pub pad_value: f32,
}

impl Default for FeatureSection {
    fn default() -> Self {
        Self {
            mixdown: MixdownPolicy::Average,
            oversize: OversizePolicy::KeepHead,
            pad_value: 0.0,
        }
    }
}

/// Inference options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    /// Number of tags reported per track
    pub top_k: usize,
    /// Run on CUDA when available
    pub use_gpu: bool,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            top_k: 10,
            use_gpu: false,
        }
    }
}

/// Preview resolver options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    /// Embed page prefix; the track id is appended
    pub embed_prefix: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after a transient failure
    pub retries: u32,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            embed_prefix: "https://open.spotify.com/embed/track/".to_string(),
            timeout_secs: 15,
            retries: 1,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// Weights, labels and architecture overrides
    pub model: ModelSection,
    /// Frontend policies
    pub features: FeatureSection,
    /// Top-K and device choice
    pub inference: InferenceSection,
    /// Preview resolver settings
    pub preview: PreviewSection,
}

impl TaggerConfig {
    /// Load configuration from a YAML file
    ///
    /// Relative artifact paths are resolved against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TaggerError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_yaml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| TaggerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.model.input_tdim == 0 {
            return Err(TaggerError::Config("model.input_tdim must be positive".into()));
        }
        if matches!(self.model.fstride, Some(0)) || matches!(self.model.tstride, Some(0)) {
            return Err(TaggerError::Config("patch strides must be positive".into()));
        }
        if self.inference.top_k == 0 {
            return Err(TaggerError::Config("inference.top_k must be positive".into()));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.model.weights.is_relative() {
            self.model.weights = base.join(&self.model.weights);
        }
        if self.model.labels.is_relative() {
            self.model.labels = base.join(&self.model.labels);
        }
    }

    /// Patch strides: explicit config values, else parsed from the weights
    /// file name, else the AudioSet default of 10
    pub fn strides(&self) -> (usize, usize) {
        let parsed = strides_from_checkpoint_name(&self.model.weights);
        let fstride = self.model.fstride.or(parsed.map(|(f, _)| f)).unwrap_or(10);
        let tstride = self.model.tstride.or(parsed.map(|(_, t)| t)).unwrap_or(10);
        (fstride, tstride)
    }
}

/// Parse `(fstride, tstride)` from names like `audioset_10_10_0.4593.pth`
pub fn strides_from_checkpoint_name(path: &Path) -> Option<(usize, usize)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('_').skip(1);
    let fstride = parts.next()?.parse().ok()?;
    let tstride = parts.next()?.split('.').next()?.parse().ok()?;
    Some((fstride, tstride))
}
