//! Checkpoint loading and weight diagnostics
//!
//! Pretrained AST checkpoints come as PyTorch pickles saved from a
//! `DataParallel` wrapper, so every key carries a `module.` prefix. The
//! prefix is stripped before the keys are compared with the architecture
//! layout. Loading is strict: a missing tensor, a tensor with the wrong
//! shape, or an unknown tensor is a [`TaggerError::ModelLoad`]. The only
//! tolerated extras are the ImageNet heads of the DeiT backbone, which AST
//! never uses.

use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::ast::AstConfig;
use crate::error::{Result, TaggerError};

/// Key prefix added by `torch.nn.DataParallel`
const DATA_PARALLEL_PREFIX: &str = "module.";

/// Declared optional layers: present in checkpoints, unused by the forward pass
const OPTIONAL_PREFIXES: &[&str] = &["v.head.", "v.head_dist."];

/// Initialization used when generating a random checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Normal with standard deviation 0.02
    Normal,
    /// All ones (LayerNorm scales)
    Ones,
    /// All zeros (biases, LayerNorm shifts)
    Zeros,
}

/// One tensor the architecture expects
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    /// Checkpoint key without the `module.` prefix
    pub name: String,
    /// Expected dimensions
    pub shape: Vec<usize>,
    /// How `random_checkpoint` fills it
    pub init: Init,
}

impl TensorSpec {
    fn new(name: impl Into<String>, shape: &[usize], init: Init) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            init,
        }
    }
}

/// Every tensor an AST checkpoint must provide, with its exact shape
pub fn checkpoint_layout(config: &AstConfig) -> Vec<TensorSpec> {
    let dim = config.embed_dim;
    let hidden = config.mlp_hidden();
    let p = config.patch_size;

    let mut layout = vec![
        TensorSpec::new("v.cls_token", &[1, 1, dim], Init::Normal),
        TensorSpec::new("v.dist_token", &[1, 1, dim], Init::Normal),
        TensorSpec::new("v.pos_embed", &[1, config.num_patches() + 2, dim], Init::Normal),
        TensorSpec::new("v.patch_embed.proj.weight", &[dim, 1, p, p], Init::Normal),
        TensorSpec::new("v.patch_embed.proj.bias", &[dim], Init::Zeros),
    ];

    for i in 0..config.depth {
        let block = format!("v.blocks.{i}");
        let mut push_norm = |name: &str| {
            layout.push(TensorSpec::new(format!("{block}.{name}.weight"), &[dim], Init::Ones));
            layout.push(TensorSpec::new(format!("{block}.{name}.bias"), &[dim], Init::Zeros));
        };
        push_norm("norm1");
        push_norm("norm2");

        let mut push_linear = |name: &str, in_dim: usize, out_dim: usize| {
            layout.push(TensorSpec::new(
                format!("{block}.{name}.weight"),
                &[out_dim, in_dim],
                Init::Normal,
            ));
            layout.push(TensorSpec::new(format!("{block}.{name}.bias"), &[out_dim], Init::Zeros));
        };
        push_linear("attn.qkv", dim, dim * 3);
        push_linear("attn.proj", dim, dim);
        push_linear("mlp.fc1", dim, hidden);
        push_linear("mlp.fc2", hidden, dim);
    }

    layout.extend([
        TensorSpec::new("v.norm.weight", &[dim], Init::Ones),
        TensorSpec::new("v.norm.bias", &[dim], Init::Zeros),
        TensorSpec::new("mlp_head.0.weight", &[dim], Init::Ones),
        TensorSpec::new("mlp_head.0.bias", &[dim], Init::Zeros),
        TensorSpec::new("mlp_head.1.weight", &[config.label_dim, dim], Init::Normal),
        TensorSpec::new("mlp_head.1.bias", &[config.label_dim], Init::Zeros),
    ]);

    layout
}

/// True for tensors that may be present but are never used
pub fn is_optional(name: &str) -> bool {
    OPTIONAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Read a checkpoint into a name -> tensor map with the `module.` prefix removed
///
/// `.safetensors` files are read with the safetensors loader; `.pth`, `.pt`,
/// `.bin` and `.ckpt` files are read as PyTorch pickled state dicts.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TaggerError::ModelLoad(format!(
            "weights file not found: {}",
            path.display()
        )));
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let tensors: HashMap<String, Tensor> = match extension {
        "safetensors" => candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| TaggerError::ModelLoad(format!("{}: {e}", path.display())))?,
        "pth" | "pt" | "bin" | "ckpt" => candle_core::pickle::read_all(path)
            .map_err(|e| TaggerError::ModelLoad(format!("{}: {e}", path.display())))?
            .into_iter()
            .collect(),
        other => {
            return Err(TaggerError::ModelLoad(format!(
                "unsupported weights format '.{other}'"
            )))
        }
    };

    debug!("Read {} tensors from {}", tensors.len(), path.display());
    Ok(strip_data_parallel_prefix(tensors))
}

fn strip_data_parallel_prefix(tensors: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    tensors
        .into_iter()
        .map(|(name, tensor)| match name.strip_prefix(DATA_PARALLEL_PREFIX) {
            Some(stripped) => (stripped.to_string(), tensor),
            None => (name, tensor),
        })
        .collect()
}

/// Build a randomly initialized checkpoint with the full AST layout
pub fn random_checkpoint(config: &AstConfig, device: &Device) -> Result<HashMap<String, Tensor>> {
    checkpoint_layout(config)
        .into_iter()
        .map(|spec| -> Result<(String, Tensor)> {
            let tensor = match spec.init {
                Init::Normal => Tensor::randn(0.0f32, 0.02, spec.shape.as_slice(), device)?,
                Init::Ones => Tensor::ones(spec.shape.as_slice(), DType::F32, device)?,
                Init::Zeros => Tensor::zeros(spec.shape.as_slice(), DType::F32, device)?,
            };
            Ok((spec.name, tensor))
        })
        .collect()
}

/// What a checkpoint provides compared with what the architecture expects
#[derive(Debug, Clone, Default)]
pub struct WeightReport {
    /// Source file, for messages
    pub file_path: String,
    /// Number of tensors the architecture needs
    pub expected: usize,
    /// Required tensors present with the right shape
    pub found: usize,
    /// Required tensors absent from the file
    pub missing: Vec<String>,
    /// Required tensors present with another shape: (name, expected, actual)
    pub mismatched: Vec<(String, Vec<usize>, Vec<usize>)>,
    /// Tensors in the file the architecture does not know
    pub unexpected: Vec<String>,
    /// Declared optional tensors that were skipped
    pub optional: Vec<String>,
}

impl WeightReport {
    /// Compare checkpoint tensors against the expected layout
    pub fn inspect(file_path: &str, tensors: &HashMap<String, Tensor>, layout: &[TensorSpec]) -> Self {
        let mut report = WeightReport {
            file_path: file_path.to_string(),
            expected: layout.len(),
            ..Default::default()
        };

        for spec in layout {
            match tensors.get(&spec.name) {
                Some(tensor) if tensor.dims() == spec.shape.as_slice() => report.found += 1,
                Some(tensor) => report.mismatched.push((
                    spec.name.clone(),
                    spec.shape.clone(),
                    tensor.dims().to_vec(),
                )),
                None => report.missing.push(spec.name.clone()),
            }
        }

        let known: std::collections::HashSet<&str> =
            layout.iter().map(|spec| spec.name.as_str()).collect();
        for name in tensors.keys() {
            if known.contains(name.as_str()) {
                continue;
            }
            if is_optional(name) {
                report.optional.push(name.clone());
            } else {
                report.unexpected.push(name.clone());
            }
        }

        report.missing.sort();
        report.mismatched.sort();
        report.unexpected.sort();
        report.optional.sort();
        report
    }

    /// Ratio of usable required tensors
    pub fn success_rate(&self) -> f32 {
        if self.expected == 0 {
            return 1.0;
        }
        self.found as f32 / self.expected as f32
    }

    /// True when every required tensor is present with the right shape and
    /// nothing unknown is left over
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.unexpected.is_empty()
    }

    /// Log the outcome
    pub fn log_summary(&self) {
        info!(
            "Weights {}: {}/{} required tensors ({:.0}%), {} optional skipped",
            self.file_path,
            self.found,
            self.expected,
            self.success_rate() * 100.0,
            self.optional.len()
        );
        for name in self.missing.iter().take(10) {
            warn!("  missing: {}", name);
        }
        for (name, expected, actual) in self.mismatched.iter().take(10) {
            warn!("  shape mismatch: {} expected {:?}, found {:?}", name, expected, actual);
        }
        for name in self.unexpected.iter().take(10) {
            warn!("  unexpected: {}", name);
        }
    }

    /// Turn an incomplete report into a load error
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }

        let mut problems = Vec::new();
        if let Some(name) = self.missing.first() {
            problems.push(format!("{} missing (first: {name})", self.missing.len()));
        }
        if let Some((name, expected, actual)) = self.mismatched.first() {
            problems.push(format!(
                "{} with wrong shape (first: {name} expected {expected:?}, found {actual:?})",
                self.mismatched.len()
            ));
        }
        if let Some(name) = self.unexpected.first() {
            problems.push(format!("{} unexpected (first: {name})", self.unexpected.len()));
        }

        Err(TaggerError::ModelLoad(format!(
            "{} does not match the AST architecture: {}",
            self.file_path,
            problems.join("; ")
        )))
    }
}
