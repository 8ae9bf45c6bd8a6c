//! Audio Spectrogram Transformer (AST)
//!
//! A DeiT-style vision transformer applied to a log-mel spectrogram:
//! "AST: Audio Spectrogram Transformer" (Gong et al., 2021).
//!
//! Shape contract (AudioSet checkpoint):
//! - input: `(batch, input_tdim = 1024, input_fdim = 128)` normalized fbank
//! - 16x16 patches with strides `(fstride, tstride)` over the `(freq, time)` plane
//! - `cls` + `dist` tokens, 12 pre-norm blocks, 768 dims, 12 heads
//! - output: `(batch, label_dim = 527)` logits
//!
//! There is no dropout and no batch norm, so the forward pass is the same
//! function of its input on every call.

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};

use crate::error::{Result, TaggerError};

/// AST architecture hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct AstConfig {
    /// Mel bins per frame
    pub input_fdim: usize,
    /// Time frames per clip
    pub input_tdim: usize,
    /// Patch stride along frequency
    pub fstride: usize,
    /// Patch stride along time
    pub tstride: usize,
    /// Square patch edge
    pub patch_size: usize,
    /// Token width
    pub embed_dim: usize,
    /// Transformer blocks
    pub depth: usize,
    /// Attention heads per block
    pub num_heads: usize,
    /// MLP hidden width as a multiple of `embed_dim`
    pub mlp_ratio: usize,
    /// Output labels
    pub label_dim: usize,
    /// Epsilon of the encoder layer norms
    pub layer_norm_eps: f64,
    /// Epsilon of the classification head layer norm
    pub head_norm_eps: f64,
}

impl Default for AstConfig {
    fn default() -> Self {
        Self::audioset(10, 10)
    }
}

impl AstConfig {
    /// DeiT-base (384) AST trained on AudioSet with the given patch strides
    pub fn audioset(fstride: usize, tstride: usize) -> Self {
        Self {
            input_fdim: crate::MEL_BINS,
            input_tdim: 1024,
            fstride,
            tstride,
            patch_size: 16,
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            mlp_ratio: 4,
            label_dim: 527,
            layer_norm_eps: 1e-6,
            head_norm_eps: 1e-5,
        }
    }

    /// Patch grid `(f_dim, t_dim)`
    pub fn patch_grid(&self) -> (usize, usize) {
        let f_dim = (self.input_fdim - self.patch_size) / self.fstride + 1;
        let t_dim = (self.input_tdim - self.patch_size) / self.tstride + 1;
        (f_dim, t_dim)
    }

    /// Number of spectrogram patches
    pub fn num_patches(&self) -> usize {
        let (f_dim, t_dim) = self.patch_grid();
        f_dim * t_dim
    }

    /// MLP hidden width
    pub fn mlp_hidden(&self) -> usize {
        self.embed_dim * self.mlp_ratio
    }

    /// Expected feature matrix shape `(time_frames, mel_bins)`
    pub fn input_shape(&self) -> (usize, usize) {
        (self.input_tdim, self.input_fdim)
    }

    /// Reject configurations the architecture cannot be built from
    pub fn validate(&self) -> Result<()> {
        if self.fstride == 0 || self.tstride == 0 {
            return Err(TaggerError::ModelLoad("patch strides must be positive".into()));
        }
        if self.input_fdim < self.patch_size || self.input_tdim < self.patch_size {
            return Err(TaggerError::ModelLoad(format!(
                "input {}x{} is smaller than one {}x{} patch",
                self.input_tdim, self.input_fdim, self.patch_size, self.patch_size
            )));
        }
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(TaggerError::ModelLoad(format!(
                "embed_dim {} is not divisible by {} heads",
                self.embed_dim, self.num_heads
            )));
        }
        Ok(())
    }
}

/// Pre-norm transformer block: `x + attn(norm1(x))`, then `x + mlp(norm2(x))`
struct EncoderBlock {
    norm1: LayerNorm,
    qkv: Linear,
    proj: Linear,
    norm2: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl EncoderBlock {
    fn new(config: &AstConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim = config.embed_dim;
        let hidden = config.mlp_hidden();
        let head_dim = dim / config.num_heads;

        Ok(Self {
            norm1: candle_nn::layer_norm(dim, config.layer_norm_eps, vb.pp("norm1"))?,
            qkv: candle_nn::linear(dim, dim * 3, vb.pp("attn.qkv"))?,
            proj: candle_nn::linear(dim, dim, vb.pp("attn.proj"))?,
            norm2: candle_nn::layer_norm(dim, config.layer_norm_eps, vb.pp("norm2"))?,
            fc1: candle_nn::linear(dim, hidden, vb.pp("mlp.fc1"))?,
            fc2: candle_nn::linear(hidden, dim, vb.pp("mlp.fc2"))?,
            num_heads: config.num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    fn attention(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let (batch_size, seq_len, dim) = x.dims3()?;

        // (batch, seq, 3, heads, head_dim) -> (3, batch, heads, seq, head_dim)
        let qkv = self
            .qkv
            .forward(x)?
            .reshape((batch_size, seq_len, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let attn = (q.matmul(&k.t()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, dim))?;

        self.proj.forward(&out)
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.attention(&self.norm1.forward(x)?)?;
        let x = (x + h)?;

        let h = self.fc1.forward(&self.norm2.forward(&x)?)?.gelu_erf()?;
        let h = self.fc2.forward(&h)?;
        x + h
    }
}

/// AST classifier with loaded weights
pub struct AstClassifier {
    config: AstConfig,
    patch_embed: Linear,
    cls_token: Tensor,
    dist_token: Tensor,
    pos_embed: Tensor,
    blocks: Vec<EncoderBlock>,
    norm: LayerNorm,
    head_norm: LayerNorm,
    head: Linear,
}

impl AstClassifier {
    /// Bind weights from a var builder rooted at the checkpoint top level
    pub fn load(config: AstConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Self::build(config, vb).map_err(|e| TaggerError::ModelLoad(e.to_string()))
    }

    fn build(config: AstConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim = config.embed_dim;
        let p = config.patch_size;
        let v = vb.pp("v");

        // The patch conv has one input channel, so it is a linear map over
        // flattened 16x16 patches.
        let proj_weight = v
            .get((dim, 1, p, p), "patch_embed.proj.weight")?
            .reshape((dim, p * p))?;
        let proj_bias = v.get(dim, "patch_embed.proj.bias")?;
        let patch_embed = Linear::new(proj_weight, Some(proj_bias));

        let cls_token = v.get((1, 1, dim), "cls_token")?;
        let dist_token = v.get((1, 1, dim), "dist_token")?;
        let pos_embed = v.get((1, config.num_patches() + 2, dim), "pos_embed")?;

        let blocks_vb = v.pp("blocks");
        let blocks = (0..config.depth)
            .map(|i| EncoderBlock::new(&config, blocks_vb.pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let norm = candle_nn::layer_norm(dim, config.layer_norm_eps, v.pp("norm"))?;
        let head_norm = candle_nn::layer_norm(dim, config.head_norm_eps, vb.pp("mlp_head.0"))?;
        let head = candle_nn::linear(dim, config.label_dim, vb.pp("mlp_head.1"))?;

        Ok(Self {
            config,
            patch_embed,
            cls_token,
            dist_token,
            pos_embed,
            blocks,
            norm,
            head_norm,
            head,
        })
    }

    /// Architecture this model was built with
    pub fn config(&self) -> &AstConfig {
        &self.config
    }

    /// Forward pass: `(batch, tdim, fdim)` features to `(batch, label_dim)` logits
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let (batch_size, frames, bins) = features.dims3()?;
        let expected = self.config.input_shape();
        if (frames, bins) != expected {
            return Err(TaggerError::ShapeMismatch {
                expected,
                actual: (frames, bins),
            });
        }

        let dim = self.config.embed_dim;
        let patches = self.extract_patches(features)?;
        let x = self.patch_embed.forward(&patches)?;

        let cls = self.cls_token.broadcast_as((batch_size, 1, dim))?.contiguous()?;
        let dist = self.dist_token.broadcast_as((batch_size, 1, dim))?.contiguous()?;
        let mut x = Tensor::cat(&[&cls, &dist, &x], 1)?.broadcast_add(&self.pos_embed)?;

        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        let x = self.norm.forward(&x)?;

        let pooled = ((x.i((.., 0))? + x.i((.., 1))?)? / 2.0)?;
        let pooled = self.head_norm.forward(&pooled)?;
        Ok(self.head.forward(&pooled)?)
    }

    /// Unfold `(batch, time, freq)` into `(batch, num_patches, patch*patch)`
    ///
    /// Patches are ordered frequency-major then time, and each patch is
    /// flattened frequency-major, matching a conv over the `(freq, time)` plane.
    fn extract_patches(&self, features: &Tensor) -> candle_core::Result<Tensor> {
        let (batch_size, frames, bins) = features.dims3()?;
        let (f_dim, t_dim) = self.config.patch_grid();
        let p = self.config.patch_size;
        let (fs, ts) = (self.config.fstride, self.config.tstride);

        let values = features.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let mut patches = Vec::with_capacity(batch_size * f_dim * t_dim * p * p);

        for b in 0..batch_size {
            let clip = &values[b * frames * bins..(b + 1) * frames * bins];
            for fi in 0..f_dim {
                for ti in 0..t_dim {
                    for kf in 0..p {
                        let freq = fi * fs + kf;
                        for kt in 0..p {
                            let time = ti * ts + kt;
                            patches.push(clip[time * bins + freq]);
                        }
                    }
                }
            }
        }

        Tensor::from_vec(patches, (batch_size, f_dim * t_dim, p * p), features.device())
    }
}

/// Pick the execution device
pub fn select_device(use_gpu: bool) -> Result<Device> {
    if use_gpu {
        Ok(Device::cuda_if_available(0)?)
    } else {
        Ok(Device::Cpu)
    }
}
