//! Tagging pipeline
//!
//! Orchestrates all components for one clip:
//! 1. Decode encoded bytes to a mono waveform
//! 2. Resample to 16 kHz
//! 3. Kaldi log-mel filterbank (128 bins)
//! 4. Pad/truncate to the model's time dimension, then normalize
//! 5. AST forward pass and sigmoid
//! 6. Top-K ranking against the label catalog

use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{AudioDecoder, Resampler};
use crate::config::TaggerConfig;
use crate::error::{Result, TaggerError, TrackFailure};
use crate::features::{FbankExtractor, FbankNormalizer, FeatureMatrix, FeatureWindower};
use crate::labels::LabelCatalog;
use crate::models::{select_device, AstConfig, ModelState};
use crate::preview::PreviewResolver;
use crate::ranking::{rank, PredictionResult};

/// Tags for one resolved track
#[derive(Debug, Clone)]
pub struct TrackPrediction {
    /// Catalog track id as requested
    pub track_id: String,
    /// Track title
    pub display_name: String,
    /// First credited artist
    pub artist_name: String,
    /// Where the tagged preview clip came from
    pub preview_url: Option<String>,
    /// Ranked tags
    pub predictions: PredictionResult,
}

/// Immutable tagging context
///
/// Built once; every method takes `&self`, so a single instance can be
/// shared across threads.
pub struct Tagger {
    decoder: AudioDecoder,
    fbank: FbankExtractor,
    windower: FeatureWindower,
    normalizer: FbankNormalizer,
    model: ModelState,
    labels: LabelCatalog,
}

impl Tagger {
    /// Load the label catalog and model named by the configuration
    pub fn new(config: &TaggerConfig) -> Result<Self> {
        let labels = LabelCatalog::load(&config.model.labels)?;

        let (fstride, tstride) = config.strides();
        let ast_config = AstConfig {
            input_tdim: config.model.input_tdim,
            ..AstConfig::audioset(fstride, tstride)
        };
        info!(
            "Loading AST (fstride {}, tstride {}, {} frames)",
            fstride, tstride, ast_config.input_tdim
        );

        let device = select_device(config.inference.use_gpu)?;
        let model = ModelState::load(&config.model.weights, ast_config, &device)?;

        Self::from_parts(config, model, labels)
    }

    /// Assemble a tagger from an already loaded model and catalog
    pub fn from_parts(config: &TaggerConfig, model: ModelState, labels: LabelCatalog) -> Result<Self> {
        if labels.len() != model.num_labels() {
            return Err(TaggerError::LabelMismatch {
                labels: labels.len(),
                scores: model.num_labels(),
            });
        }

        let (target_frames, bins) = model.input_shape();
        let fbank = FbankExtractor::new(crate::MODEL_SAMPLE_RATE, bins);
        let windower = FeatureWindower::new(
            target_frames,
            config.features.pad_value,
            config.features.oversize,
        );

        Ok(Self {
            decoder: AudioDecoder::new(config.features.mixdown),
            fbank,
            windower,
            normalizer: FbankNormalizer::default(),
            model,
            labels,
        })
    }

    /// Loaded classifier
    pub fn model(&self) -> &ModelState {
        &self.model
    }

    /// Label catalog, index-aligned with the model outputs
    pub fn labels(&self) -> &LabelCatalog {
        &self.labels
    }

    /// Model-ready features for a waveform at any sample rate
    pub fn features_from_waveform(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureMatrix> {
        let resampled = Resampler::resample(samples, sample_rate, crate::MODEL_SAMPLE_RATE)?;
        let raw = self.fbank.compute(&resampled)?;
        debug!("Extracted {} fbank frames", raw.frames());

        let mut features = self.windower.apply(raw)?;
        self.normalizer.apply(&mut features);
        if !features.is_finite() {
            return Err(TaggerError::InvalidFeatures(
                "normalized features contain NaN or infinite values".into(),
            ));
        }
        Ok(features)
    }

    /// Per-label probabilities for a waveform
    pub fn probabilities(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        let features = self.features_from_waveform(samples, sample_rate)?;
        self.model.probabilities(&features)
    }

    /// Top-K tags for a mono waveform
    pub fn tag_waveform(&self, samples: &[f32], sample_rate: u32, k: usize) -> Result<PredictionResult> {
        let start = Instant::now();
        let probabilities = self.probabilities(samples, sample_rate)?;
        let result = rank(&probabilities, &self.labels, k)?;
        debug!("Tagged {} samples in {:.2?}", samples.len(), start.elapsed());
        Ok(result)
    }

    /// Top-K tags for encoded audio bytes
    pub fn tag_audio(&self, bytes: &[u8], k: usize) -> Result<PredictionResult> {
        let clip = self.decoder.decode(bytes)?;
        debug!(
            "Decoded {:.2}s at {} Hz",
            clip.duration(),
            clip.sample_rate
        );
        self.tag_waveform(&clip.samples, clip.sample_rate, k)
    }

    /// Top-K tags for an audio file on disk
    pub fn tag_file<P: AsRef<Path>>(&self, path: P, k: usize) -> Result<PredictionResult> {
        let bytes = std::fs::read(path.as_ref())?;
        self.tag_audio(&bytes, k)
    }

    /// Resolve and tag one track
    pub fn tag_track(
        &self,
        resolver: &dyn PreviewResolver,
        track_id: &str,
        k: usize,
    ) -> std::result::Result<TrackPrediction, TrackFailure> {
        let fail = |error: TaggerError| TrackFailure::new(track_id, error);

        let preview = resolver.resolve(track_id).map_err(fail)?;
        let audio = preview
            .audio
            .ok_or_else(|| fail(TaggerError::PreviewUnavailable(track_id.to_string())))?;
        let predictions = self.tag_audio(&audio, k).map_err(fail)?;

        Ok(TrackPrediction {
            track_id: track_id.to_string(),
            display_name: preview.display_name,
            artist_name: preview.artist_name,
            preview_url: preview.preview_url,
            predictions,
        })
    }

    /// Tag several tracks; one failure does not stop the others
    pub fn tag_tracks<S: AsRef<str>>(
        &self,
        resolver: &dyn PreviewResolver,
        track_ids: &[S],
        k: usize,
    ) -> Vec<std::result::Result<TrackPrediction, TrackFailure>> {
        track_ids
            .iter()
            .map(|id| {
                let outcome = self.tag_track(resolver, id.as_ref(), k);
                if let Err(failure) = &outcome {
                    warn!("{}", failure);
                }
                outcome
            })
            .collect()
    }
}
