//! Log mel filterbank computation
//!
//! Matches the Kaldi `fbank` frontend the AST checkpoints were trained on:
//! 25 ms Hann frames every 10 ms, DC removal, 0.97 pre-emphasis, power
//! spectrum over a 512-point FFT, triangular filters spaced on the
//! `1127 ln(1 + f/700)` mel scale from 20 Hz to Nyquist, natural log.
//! Parameter values must stay exactly as they are; the pretrained weights
//! silently degrade on a frontend that is only "similar".

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use super::FeatureMatrix;
use crate::error::{Result, TaggerError};

/// Frame length in milliseconds
const FRAME_LENGTH_MS: usize = 25;
/// Frame shift in milliseconds
const FRAME_SHIFT_MS: usize = 10;
/// Pre-emphasis coefficient
const PREEMPHASIS: f32 = 0.97;
/// Lowest filterbank edge in Hz
const LOW_FREQ: f32 = 20.0;

/// Kaldi-compatible log mel filterbank extractor
pub struct FbankExtractor {
    /// Sample rate
    pub sample_rate: u32,
    /// Samples per analysis frame
    pub frame_length: usize,
    /// Samples between frame starts
    pub frame_shift: usize,
    /// FFT size (frame length rounded up to a power of two)
    pub n_fft: usize,
    /// Number of mel bins
    pub n_mels: usize,
    /// Filterbank, `n_mels` rows of `n_fft / 2 + 1` weights
    mel_banks: Vec<Vec<f32>>,
    /// Symmetric Hann window
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl FbankExtractor {
    /// Create an extractor for the given sample rate and mel bin count
    pub fn new(sample_rate: u32, n_mels: usize) -> Self {
        let frame_length = sample_rate as usize * FRAME_LENGTH_MS / 1000;
        let frame_shift = sample_rate as usize * FRAME_SHIFT_MS / 1000;
        let n_fft = frame_length.next_power_of_two();

        let window = Self::hann_window(frame_length);
        let mel_banks = Self::mel_banks(n_fft, n_mels, sample_rate, LOW_FREQ, sample_rate as f32 / 2.0);
        let fft = FftPlanner::new().plan_fft_forward(n_fft);

        Self {
            sample_rate,
            frame_length,
            frame_shift,
            n_fft,
            n_mels,
            mel_banks,
            window,
            fft,
        }
    }

    /// The AudioSet AST frontend: 16 kHz, 128 mel bins
    pub fn audioset() -> Self {
        Self::new(crate::MODEL_SAMPLE_RATE, crate::MEL_BINS)
    }

    /// Frames produced for `num_samples` input samples (edges snipped)
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples < self.frame_length {
            0
        } else {
            1 + (num_samples - self.frame_length) / self.frame_shift
        }
    }

    /// Compute `(frames, n_mels)` log filterbank energies
    ///
    /// NaN or infinite input fails; the log floor would otherwise hide it.
    pub fn compute(&self, audio: &[f32]) -> Result<FeatureMatrix> {
        if let Some(index) = audio.iter().position(|s| !s.is_finite()) {
            return Err(TaggerError::InvalidFeatures(format!(
                "non-finite input sample {} at index {}",
                audio[index], index
            )));
        }

        let num_frames = self.num_frames(audio.len());
        if num_frames == 0 {
            return Err(TaggerError::InsufficientAudio {
                samples: audio.len(),
                window: self.frame_length,
            });
        }

        let mut data = Vec::with_capacity(num_frames * self.n_mels);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut frame = vec![0.0f32; self.frame_length];

        for i in 0..num_frames {
            let start = i * self.frame_shift;
            frame.copy_from_slice(&audio[start..start + self.frame_length]);
            let power = self.power_spectrum(&mut frame, &mut buffer);
            data.extend(self.apply_mel_banks(&power));
        }

        FeatureMatrix::new(data, num_frames, self.n_mels)
    }

    /// DC removal, pre-emphasis, windowing and FFT of one frame
    fn power_spectrum(&self, frame: &mut [f32], buffer: &mut [Complex<f32>]) -> Vec<f32> {
        let mean = frame.iter().sum::<f32>() / frame.len() as f32;
        frame.iter_mut().for_each(|s| *s -= mean);

        // Walk backwards so each sample sees its unmodified predecessor;
        // the first sample uses itself.
        for j in (1..frame.len()).rev() {
            frame[j] -= PREEMPHASIS * frame[j - 1];
        }
        frame[0] -= PREEMPHASIS * frame[0];

        for (j, slot) in buffer.iter_mut().enumerate() {
            let value = if j < frame.len() {
                frame[j] * self.window[j]
            } else {
                0.0
            };
            *slot = Complex::new(value, 0.0);
        }

        self.fft.process(buffer);
        buffer[..self.n_fft / 2 + 1]
            .iter()
            .map(|c| c.norm_sqr())
            .collect()
    }

    fn apply_mel_banks<'a>(&'a self, power: &'a [f32]) -> impl Iterator<Item = f32> + 'a {
        self.mel_banks.iter().map(move |bank| {
            let energy: f32 = bank.iter().zip(power).map(|(w, p)| w * p).sum();
            energy.max(f32::EPSILON).ln()
        })
    }

    /// Symmetric Hann window
    fn hann_window(size: usize) -> Vec<f32> {
        let denom = (size.max(2) - 1) as f32;
        (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / denom).cos())
            .collect()
    }

    /// Hz to Kaldi mel
    fn mel_scale(hz: f32) -> f32 {
        1127.0 * (1.0 + hz / 700.0).ln()
    }

    /// Triangular filters with slopes computed in the mel domain
    fn mel_banks(n_fft: usize, n_mels: usize, sr: u32, low_freq: f32, high_freq: f32) -> Vec<Vec<f32>> {
        let num_fft_bins = n_fft / 2;
        let fft_bin_width = sr as f32 / n_fft as f32;

        let mel_low = Self::mel_scale(low_freq);
        let mel_high = Self::mel_scale(high_freq);
        let mel_delta = (mel_high - mel_low) / (n_mels + 1) as f32;

        let bin_mels: Vec<f32> = (0..num_fft_bins)
            .map(|i| Self::mel_scale(fft_bin_width * i as f32))
            .collect();

        (0..n_mels)
            .map(|b| {
                let left = mel_low + b as f32 * mel_delta;
                let center = mel_low + (b + 1) as f32 * mel_delta;
                let right = mel_low + (b + 2) as f32 * mel_delta;

                let mut bank: Vec<f32> = bin_mels
                    .iter()
                    .map(|&mel| {
                        let up = (mel - left) / (center - left);
                        let down = (right - mel) / (right - center);
                        up.min(down).max(0.0)
                    })
                    .collect();
                // The Nyquist bin carries no weight
                bank.push(0.0);
                bank
            })
            .collect()
    }
}

/// Dataset normalization applied after windowing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FbankNormalizer {
    /// Dataset mean of the log-fbank
    pub mean: f32,
    /// Dataset standard deviation of the log-fbank
    pub std: f32,
}

impl Default for FbankNormalizer {
    /// AudioSet training-set statistics
    fn default() -> Self {
        Self {
            mean: -4.267_739_3,
            std: 4.568_997_4,
        }
    }
}

impl FbankNormalizer {
    /// `(x - mean) / (2 * std)`, in place
    pub fn apply(&self, features: &mut FeatureMatrix) {
        let scale = 1.0 / (self.std * 2.0);
        for v in features.data_mut() {
            *v = (*v - self.mean) * scale;
        }
    }
}
