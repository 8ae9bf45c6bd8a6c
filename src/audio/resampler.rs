//! Audio resampling using rubato

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::{Result, TaggerError};
use crate::MODEL_SAMPLE_RATE;

/// Input chunk fed to the sinc resampler per call
const CHUNK_SIZE: usize = 1024;

/// Audio resampler
pub struct Resampler;

impl Resampler {
    /// Resample audio from one sample rate to another
    ///
    /// Equal rates return the input unchanged. Otherwise the output holds
    /// `round(len * to_sr / from_sr)` samples, aligned with the input
    /// (the sinc filter delay is removed).
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        if from_sr == 0 || to_sr == 0 {
            return Err(TaggerError::InvalidSampleRate {
                from: from_sr,
                to: to_sr,
            });
        }
        if from_sr == to_sr || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        let ratio = to_sr as f64 / from_sr as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
            .map_err(|e| TaggerError::Resample(e.to_string()))?;

        let delay = resampler.output_delay();
        let expected = (samples.len() as f64 * ratio).round() as usize;
        let mut output = Vec::with_capacity(expected + delay);

        let mut pos = 0;
        while samples.len() - pos >= resampler.input_frames_next() {
            let end = pos + resampler.input_frames_next();
            let input: &[&[f32]] = &[&samples[pos..end]];
            let chunk = resampler
                .process(input, None)
                .map_err(|e| TaggerError::Resample(e.to_string()))?;
            output.extend_from_slice(&chunk[0]);
            pos = end;
        }

        if pos < samples.len() {
            let tail: &[&[f32]] = &[&samples[pos..]];
            let chunk = resampler
                .process_partial(Some(tail), None)
                .map_err(|e| TaggerError::Resample(e.to_string()))?;
            output.extend_from_slice(&chunk[0]);
        }

        // Flush the filter tail
        while output.len() < expected + delay {
            let chunk = resampler
                .process_partial(None::<&[&[f32]]>, None)
                .map_err(|e| TaggerError::Resample(e.to_string()))?;
            if chunk[0].is_empty() {
                break;
            }
            output.extend_from_slice(&chunk[0]);
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);
        Ok(output)
    }

    /// Resample to the model rate (16 kHz)
    pub fn resample_to_16k(samples: &[f32], from_sr: u32) -> Result<Vec<f32>> {
        Self::resample(samples, from_sr, MODEL_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let samples = sine(440.0, 16000, 4000);
        let out = Resampler::resample(&samples, 16000, 16000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let samples = vec![0.0; 100];
        assert!(matches!(
            Resampler::resample(&samples, 0, 16000),
            Err(TaggerError::InvalidSampleRate { .. })
        ));
        assert!(matches!(
            Resampler::resample(&samples, 44100, 0),
            Err(TaggerError::InvalidSampleRate { .. })
        ));
    }

    #[test]
    fn test_downsample_length() {
        let samples = sine(440.0, 44100, 44100);
        let out = Resampler::resample_to_16k(&samples, 44100).unwrap();
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn test_upsample_length() {
        let samples = sine(440.0, 8000, 8000);
        let out = Resampler::resample(&samples, 8000, 16000).unwrap();
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn test_preserves_low_frequency_tone() {
        let samples = sine(440.0, 48000, 48000);
        let out = Resampler::resample(&samples, 48000, 16000).unwrap();

        // A full-scale sine keeps its RMS of 1/sqrt(2) away from the edges
        let body = &out[1000..15000];
        let rms = (body.iter().map(|s| s * s).sum::<f32>() / body.len() as f32).sqrt();
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02, "rms {rms}");
    }
}
