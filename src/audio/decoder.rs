//! Audio decoding from in-memory bytes

use serde::Deserialize;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{Result, TaggerError};

/// Mono waveform with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Mono samples, nominally in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
}

impl AudioClip {
    /// Create a clip, rejecting empty waveforms, zero sample rates and
    /// NaN or infinite samples
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(TaggerError::Decode("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(TaggerError::Decode("audio contains no samples".into()));
        }
        ensure_finite(&samples)?;
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Fail with [`TaggerError::Decode`] at the first NaN or infinite sample
pub fn ensure_finite(samples: &[f32]) -> Result<()> {
    match samples.iter().position(|s| !s.is_finite()) {
        Some(index) => Err(TaggerError::Decode(format!(
            "non-finite sample {} at index {}",
            samples[index], index
        ))),
        None => Ok(()),
    }
}

/// Rule for folding multi-channel audio into one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixdownPolicy {
    /// Arithmetic mean across channels per frame
    #[default]
    Average,
    /// Keep channel 0 only
    FirstChannel,
}

/// Fold interleaved samples into mono
pub fn downmix(interleaved: &[f32], channels: usize, policy: MixdownPolicy) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    match policy {
        MixdownPolicy::Average => interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect(),
        MixdownPolicy::FirstChannel => interleaved.iter().step_by(channels).copied().collect(),
    }
}

/// Decoder for encoded preview audio
///
/// WAV is read with hound; every other container goes through symphonia format detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioDecoder {
    mixdown: MixdownPolicy,
}

impl AudioDecoder {
    /// Create a decoder with the given mixdown rule
    pub fn new(mixdown: MixdownPolicy) -> Self {
        Self { mixdown }
    }

    /// Decode bytes into a mono clip at the encoded sample rate
    pub fn decode(&self, bytes: &[u8]) -> Result<AudioClip> {
        if bytes.is_empty() {
            return Err(TaggerError::Decode("empty input".into()));
        }

        if is_wav(bytes) {
            self.decode_wav(bytes)
        } else {
            self.decode_compressed(bytes)
        }
    }

    fn decode_wav(&self, bytes: &[u8]) -> Result<AudioClip> {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| TaggerError::Decode(format!("invalid WAV data: {e}")))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| TaggerError::Decode(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_value))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| TaggerError::Decode(e.to_string()))?
            }
        };

        debug!(
            "Decoded WAV: {} Hz, {} channel(s), {} frames",
            spec.sample_rate,
            spec.channels,
            samples.len() / spec.channels.max(1) as usize
        );

        // Checked before mixdown so a bad sample in a dropped channel still fails
        ensure_finite(&samples)?;
        let mono = downmix(&samples, spec.channels as usize, self.mixdown);
        AudioClip::new(mono, spec.sample_rate)
    }

    fn decode_compressed(&self, bytes: &[u8]) -> Result<AudioClip> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let detected = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| TaggerError::Decode(format!("unrecognized container: {e}")))?;
        let mut format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| TaggerError::Decode("no audio track found".into()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| TaggerError::Decode(format!("unsupported codec: {e}")))?;

        let mut mono = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(e) => {
                    end_of_stream(e)?;
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let rate = *sample_rate.get_or_insert(spec.rate);
                    if rate != spec.rate {
                        return Err(TaggerError::Decode(format!(
                            "sample rate changed mid-stream: {rate} -> {}",
                            spec.rate
                        )));
                    }

                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    buf.copy_interleaved_ref(decoded);
                    mono.extend(downmix(buf.samples(), spec.channels.count(), self.mixdown));
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!("Skipping corrupt packet: {}", msg);
                }
                Err(e) => return Err(TaggerError::Decode(e.to_string())),
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| TaggerError::Decode("unknown sample rate".into()))?;
        debug!("Decoded {} mono samples at {} Hz", mono.len(), sample_rate);
        AudioClip::new(mono, sample_rate)
    }
}

/// `Ok` when a packet read error marks the clean end of the stream
///
/// A reset means the stream changed parameters mid-clip and fails the decode.
fn end_of_stream(error: SymphoniaError) -> Result<()> {
    match error {
        SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
        SymphoniaError::ResetRequired => {
            warn!("Stream reset requested mid-clip");
            Err(TaggerError::Decode("stream parameters changed mid-clip".into()))
        }
        e => Err(TaggerError::Decode(e.to_string())),
    }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: &[Vec<i16>]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for &s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_downmix_average() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2, MixdownPolicy::Average), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix_first_channel() {
        let stereo = [1.0, 0.0, 0.5, 0.25];
        assert_eq!(downmix(&stereo, 2, MixdownPolicy::FirstChannel), vec![1.0, 0.5]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mono = [0.1, 0.2, 0.3];
        assert_eq!(downmix(&mono, 1, MixdownPolicy::Average), mono.to_vec());
    }

    #[test]
    fn test_decode_stereo_wav() {
        let frames = vec![vec![16384i16, 0], vec![-16384, -16384], vec![0, 16384]];
        let bytes = wav_bytes(2, 44100, &frames);

        let clip = AudioDecoder::default().decode(&bytes).unwrap();
        assert_eq!(clip.sample_rate, 44100);
        assert_eq!(clip.samples.len(), 3);
        assert!((clip.samples[0] - 0.25).abs() < 1e-6);
        assert!((clip.samples[1] + 0.5).abs() < 1e-6);
        assert!((clip.samples[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_decode_empty_fails() {
        let result = AudioDecoder::default().decode(&[]);
        assert!(matches!(result, Err(TaggerError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let garbage = vec![0x42u8; 2048];
        let result = AudioDecoder::default().decode(&garbage);
        assert!(matches!(result, Err(TaggerError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_wav_fails() {
        let bytes = wav_bytes(1, 16000, &vec![vec![1000i16]; 64]);
        let result = AudioDecoder::default().decode(&bytes[..20]);
        assert!(matches!(result, Err(TaggerError::Decode(_))));
    }

    #[test]
    fn test_clip_rejects_zero_rate() {
        assert!(AudioClip::new(vec![0.0; 10], 0).is_err());
        assert!(AudioClip::new(vec![], 16000).is_err());
        let clip = AudioClip::new(vec![0.0; 16000], 16000).unwrap();
        assert!((clip.duration() - 1.0).abs() < 1e-6);
    }

    fn float_wav_bytes(channels: u16, samples: &[f32]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_float_wav() {
        let samples: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let clip = AudioDecoder::default().decode(&float_wav_bytes(1, &samples)).unwrap();
        assert_eq!(clip.samples, samples);
    }

    #[test]
    fn test_decode_rejects_nan_sample() {
        let mut samples: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        samples[1234] = f32::NAN;
        let result = AudioDecoder::default().decode(&float_wav_bytes(1, &samples));
        assert!(matches!(result, Err(TaggerError::Decode(msg)) if msg.contains("1234")));
    }

    #[test]
    fn test_decode_rejects_infinite_sample_in_dropped_channel() {
        // Channel 1 carries the bad sample; first-channel mixdown must still fail
        let mut interleaved = vec![0.25f32; 2000];
        interleaved[501] = f32::INFINITY;
        let result = AudioDecoder::new(MixdownPolicy::FirstChannel)
            .decode(&float_wav_bytes(2, &interleaved));
        assert!(matches!(result, Err(TaggerError::Decode(_))));
    }

    #[test]
    fn test_clip_rejects_non_finite() {
        let mut samples = vec![0.1f32; 800];
        samples[10] = f32::NEG_INFINITY;
        assert!(matches!(
            AudioClip::new(samples, 16000),
            Err(TaggerError::Decode(_))
        ));
        assert!(ensure_finite(&[0.0, 1.0, -1.0]).is_ok());
    }

    #[test]
    fn test_packet_read_errors() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "end of stream");
        assert!(end_of_stream(SymphoniaError::IoError(eof)).is_ok());
        assert!(matches!(
            end_of_stream(SymphoniaError::ResetRequired),
            Err(TaggerError::Decode(_))
        ));
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            end_of_stream(SymphoniaError::IoError(broken)),
            Err(TaggerError::Decode(_))
        ));
    }
}
