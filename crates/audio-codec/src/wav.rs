//! WAV encoding and decoding over in-memory buffers.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::Serialize;
use std::io::Cursor;
use tts_core::{ReferenceAudio, TtsError, TtsResult};

/// Size of a canonical PCM WAV header.
const CANONICAL_HEADER_LEN: usize = 44;

/// Encode mono samples as a 16-bit PCM WAV byte stream.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> TtsResult<Vec<u8>> {
    if sample_rate == 0 {
        return Err(TtsError::internal("cannot encode WAV with sample rate 0"));
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Vec::with_capacity(CANONICAL_HEADER_LEN + samples.len() * 2);
    let mut writer = WavWriter::new(Cursor::new(&mut buffer), spec)
        .map_err(|e| TtsError::internal(format!("WAV writer init failed: {e}")))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| TtsError::internal(format!("WAV write failed: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| TtsError::internal(format!("WAV finalize failed: {e}")))?;

    Ok(buffer)
}

/// Decode a WAV byte stream into mono samples.
///
/// Multi-channel input is downmixed by averaging channels. The input comes
/// from clients, so malformed data is reported as an invalid request.
pub fn decode_wav(bytes: &[u8]) -> TtsResult<ReferenceAudio> {
    let mut reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| TtsError::invalid_request(format!("invalid WAV data: {e}")))?;

    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| TtsError::invalid_request(format!("invalid WAV samples: {e}")))?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TtsError::invalid_request(format!("invalid WAV samples: {e}")))?,
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(ReferenceAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Level statistics of a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioStats {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
    pub len: usize,
}

impl AudioStats {
    /// Compute statistics; `None` for empty input.
    pub fn compute(samples: &[f32]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let (min, max) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            });
        Some(Self {
            min,
            max,
            rms: calculate_rms(samples),
            len: samples.len(),
        })
    }
}

/// Calculate RMS (Root Mean Square) of audio samples.
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Fields of a canonical WAV header, for response logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WavHeaderInfo {
    /// `RIFF` and `WAVE` tags are present.
    pub ok: bool,
    /// Total byte length of the stream.
    pub bytes: usize,
    pub audio_format: Option<u16>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u16>,
    pub data_bytes: Option<u32>,
}

/// Inspect the header of a WAV byte stream without decoding samples.
pub fn wav_header_info(data: &[u8]) -> WavHeaderInfo {
    let mut info = WavHeaderInfo {
        ok: data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE",
        bytes: data.len(),
        audio_format: None,
        channels: None,
        sample_rate: None,
        bits_per_sample: None,
        data_bytes: None,
    };
    if data.len() < CANONICAL_HEADER_LEN {
        return info;
    }

    let u16_at = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);
    let u32_at = |at: usize| {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    };

    info.audio_format = Some(u16_at(20));
    info.channels = Some(u16_at(22));
    info.sample_rate = Some(u32_at(24));
    info.bits_per_sample = Some(u16_at(34));
    info.data_bytes = Some(u32_at(40));
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_header() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let bytes = encode_wav(&samples, 24000).unwrap();

        assert_eq!(bytes.len(), CANONICAL_HEADER_LEN + samples.len() * 2);
        let info = wav_header_info(&bytes);
        assert!(info.ok);
        assert_eq!(info.audio_format, Some(1));
        assert_eq!(info.channels, Some(1));
        assert_eq!(info.sample_rate, Some(24000));
        assert_eq!(info.bits_per_sample, Some(16));
        assert_eq!(info.data_bytes, Some(10));
    }

    #[test]
    fn test_sample_clamping() {
        let bytes = encode_wav(&[2.0, -2.0], 16000).unwrap();
        let data = &bytes[CANONICAL_HEADER_LEN..];

        let sample1 = i16::from_le_bytes([data[0], data[1]]);
        assert_eq!(sample1, i16::MAX);

        let sample2 = i16::from_le_bytes([data[2], data[3]]);
        assert!(sample2 < -30000);
    }

    #[test]
    fn test_decode_encoded_audio() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect();
        let bytes = encode_wav(&samples, 48000).unwrap();

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.samples.len(), samples.len());
        assert!((decoded.samples[100] - samples[100]).abs() < 1e-3);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buffer = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buffer), spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(i16::MAX / 2).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let decoded = decode_wav(&buffer).unwrap();
        assert_eq!(decoded.samples.len(), 10);
        assert!((decoded.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_wav(b"definitely not a wav file").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_audio_stats() {
        assert!(AudioStats::compute(&[]).is_none());

        let stats = AudioStats::compute(&[0.5, -0.5, 0.5, -0.5]).unwrap();
        assert_eq!(stats.min, -0.5);
        assert_eq!(stats.max, 0.5);
        assert!((stats.rms - 0.5).abs() < 1e-6);
        assert_eq!(stats.len, 4);
    }

    #[test]
    fn test_header_info_short_input() {
        let info = wav_header_info(b"RIFF");
        assert!(!info.ok);
        assert_eq!(info.bytes, 4);
        assert!(info.sample_rate.is_none());
    }
}
