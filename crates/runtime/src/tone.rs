//! Deterministic tone synthesizer used as the default engine backend.
//!
//! Each word becomes a short pitched segment whose length follows the word
//! length and speaking rate. Output depends only on the inputs.

use serde::Deserialize;
use std::f32::consts::TAU;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tts_core::{AudioChunk, EngineLoader, GenerateRequest, SpeechEngine, TtsError, TtsResult};

use audio_codec::{apply_fade_in, apply_fade_out};

/// Output rate when the model config does not name one.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

const MS_PER_CHAR: f32 = 55.0;
const MIN_WORD_MS: f32 = 90.0;
const GAP_MS: f32 = 40.0;
const EDGE_FADE_MS: f32 = 8.0;
const BASE_AMPLITUDE: f32 = 0.3;
/// Longest utterance one call may produce.
pub const MAX_OUTPUT_SECS: f32 = 600.0;

#[derive(Debug, Deserialize)]
struct ModelConfig {
    #[serde(default)]
    sample_rate: Option<u32>,
}

/// Loads [`ToneEngine`]s from model directories.
#[derive(Debug, Default)]
pub struct ToneEngineLoader;

impl EngineLoader for ToneEngineLoader {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn load(&self, location: &Path) -> TtsResult<Arc<dyn SpeechEngine>> {
        let config_path = location.join("config.json");
        let raw = fs::read(&config_path)
            .map_err(|e| TtsError::engine_load(location, format!("cannot read config.json: {e}")))?;
        let config: ModelConfig = serde_json::from_slice(&raw)
            .map_err(|e| TtsError::engine_load(location, format!("invalid config.json: {e}")))?;

        let sample_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        if sample_rate == 0 {
            return Err(TtsError::engine_load(location, "sample_rate must be non-zero"));
        }

        let seed = location
            .file_name()
            .map(|name| fnv1a(name.to_string_lossy().as_bytes()))
            .unwrap_or_default();
        debug!(path = %location.display(), sample_rate, "Tone engine ready");
        Ok(Arc::new(ToneEngine::new(sample_rate, seed)))
    }
}

/// A loaded tone engine.
#[derive(Debug)]
pub struct ToneEngine {
    sample_rate: u32,
    seed: u32,
}

impl ToneEngine {
    pub fn new(sample_rate: u32, seed: u32) -> Self {
        Self { sample_rate, seed }
    }

    fn base_pitch(&self, request: &GenerateRequest<'_>) -> f32 {
        let mut hash = self.seed ^ fnv1a(request.voice.as_bytes());
        if let Some(instruct) = request.instruct {
            hash ^= fnv1a(instruct.as_bytes());
        }
        110.0 + (hash % 120) as f32
    }

    /// Cloned voices follow the loudness of their reference.
    fn amplitude(request: &GenerateRequest<'_>) -> f32 {
        match request.ref_audio {
            Some(reference) if !reference.is_empty() => {
                let rms = (reference.iter().map(|s| s * s).sum::<f32>() / reference.len() as f32)
                    .sqrt();
                (rms * 2.0).clamp(0.05, 0.6)
            }
            _ => BASE_AMPLITUDE,
        }
    }

    fn samples_for(&self, ms: f32) -> usize {
        (ms / 1000.0 * self.sample_rate as f32) as usize
    }

    fn word_ms(word: &str, speed: f32) -> f32 {
        let chars = word.chars().count() as f32;
        (chars * MS_PER_CHAR).max(MIN_WORD_MS) / speed
    }

    fn render_word(&self, len: usize, pitch: f32, amplitude: f32) -> Vec<f32> {
        let rate = self.sample_rate as f32;

        let mut pcm: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f32 / rate;
                let fundamental = (TAU * pitch * t).sin();
                let overtone = 0.35 * (TAU * pitch * 2.0 * t).sin();
                amplitude * (fundamental + overtone) / 1.35
            })
            .collect();
        apply_fade_in(&mut pcm, EDGE_FADE_MS, self.sample_rate);
        apply_fade_out(&mut pcm, EDGE_FADE_MS, self.sample_rate);
        pcm
    }
}

impl SpeechEngine for ToneEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(&self, request: &GenerateRequest<'_>) -> TtsResult<Vec<AudioChunk>> {
        if !(request.speed.is_finite() && request.speed > 0.0) {
            return Err(TtsError::inference("speed must be positive"));
        }

        let limit = request
            .sampling
            .max_tokens
            .map_or(usize::MAX, |n| n as usize);
        let words: Vec<&str> = request.text.split_whitespace().take(limit).collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let gap_ms = GAP_MS / request.speed;
        let total_ms: f32 = words
            .iter()
            .map(|word| Self::word_ms(word, request.speed) + gap_ms)
            .sum();
        if total_ms > MAX_OUTPUT_SECS * 1000.0 {
            return Err(TtsError::inference(format!(
                "output would last {:.0}s, limit is {MAX_OUTPUT_SECS:.0}s",
                total_ms / 1000.0
            )));
        }

        let base = self.base_pitch(request);
        let amplitude = Self::amplitude(request);
        let gap = vec![0.0f32; self.samples_for(gap_ms)];

        let segments = words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                // Gentle falling contour across the utterance.
                let pitch = base * (1.0 + 0.12 * ((fnv1a(word.as_bytes()) % 7) as f32 / 7.0))
                    - i as f32 * 0.5;
                let len = self.samples_for(Self::word_ms(word, request.speed));
                let mut pcm = self.render_word(len, pitch.max(60.0), amplitude);
                pcm.extend_from_slice(&gap);
                AudioChunk::new(pcm, self.sample_rate)
            })
            .collect();
        Ok(segments)
    }
}

/// 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::SamplingParams;

    fn request<'a>(text: &'a str, sampling: &'a SamplingParams) -> GenerateRequest<'a> {
        GenerateRequest {
            text,
            voice: "Vivian",
            lang_code: "en",
            speed: 1.0,
            instruct: None,
            ref_audio: None,
            ref_text: None,
            sampling,
        }
    }

    fn total_samples(chunks: &[AudioChunk]) -> usize {
        chunks.iter().map(AudioChunk::num_samples).sum()
    }

    #[test]
    fn test_one_segment_per_word() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 1);
        let sampling = SamplingParams::default();
        let chunks = engine.generate(&request("hello there world", &sampling)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.sample_rate == DEFAULT_SAMPLE_RATE));
        assert!(chunks.iter().all(|c| c.pcm.iter().all(|s| s.abs() <= 1.0)));
    }

    #[test]
    fn test_output_is_deterministic() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 9);
        let sampling = SamplingParams::default();
        let a = engine.generate(&request("same input", &sampling)).unwrap();
        let b = engine.generate(&request("same input", &sampling)).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(&*a[0].pcm, &*b[0].pcm);
    }

    #[test]
    fn test_speed_shortens_audio() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 1);
        let sampling = SamplingParams::default();
        let normal = engine.generate(&request("a longer sentence", &sampling)).unwrap();

        let mut fast = request("a longer sentence", &sampling);
        fast.speed = 2.0;
        let fast = engine.generate(&fast).unwrap();

        assert!(total_samples(&fast) < total_samples(&normal));
    }

    #[test]
    fn test_overlong_output_is_refused() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 1);
        let sampling = SamplingParams::default();

        let mut slow = request("hello", &sampling);
        slow.speed = 0.000_000_001;
        let err = engine.generate(&slow).unwrap_err();
        assert!(matches!(err, TtsError::Inference(_)));

        let long_text = "word ".repeat(10_000);
        let err = engine.generate(&request(&long_text, &sampling)).unwrap_err();
        assert!(matches!(err, TtsError::Inference(_)));
    }

    #[test]
    fn test_max_tokens_limits_words() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 1);
        let sampling = SamplingParams::new().with_max_tokens(2);
        let chunks = engine.generate(&request("one two three four", &sampling)).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        let engine = ToneEngine::new(DEFAULT_SAMPLE_RATE, 1);
        let sampling = SamplingParams::default();
        assert!(engine.generate(&request("   ", &sampling)).unwrap().is_empty());
    }

    #[test]
    fn test_loader_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), br#"{"sample_rate": 16000}"#).unwrap();

        let engine = ToneEngineLoader.load(dir.path()).unwrap();
        assert_eq!(engine.sample_rate(), 16000);
    }

    #[test]
    fn test_loader_rejects_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToneEngineLoader.load(dir.path()).err().unwrap();
        assert!(matches!(err, TtsError::EngineLoad { .. }));
    }
}
