//! Core data types for the TTS server.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Logical model roles the server needs resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Small CustomVoice model.
    CustomSmall,
    /// Large CustomVoice model.
    CustomLarge,
    /// VoiceDesign model.
    Design,
    /// Base model used for voice cloning.
    Clone,
}

impl ModelRole {
    /// Every role, in prefetch order.
    pub const ALL: [ModelRole; 4] = [
        ModelRole::CustomSmall,
        ModelRole::CustomLarge,
        ModelRole::Design,
        ModelRole::Clone,
    ];

    /// Stable key used in manifests and status payloads.
    pub fn key(self) -> &'static str {
        match self {
            ModelRole::CustomSmall => "custom_small",
            ModelRole::CustomLarge => "custom_large",
            ModelRole::Design => "design",
            ModelRole::Clone => "clone",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// CustomVoice model size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CustomModelSize {
    /// 0.6B parameters.
    #[default]
    #[serde(rename = "0.6b")]
    Small,
    /// 1.7B parameters.
    #[serde(rename = "1.7b")]
    Large,
}

impl CustomModelSize {
    /// Model role backing this size.
    pub fn role(self) -> ModelRole {
        match self {
            CustomModelSize::Small => ModelRole::CustomSmall,
            CustomModelSize::Large => ModelRole::CustomLarge,
        }
    }

    /// Canonical label.
    pub fn as_str(self) -> &'static str {
        match self {
            CustomModelSize::Small => "0.6b",
            CustomModelSize::Large => "1.7b",
        }
    }
}

impl std::fmt::Display for CustomModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CustomModelSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0.6b" => Ok(Self::Small),
            "1.7b" => Ok(Self::Large),
            _ => Err("custom_model_size must be 0.6b or 1.7b".to_string()),
        }
    }
}

/// Synthesis mode requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// CustomVoice with the configured default size.
    #[default]
    Default,
    /// CustomVoice with an explicit size.
    Custom,
    /// VoiceDesign from a style instruction.
    Design,
    /// Voice cloning from reference audio.
    Clone,
}

impl RequestMode {
    /// All modes, as advertised by the capabilities endpoint.
    pub const ALL: [RequestMode; 4] = [
        RequestMode::Default,
        RequestMode::Custom,
        RequestMode::Design,
        RequestMode::Clone,
    ];

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestMode::Default => "default",
            RequestMode::Custom => "custom",
            RequestMode::Design => "design",
            RequestMode::Clone => "clone",
        }
    }
}

impl std::fmt::Display for RequestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST /tts` payload as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsRequest {
    /// Synthesis mode.
    #[serde(default)]
    pub mode: RequestMode,
    /// Backend name; must match the active backend when present.
    #[serde(default)]
    pub backend: Option<String>,
    /// Text to synthesize.
    pub text: String,
    /// CustomVoice model size ("0.6b" or "1.7b").
    #[serde(default)]
    pub custom_model_size: Option<String>,
    /// Voice preset.
    #[serde(default)]
    pub speaker: Option<String>,
    /// Style instruction (required for design).
    #[serde(default)]
    pub instruction: Option<String>,
    /// Base64 WAV reference, optionally as a `data:` URL (required for clone).
    #[serde(default)]
    pub ref_audio_b64: Option<String>,
    /// Transcript of the reference audio (required for clone).
    #[serde(default)]
    pub ref_text: Option<String>,
    /// Speaking rate multiplier.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Top-k sampling.
    #[serde(default)]
    pub top_k: Option<u32>,
    /// Generation length limit in tokens.
    #[serde(default)]
    pub max_new_tokens: Option<u32>,
}

fn default_speed() -> f32 {
    1.0
}

impl TtsRequest {
    /// Create a request for the default mode.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speed: default_speed(),
            ..Default::default()
        }
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the CustomVoice size.
    pub fn with_custom_model_size(mut self, size: impl Into<String>) -> Self {
        self.custom_model_size = Some(size.into());
        self
    }

    /// Set the speaker.
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Set the style instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the cloning reference.
    pub fn with_reference(
        mut self,
        ref_audio_b64: impl Into<String>,
        ref_text: impl Into<String>,
    ) -> Self {
        self.ref_audio_b64 = Some(ref_audio_b64.into());
        self.ref_text = Some(ref_text.into());
        self
    }
}

/// Sampling parameters forwarded to the engine.
///
/// Only values the client provided are set; the engine applies its own
/// defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for sampling.
    pub temperature: Option<f32>,
    /// Top-p (nucleus) sampling parameter.
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    pub top_k: Option<u32>,
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
}

impl SamplingParams {
    /// Create empty sampling parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Decoded reference recording for voice cloning (mono).
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAudio {
    /// Mono PCM samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Voice selection, carrying only the fields its mode needs.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceMode {
    /// CustomVoice preset speaker.
    Custom {
        size: CustomModelSize,
        speaker: String,
    },
    /// Voice designed from a style instruction.
    Design {
        instruction: String,
        speaker: String,
    },
    /// Voice cloned from a reference recording and its transcript.
    Clone {
        reference: ReferenceAudio,
        ref_text: String,
        speaker: String,
    },
}

impl VoiceMode {
    /// Model role serving this voice.
    pub fn role(&self) -> ModelRole {
        match self {
            VoiceMode::Custom { size, .. } => size.role(),
            VoiceMode::Design { .. } => ModelRole::Design,
            VoiceMode::Clone { .. } => ModelRole::Clone,
        }
    }

    /// Speaker preset name.
    pub fn speaker(&self) -> &str {
        match self {
            VoiceMode::Custom { speaker, .. }
            | VoiceMode::Design { speaker, .. }
            | VoiceMode::Clone { speaker, .. } => speaker,
        }
    }
}

/// A validated synthesis request, ready for the inference gate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisJob {
    /// Request identifier used in logs.
    pub request_id: u64,
    /// Text to synthesize.
    pub text: String,
    /// Voice selection.
    pub voice: VoiceMode,
    /// Speaking rate multiplier.
    pub speed: f32,
    /// Sampling parameters.
    pub sampling: SamplingParams,
}

impl SynthesisJob {
    /// Create a CustomVoice job with default speed and sampling.
    pub fn custom(
        text: impl Into<String>,
        size: CustomModelSize,
        speaker: impl Into<String>,
    ) -> Self {
        Self {
            request_id: 0,
            text: text.into(),
            voice: VoiceMode::Custom {
                size,
                speaker: speaker.into(),
            },
            speed: 1.0,
            sampling: SamplingParams::default(),
        }
    }

    /// Model role this job runs on.
    pub fn role(&self) -> ModelRole {
        self.voice.role()
    }
}

/// A chunk of audio produced by an engine.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM samples (f32, mono).
    pub pcm: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(pcm: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            pcm: pcm.into(),
            sample_rate,
        }
    }

    /// Get the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.pcm.len() as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Get the number of samples in this chunk.
    pub fn num_samples(&self) -> usize {
        self.pcm.len()
    }

    /// Check if the chunk holds no samples.
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}
