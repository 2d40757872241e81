//! Trait definitions for the collaborators the server drives.

use std::path::Path;
use std::sync::Arc;

use crate::error::TtsResult;
use crate::types::{AudioChunk, SamplingParams};

/// Remote artifact hub.
///
/// Implementations populate a local directory with the files of one model
/// repository.
pub trait HubClient: Send + Sync {
    /// Fetch every repository file matching one of `allow_patterns` into `dest`.
    ///
    /// # Arguments
    /// * `repo_id` - Repository identifier on the hub
    /// * `dest` - Directory receiving the files (already created)
    /// * `allow_patterns` - Glob patterns over repository-relative paths
    fn fetch(&self, repo_id: &str, dest: &Path, allow_patterns: &[&str]) -> TtsResult<()>;
}

/// Inputs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    /// Text to synthesize.
    pub text: &'a str,
    /// Voice preset.
    pub voice: &'a str,
    /// Language code.
    pub lang_code: &'a str,
    /// Speaking rate multiplier.
    pub speed: f32,
    /// Style instruction (design mode).
    pub instruct: Option<&'a str>,
    /// Reference samples at the engine sample rate (clone mode).
    pub ref_audio: Option<&'a [f32]>,
    /// Reference transcript (clone mode).
    pub ref_text: Option<&'a str>,
    /// Sampling parameters.
    pub sampling: &'a SamplingParams,
}

/// A loaded speech model.
///
/// Engines are not assumed to be safe for concurrent invocation. Callers
/// must serialize `generate` through the inference gate.
pub trait SpeechEngine: Send + Sync {
    /// Native output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Run one blocking synthesis call.
    ///
    /// # Returns
    /// The generated audio as a sequence of segments, in playback order.
    fn generate(&self, request: &GenerateRequest<'_>) -> TtsResult<Vec<AudioChunk>>;
}

/// Loads engines from local model directories.
pub trait EngineLoader: Send + Sync {
    /// Backend name advertised to clients.
    fn name(&self) -> &'static str;

    /// Load an engine from a complete model directory.
    fn load(&self, location: &Path) -> TtsResult<Arc<dyn SpeechEngine>>;

    /// Release accelerator memory pools held by the backend.
    fn release_caches(&self) -> TtsResult<()> {
        Ok(())
    }
}
