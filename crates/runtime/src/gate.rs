//! Single-slot gate serializing every engine invocation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use tts_core::{
    AudioChunk, GenerateRequest, ModelCatalog, SynthesisJob, TtsError, TtsResult, VoiceMode,
};

use audio_codec::{AudioStats, resample_linear};

use crate::engine_cache::EngineCache;
use crate::metrics::ServerMetrics;
use crate::shutdown::ShutdownFlag;

/// Language passed to every generation call.
const LANG_CODE: &str = "en";

const SHUTTING_DOWN: &str = "Server is shutting down";

/// Outcome of a bounded wait for the gate.
#[derive(Debug)]
pub enum DrainOutcome {
    /// The gate was free within the ceiling. Holding the guard keeps new
    /// synthesis out.
    Acquired(OwnedMutexGuard<()>),
    /// The ceiling elapsed with synthesis still in flight.
    TimedOut,
}

/// Admits one synthesis at a time.
///
/// The lock is held from engine lookup through the end of generation, so
/// engine loading and inference never overlap with another request. Waiters
/// are admitted in arrival order.
pub struct InferenceGate {
    slot: Arc<Mutex<()>>,
    shutdown: ShutdownFlag,
    cache: Arc<EngineCache>,
    catalog: ModelCatalog,
    metrics: ServerMetrics,
}

impl InferenceGate {
    pub fn new(
        shutdown: ShutdownFlag,
        cache: Arc<EngineCache>,
        catalog: ModelCatalog,
        metrics: ServerMetrics,
    ) -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            shutdown,
            cache,
            catalog,
            metrics,
        }
    }

    /// Run one job through the gate.
    ///
    /// Fails fast with `ServiceUnavailable` once shutdown has begun, both
    /// before queueing and after being admitted.
    #[instrument(skip(self, job), fields(request_id = job.request_id, role = %job.role()))]
    pub async fn run(&self, job: SynthesisJob) -> TtsResult<AudioChunk> {
        if self.shutdown.is_set() {
            return Err(TtsError::unavailable(SHUTTING_DOWN));
        }

        let wait_start = Instant::now();
        let guard = Arc::clone(&self.slot).lock_owned().await;
        let waited = wait_start.elapsed();
        if waited_noticeably(waited) {
            let waited_ms = waited.as_millis() as u64;
            info!(request_id = job.request_id, waited_ms, "Waited for inference lock");
        } else {
            debug!(request_id = job.request_id, "Inference lock acquired without waiting");
        }
        self.metrics.record_gate_wait(waited.as_secs_f64() * 1000.0);

        if self.shutdown.is_set() {
            return Err(TtsError::unavailable(SHUTTING_DOWN));
        }

        let cache = Arc::clone(&self.cache);
        let model_id = self.catalog.repo_id(job.role()).to_string();
        let metrics = self.metrics;

        // The guard moves into the blocking task so the slot stays taken
        // until the engine call returns, even if this future is dropped.
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            synthesize_locked(&cache, &model_id, &job, metrics)
        })
        .await
        .map_err(|e| TtsError::inference(format!("synthesis task failed: {e}")))?
    }

    /// Wait up to `ceiling` for the gate to become free.
    pub async fn acquire_within(&self, ceiling: Duration) -> DrainOutcome {
        match tokio::time::timeout(ceiling, Arc::clone(&self.slot).lock_owned()).await {
            Ok(guard) => DrainOutcome::Acquired(guard),
            Err(_) => DrainOutcome::TimedOut,
        }
    }
}

/// Sub-millisecond waits are logged at debug only.
fn waited_noticeably(waited: Duration) -> bool {
    waited.as_millis() > 0
}

fn synthesize_locked(
    cache: &EngineCache,
    model_id: &str,
    job: &SynthesisJob,
    metrics: ServerMetrics,
) -> TtsResult<AudioChunk> {
    let engine = cache.get_or_load(model_id)?;
    let sample_rate = engine.sample_rate();

    let (instruct, ref_audio, ref_text) = match &job.voice {
        VoiceMode::Custom { .. } => (None, None, None),
        VoiceMode::Design { instruction, .. } => (Some(instruction.as_str()), None, None),
        VoiceMode::Clone {
            reference,
            ref_text,
            ..
        } => {
            let samples =
                resample_linear(&reference.samples, reference.sample_rate, sample_rate);
            debug!(
                from_rate = reference.sample_rate,
                to_rate = sample_rate,
                samples = samples.len(),
                "Prepared reference audio"
            );
            (None, Some(samples), Some(ref_text.as_str()))
        }
    };

    let request = GenerateRequest {
        text: &job.text,
        voice: job.voice.speaker(),
        lang_code: LANG_CODE,
        speed: job.speed,
        instruct,
        ref_audio: ref_audio.as_deref(),
        ref_text,
        sampling: &job.sampling,
    };

    let start = Instant::now();
    let segments = engine.generate(&request)?;
    let elapsed = start.elapsed();

    let audio = concat_segments(segments, sample_rate)?;
    let inference_ms = elapsed.as_secs_f64() * 1000.0;
    let audio_ms = f64::from(audio.duration_ms());
    metrics.record_inference_latency(inference_ms);
    if audio_ms > 0.0 {
        metrics.record_rtf(inference_ms / audio_ms);
    }

    if let Some(stats) = AudioStats::compute(&audio.pcm) {
        info!(
            request_id = job.request_id,
            model_id,
            samples = stats.len,
            sample_rate = audio.sample_rate,
            min = stats.min,
            max = stats.max,
            rms = stats.rms,
            inference_ms = inference_ms as u64,
            "Synthesis finished"
        );
    }
    Ok(audio)
}

/// Join engine segments into one waveform.
fn concat_segments(segments: Vec<AudioChunk>, engine_rate: u32) -> TtsResult<AudioChunk> {
    let Some(first) = segments.first() else {
        return Err(TtsError::inference("engine returned no audio"));
    };
    let sample_rate = first.sample_rate;
    if sample_rate != engine_rate {
        warn!(
            segment_rate = sample_rate,
            engine_rate, "Segment sample rate differs from engine rate"
        );
    }
    if segments.iter().any(|s| s.sample_rate != sample_rate) {
        return Err(TtsError::inference("engine returned mixed sample rates"));
    }

    let total: usize = segments.iter().map(AudioChunk::num_samples).sum();
    if total == 0 {
        return Err(TtsError::inference("engine returned no audio"));
    }

    let mut pcm = Vec::with_capacity(total);
    for segment in &segments {
        pcm.extend_from_slice(&segment.pcm);
    }
    Ok(AudioChunk::new(pcm, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_real_waits_are_noticeable() {
        assert!(!waited_noticeably(Duration::ZERO));
        assert!(!waited_noticeably(Duration::from_micros(900)));
        assert!(waited_noticeably(Duration::from_millis(1)));
        assert!(waited_noticeably(Duration::from_secs(2)));
    }

    #[test]
    fn test_concat_preserves_order() {
        let segments = vec![
            AudioChunk::new(vec![0.1, 0.2], 24000),
            AudioChunk::new(vec![0.3], 24000),
        ];
        let audio = concat_segments(segments, 24000).unwrap();
        assert_eq!(&*audio.pcm, &[0.1, 0.2, 0.3]);
        assert_eq!(audio.sample_rate, 24000);
    }

    #[test]
    fn test_concat_rejects_empty_output() {
        assert!(matches!(
            concat_segments(Vec::new(), 24000),
            Err(TtsError::Inference(_))
        ));
        assert!(matches!(
            concat_segments(vec![AudioChunk::new(Vec::new(), 24000)], 24000),
            Err(TtsError::Inference(_))
        ));
    }

    #[test]
    fn test_concat_rejects_mixed_rates() {
        let segments = vec![
            AudioChunk::new(vec![0.1], 24000),
            AudioChunk::new(vec![0.1], 16000),
        ];
        assert!(concat_segments(segments, 24000).is_err());
    }
}
