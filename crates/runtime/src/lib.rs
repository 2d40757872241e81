//! # runtime
//!
//! Lifecycle and concurrency control for the local TTS server.
//!
//! This crate provides:
//! - Artifact store and startup prefetch with observable progress
//! - Engine cache and the single-slot inference gate
//! - Graceful shutdown with a bounded drain
//! - Request validation, the tone engine backend, logging and metrics

pub mod artifacts;
pub mod engine_cache;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod request;
pub mod shutdown;
pub mod startup;
pub mod tone;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use tts_core::{
    AudioChunk, EngineLoader, HubClient, RequestMode, RuntimeConfig, SynthesisJob, TtsError,
    TtsRequest, TtsResult,
};

pub use artifacts::{ArtifactStore, HfHubClient, ModelStatus};
pub use engine_cache::EngineCache;
pub use gate::{DrainOutcome, InferenceGate};
pub use metrics::ServerMetrics;
pub use request::{RequestDefaults, validate_request};
pub use shutdown::{ShutdownCoordinator, ShutdownFlag, ShutdownReport, ShutdownRequest};
pub use startup::{CurrentModel, StartupController, StartupStage, StartupState};
pub use tone::ToneEngineLoader;

/// Per-model availability as advertised to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAvailability {
    pub model_id: String,
    pub local_dir: String,
    pub downloaded: bool,
}

/// What this server can do.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub backend: &'static str,
    pub modes: Vec<&'static str>,
    pub default_speaker: String,
    pub default_custom_model_size: &'static str,
    pub models: BTreeMap<&'static str, ModelAvailability>,
}

/// TTS runtime: owns every piece of shared server state.
pub struct TtsRuntime {
    config: RuntimeConfig,
    store: Arc<ArtifactStore>,
    startup: Arc<StartupController>,
    cache: Arc<EngineCache>,
    gate: Arc<InferenceGate>,
    shutdown: Arc<ShutdownCoordinator>,
    loader: Arc<dyn EngineLoader>,
    next_request_id: AtomicU64,
    metrics: ServerMetrics,
}

impl TtsRuntime {
    /// Create a runtime, preparing the runtime directories.
    pub fn new(
        config: RuntimeConfig,
        hub: Arc<dyn HubClient>,
        loader: Arc<dyn EngineLoader>,
        metrics: ServerMetrics,
    ) -> TtsResult<Self> {
        let drain_timeout = config.drain_timeout()?;
        config.paths.ensure_dirs()?;
        info!(
            runtime_dir = %config.paths.runtime_dir.display(),
            backend = loader.name(),
            "Initializing TTS runtime"
        );

        let store = Arc::new(ArtifactStore::new(&config.paths.models_dir, hub));
        let startup = Arc::new(StartupController::new(
            Arc::clone(&store),
            config.models.clone(),
            config.paths.manifest_path(),
            metrics,
        ));
        let cache = Arc::new(EngineCache::new(
            Arc::clone(&store),
            Arc::clone(&loader),
            metrics,
        ));
        let flag = ShutdownFlag::new();
        let gate = Arc::new(InferenceGate::new(
            flag.clone(),
            Arc::clone(&cache),
            config.models.clone(),
            metrics,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(
            flag,
            Arc::clone(&gate),
            Arc::clone(&cache),
            Arc::clone(&loader),
            drain_timeout,
        ));

        Ok(Self {
            config,
            store,
            startup,
            cache,
            gate,
            shutdown,
            loader,
            next_request_id: AtomicU64::new(1),
            metrics,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.loader.name()
    }

    pub fn metrics(&self) -> ServerMetrics {
        self.metrics
    }

    pub fn startup_state(&self) -> Arc<StartupState> {
        self.startup.snapshot()
    }

    pub fn is_ready(&self) -> bool {
        self.startup_state().is_ready() && !self.is_shutting_down()
    }

    /// Run (or join) the startup prefetch on a blocking thread.
    pub async fn prefetch(&self) -> TtsResult<Arc<StartupState>> {
        let startup = Arc::clone(&self.startup);
        tokio::task::spawn_blocking(move || startup.prefetch())
            .await
            .map_err(|e| TtsError::internal(format!("prefetch task failed: {e}")))??;
        Ok(self.startup_state())
    }

    /// Validate a client request. Assigns the next request id.
    pub fn validate(&self, request: TtsRequest) -> TtsResult<SynthesisJob> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let defaults = RequestDefaults {
            backend: self.backend_name(),
            speaker: &self.config.default_speaker,
            custom_model_size: self.config.default_custom_model_size,
        };
        validate_request(request, request_id, &defaults)
    }

    /// Synthesize a validated job through the inference gate.
    pub async fn synthesize(&self, job: SynthesisJob) -> TtsResult<AudioChunk> {
        self.gate.run(job).await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    pub fn request_shutdown(&self) -> ShutdownRequest {
        self.shutdown.request_shutdown()
    }

    /// Drain in-flight synthesis and release engines. Idempotent.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown.shutdown().await
    }

    pub fn cached_engines(&self) -> usize {
        self.cache.len()
    }

    pub fn model_statuses(&self) -> Vec<ModelStatus> {
        self.config
            .models
            .entries()
            .map(|(role, model_id)| self.store.status(role, model_id))
            .collect()
    }

    pub fn capabilities(&self) -> Capabilities {
        let models = self
            .model_statuses()
            .into_iter()
            .map(|status| {
                let availability = ModelAvailability {
                    model_id: status.model_id,
                    local_dir: status.local_dir,
                    downloaded: status.complete,
                };
                (status.key, availability)
            })
            .collect();

        Capabilities {
            backend: self.backend_name(),
            modes: RequestMode::ALL.iter().map(|m| m.as_str()).collect(),
            default_speaker: self.config.default_speaker.clone(),
            default_custom_model_size: self.config.default_custom_model_size.as_str(),
            models,
        }
    }
}

impl std::fmt::Debug for TtsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsRuntime")
            .field("backend", &self.backend_name())
            .field("runtime_dir", &self.config.paths.runtime_dir)
            .field("cached_engines", &self.cache.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
