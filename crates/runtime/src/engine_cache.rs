//! Process-wide cache of loaded engines, keyed by model identifier.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tts_core::{EngineLoader, SpeechEngine, TtsError, TtsResult};

use crate::artifacts::ArtifactStore;
use crate::metrics::ServerMetrics;

/// Loaded engines, at most one per model identifier.
///
/// Loads happen on the inference path, which the gate serializes, so a
/// check-then-insert never races with another load.
pub struct EngineCache {
    engines: DashMap<String, Arc<dyn SpeechEngine>>,
    store: Arc<ArtifactStore>,
    loader: Arc<dyn EngineLoader>,
    metrics: ServerMetrics,
}

impl EngineCache {
    pub fn new(
        store: Arc<ArtifactStore>,
        loader: Arc<dyn EngineLoader>,
        metrics: ServerMetrics,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            store,
            loader,
            metrics,
        }
    }

    /// Return the cached engine for `model_id`, loading it on first use.
    pub fn get_or_load(&self, model_id: &str) -> TtsResult<Arc<dyn SpeechEngine>> {
        if let Some(engine) = self.engines.get(model_id) {
            debug!(model_id, "Engine cache hit");
            return Ok(Arc::clone(engine.value()));
        }

        let location = self.store.location(model_id);
        if !location.exists() {
            return Err(TtsError::engine_load(&location, "model path is missing"));
        }

        info!(model_id, path = %location.display(), backend = self.loader.name(), "Loading engine");
        let start = Instant::now();
        let engine = self.loader.load(&location)?;
        info!(
            model_id,
            took_ms = start.elapsed().as_millis() as u64,
            "Engine loaded"
        );

        self.engines
            .insert(model_id.to_string(), Arc::clone(&engine));
        self.metrics.engine_loaded();
        self.metrics.set_cached_engines(self.engines.len());
        Ok(engine)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.engines.contains_key(model_id)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Drop every cached engine and return how many were held.
    ///
    /// Engines still running a generation stay alive until that call returns.
    pub fn clear(&self) -> usize {
        let released = self.engines.len();
        self.engines.clear();
        self.metrics.set_cached_engines(0);
        released
    }
}
