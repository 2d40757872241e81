//! Startup prefetch of every configured model, with observable progress.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, instrument};
use tts_core::{ModelCatalog, TtsError, TtsResult};

use crate::artifacts::ArtifactStore;
use crate::metrics::ServerMetrics;

/// Phase of the startup prefetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupStage {
    Idle,
    Downloading,
    Ready,
    Error,
}

/// The model a prefetch run is currently working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentModel {
    pub key: String,
    pub model_id: String,
}

/// Published prefetch progress. Readers always see a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupState {
    pub stage: StartupStage,
    /// Unix seconds.
    pub started_at: Option<i64>,
    /// Unix seconds.
    pub finished_at: Option<i64>,
    pub current: Option<CurrentModel>,
    pub total: usize,
    pub completed: usize,
    pub errors: Vec<String>,
}

impl StartupState {
    fn idle(total: usize) -> Self {
        Self {
            stage: StartupStage::Idle,
            started_at: None,
            finished_at: None,
            current: None,
            total,
            completed: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.stage == StartupStage::Ready
    }
}

#[derive(Serialize)]
struct ManifestEntry {
    model_id: String,
    local_dir: String,
    exists: bool,
}

#[derive(Serialize)]
struct Manifest {
    generated_at: i64,
    models: BTreeMap<&'static str, ManifestEntry>,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Runs the prefetch and owns the published [`StartupState`].
///
/// At most one run executes at a time. A caller that arrives while a run is
/// in progress waits for it and reports its outcome instead of starting a
/// second run.
pub struct StartupController {
    store: Arc<ArtifactStore>,
    catalog: ModelCatalog,
    manifest_path: PathBuf,
    state: ArcSwap<StartupState>,
    run_lock: Mutex<()>,
    runs: AtomicU64,
    metrics: ServerMetrics,
}

impl StartupController {
    pub fn new(
        store: Arc<ArtifactStore>,
        catalog: ModelCatalog,
        manifest_path: impl Into<PathBuf>,
        metrics: ServerMetrics,
    ) -> Self {
        let total = catalog.len();
        Self {
            store,
            catalog,
            manifest_path: manifest_path.into(),
            state: ArcSwap::from_pointee(StartupState::idle(total)),
            run_lock: Mutex::new(()),
            runs: AtomicU64::new(0),
            metrics,
        }
    }

    /// Current progress snapshot.
    pub fn snapshot(&self) -> Arc<StartupState> {
        self.state.load_full()
    }

    fn update(&self, f: impl Fn(&mut StartupState)) {
        self.state.rcu(|current| {
            let mut next = StartupState::clone(current);
            f(&mut next);
            next
        });
    }

    /// Ensure every configured model is available locally, then write the
    /// manifest. Blocking; run on a blocking thread from async code.
    pub fn prefetch(&self) -> TtsResult<()> {
        let seen = self.runs.load(Ordering::Acquire);
        let _guard = self.run_lock.lock();
        if self.runs.load(Ordering::Acquire) != seen {
            return self.outcome_of_last_run();
        }

        let result = self.run();
        self.runs.fetch_add(1, Ordering::Release);
        self.metrics.prefetch_finished(result.is_ok());
        result
    }

    fn outcome_of_last_run(&self) -> TtsResult<()> {
        let state = self.snapshot();
        if state.is_ready() {
            return Ok(());
        }
        let reason = state
            .errors
            .last()
            .cloned()
            .unwrap_or_else(|| "prefetch failed".to_string());
        let model_id = state
            .current
            .as_ref()
            .map(|c| c.model_id.clone())
            .unwrap_or_else(|| "prefetch".to_string());
        Err(TtsError::artifact_unavailable(model_id, reason))
    }

    #[instrument(skip(self), fields(total = self.catalog.len()))]
    fn run(&self) -> TtsResult<()> {
        let total = self.catalog.len();
        self.state.store(Arc::new(StartupState {
            stage: StartupStage::Downloading,
            started_at: Some(now_unix()),
            finished_at: None,
            current: None,
            total,
            completed: 0,
            errors: Vec::new(),
        }));

        match self.download_all() {
            Ok(()) => {
                self.update(|s| {
                    s.stage = StartupStage::Ready;
                    s.finished_at = Some(now_unix());
                    s.current = None;
                });
                info!("All required models are ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Model prefetch failed");
                let message = e.to_string();
                self.update(|s| {
                    s.stage = StartupStage::Error;
                    s.finished_at = Some(now_unix());
                    s.errors = vec![message.clone()];
                });
                Err(e)
            }
        }
    }

    fn download_all(&self) -> TtsResult<()> {
        for (role, model_id) in self.catalog.entries() {
            self.update(|s| {
                s.current = Some(CurrentModel {
                    key: role.key().to_string(),
                    model_id: model_id.to_string(),
                });
            });
            self.store.ensure_local(role, model_id)?;
            self.update(|s| s.completed += 1);
        }
        self.write_manifest()
    }

    fn write_manifest(&self) -> TtsResult<()> {
        let models = self
            .catalog
            .entries()
            .map(|(role, model_id)| {
                let location = self.store.location(model_id);
                let entry = ManifestEntry {
                    model_id: model_id.to_string(),
                    local_dir: location.display().to_string(),
                    exists: location.exists(),
                };
                (role.key(), entry)
            })
            .collect();
        let manifest = Manifest {
            generated_at: now_unix(),
            models,
        };

        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| TtsError::serialization(e.to_string()))?;
        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.manifest_path, json)?;
        info!(path = %self.manifest_path.display(), "Wrote model manifest");
        Ok(())
    }
}
