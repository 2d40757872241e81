//! Graceful shutdown: refuse new work, drain the gate, release engines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use tts_core::EngineLoader;

use crate::engine_cache::EngineCache;
use crate::gate::{DrainOutcome, InferenceGate};

/// Process-wide "shutting down" flag. Set once, never cleared.
///
/// Only [`ShutdownCoordinator`] sets it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call flipped the flag.
    fn set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// What a shutdown request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// First request: the flag is now set and draining may begin.
    Initiated,
    /// The server was already shutting down; the caller should terminate
    /// the process immediately.
    Escalated,
}

/// Result of the drain-and-cleanup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight synthesis finished within the ceiling.
    pub drained: bool,
    /// Engines dropped from the cache.
    pub engines_released: usize,
    pub waited: Duration,
}

pub struct ShutdownCoordinator {
    flag: ShutdownFlag,
    gate: Arc<InferenceGate>,
    cache: Arc<EngineCache>,
    loader: Arc<dyn EngineLoader>,
    drain_timeout: Duration,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub fn new(
        flag: ShutdownFlag,
        gate: Arc<InferenceGate>,
        cache: Arc<EngineCache>,
        loader: Arc<dyn EngineLoader>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            flag,
            gate,
            cache,
            loader,
            drain_timeout,
            report: OnceCell::new(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.is_set()
    }

    /// Mark the server as shutting down. Safe to call from signal handlers
    /// and from several tasks at once.
    pub fn request_shutdown(&self) -> ShutdownRequest {
        if self.flag.set() {
            warn!("Server shutdown requested");
            ShutdownRequest::Initiated
        } else {
            warn!("Shutdown requested again while draining");
            ShutdownRequest::Escalated
        }
    }

    /// Set the flag, wait up to the drain ceiling for in-flight synthesis,
    /// then release every engine.
    ///
    /// Runs once. Later or concurrent callers wait for and receive the same
    /// report.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self.report.get_or_init(|| self.drain_and_release()).await
    }

    async fn drain_and_release(&self) -> ShutdownReport {
        if !self.flag.is_set() {
            self.request_shutdown();
        }

        info!(
            timeout_secs = self.drain_timeout.as_secs_f64(),
            "Waiting for in-flight synthesis to finish"
        );
        let start = Instant::now();
        let outcome = self.gate.acquire_within(self.drain_timeout).await;
        let waited = start.elapsed();

        let drained = match &outcome {
            DrainOutcome::Acquired(_) => {
                info!(waited_ms = waited.as_millis() as u64, "In-flight synthesis drained");
                true
            }
            DrainOutcome::TimedOut => {
                warn!(
                    timeout_secs = self.drain_timeout.as_secs_f64(),
                    "Timed out waiting for in-flight synthesis; releasing engines anyway"
                );
                false
            }
        };

        let engines_released = self.release_engines();
        drop(outcome);

        ShutdownReport {
            drained,
            engines_released,
            waited,
        }
    }

    fn release_engines(&self) -> usize {
        let released = self.cache.clear();
        info!(engines = released, "Cleared engine cache");
        match self.loader.release_caches() {
            Ok(()) => info!(backend = self.loader.name(), "Released accelerator memory pools"),
            Err(e) => warn!(
                backend = self.loader.name(),
                error = %e,
                "Failed to release accelerator memory pools"
            ),
        }
        released
    }
}
