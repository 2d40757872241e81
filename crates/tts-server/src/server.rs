//! TTS server: router assembly, startup prefetch and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use runtime::{ShutdownRequest, TtsRuntime};
use tts_core::TtsResult;

use crate::service::{
    AppState, capabilities_handler, health_handler, metrics_handler, prefetch_handler,
    ready_handler, speakers_handler, startup_status_handler, tts_handler,
};

/// Exit status used when a second signal forces termination.
const FORCED_EXIT_CODE: i32 = 130;

/// Request body ceiling. Clone requests carry base64 reference audio.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Ceiling for open connections to close after the drain finished.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 9872)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Build the HTTP router over shared state.
pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/startup-status", get(startup_status_handler))
        .route("/prefetch", post(prefetch_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/speakers", get(speakers_handler))
        .route("/tts", post(tts_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The main TTS server.
pub struct TtsServer {
    config: ServerConfig,
    runtime: Arc<TtsRuntime>,
    metrics: Option<PrometheusHandle>,
}

impl TtsServer {
    pub fn new(
        config: ServerConfig,
        runtime: Arc<TtsRuntime>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config,
            runtime,
            metrics,
        }
    }

    /// Prefetch every model, serve until a shutdown signal, then drain.
    ///
    /// A failed prefetch aborts startup before the listener is bound. A
    /// second signal during the drain exits the process immediately.
    pub async fn run(self) -> TtsResult<()> {
        info!("Prefetching all required models before server start");
        self.runtime.prefetch().await?;

        let listener = tokio::net::TcpListener::bind(self.config.http_addr).await?;
        info!(addr = %self.config.http_addr, "TTS server listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let signal_runtime = Arc::clone(&self.runtime);
        tokio::spawn(async move {
            loop {
                shutdown_signal().await;
                match signal_runtime.request_shutdown() {
                    ShutdownRequest::Initiated => {
                        let _ = shutdown_tx.send(true);
                    }
                    ShutdownRequest::Escalated => {
                        warn!("Second shutdown signal received, exiting immediately");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                }
            }
        });

        let state = Arc::new(AppState::new(Arc::clone(&self.runtime), self.metrics.clone()));
        let app = router(state, self.config.max_body_bytes);
        let mut serve_shutdown_rx = shutdown_rx.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = serve_shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        tokio::select! {
            result = &mut server => {
                // The listener stopped without a shutdown signal.
                let result = result.map_err(|e| tts_core::TtsError::internal(e.to_string()))?;
                result?;
                return Ok(());
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => {}
        }

        info!("Shutdown signal received, draining");
        let report = self.runtime.shutdown().await;
        info!(
            drained = report.drained,
            engines_released = report.engines_released,
            waited_ms = report.waited.as_millis() as u64,
            "Runtime shut down"
        );

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!("Connections still open after shutdown timeout, forcing exit");
            }
            result = &mut server => {
                match result {
                    Ok(Ok(())) => info!("HTTP server stopped gracefully"),
                    Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                    Err(e) => error!(error = %e, "HTTP server task failed"),
                }
            }
        }

        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr.port(), 9872);
        assert!(config.http_addr.ip().is_loopback());
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
    }
}
