//! Metrics collection and Prometheus export.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tts_core::{TtsError, TtsResult};

/// Metrics recorder for server lifecycle and synthesis.
///
/// Every method is a no-op until a recorder is installed, so the runtime can
/// record unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerMetrics;

impl ServerMetrics {
    /// Install the global Prometheus recorder and return a handle for rendering.
    ///
    /// The handle is served by the HTTP layer at `/metrics`; no separate
    /// listener is started.
    pub fn install() -> TtsResult<(Self, PrometheusHandle)> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| TtsError::internal(format!("metrics init failed: {e}")))?;

        Self::register_metrics();

        Ok((Self, handle))
    }

    /// Metrics without a recorder (for tests and the CLI).
    pub fn init_noop() -> Self {
        Self
    }

    fn register_metrics() {
        describe_counter!("tts_requests_total", "Total number of TTS requests received");
        describe_counter!(
            "tts_requests_completed",
            "Total number of TTS requests completed successfully"
        );
        describe_counter!(
            "tts_requests_failed",
            "Total number of TTS requests that failed, by error kind"
        );
        describe_counter!(
            "tts_requests_rejected_shutdown",
            "Requests rejected because the server was shutting down"
        );

        describe_histogram!(
            "tts_gate_wait_ms",
            "Time spent waiting for the inference gate in milliseconds"
        );
        describe_histogram!(
            "tts_inference_latency_ms",
            "Model inference latency in milliseconds"
        );
        describe_histogram!(
            "tts_rtf",
            "Real-time factor (processing time / audio duration)"
        );

        describe_counter!("tts_engine_loads_total", "Number of engine loads from disk");
        describe_gauge!("tts_cached_engines", "Number of engines held in the cache");
        describe_counter!("tts_prefetch_runs_total", "Number of prefetch runs, by outcome");
    }

    pub fn request_received(&self) {
        counter!("tts_requests_total").increment(1);
    }

    pub fn request_completed(&self) {
        counter!("tts_requests_completed").increment(1);
    }

    /// Record a failed request under the given error kind label.
    pub fn request_failed(&self, kind: &'static str) {
        counter!("tts_requests_failed", "kind" => kind).increment(1);
    }

    pub fn request_rejected_shutdown(&self) {
        counter!("tts_requests_rejected_shutdown").increment(1);
    }

    pub fn record_gate_wait(&self, ms: f64) {
        histogram!("tts_gate_wait_ms").record(ms);
    }

    pub fn record_inference_latency(&self, ms: f64) {
        histogram!("tts_inference_latency_ms").record(ms);
    }

    pub fn record_rtf(&self, rtf: f64) {
        histogram!("tts_rtf").record(rtf);
    }

    pub fn engine_loaded(&self) {
        counter!("tts_engine_loads_total").increment(1);
    }

    pub fn set_cached_engines(&self, count: usize) {
        gauge!("tts_cached_engines").set(count as f64);
    }

    pub fn prefetch_finished(&self, ok: bool) {
        let outcome = if ok { "ready" } else { "error" };
        counter!("tts_prefetch_runs_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop() {
        let metrics = ServerMetrics::init_noop();

        // No recorder installed: calls must not panic.
        metrics.request_received();
        metrics.request_failed("inference");
        metrics.record_gate_wait(3.0);
        metrics.set_cached_engines(2);
        metrics.prefetch_finished(true);
    }
}
