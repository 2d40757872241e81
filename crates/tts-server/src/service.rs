//! HTTP handlers and error mapping.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use audio_codec::{encode_wav, wav_header_info};
use runtime::{Capabilities, StartupState, TtsRuntime};
use tts_core::{DEFAULT_SPEAKERS, TtsError, TtsRequest};

/// Response header carrying the sample rate of a WAV body.
pub const SAMPLE_RATE_HEADER: &str = "x-sample-rate";

/// Shared server state.
pub struct AppState {
    pub runtime: Arc<TtsRuntime>,
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(runtime: Arc<TtsRuntime>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            runtime,
            metrics,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// An error response: status code plus a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Metric label for an error.
fn error_kind(err: &TtsError) -> &'static str {
    match err {
        TtsError::ArtifactUnavailable { .. } => "artifact_unavailable",
        TtsError::EngineLoad { .. } => "engine_load",
        TtsError::InvalidRequest(_) => "invalid_request",
        TtsError::Inference(_) => "inference",
        TtsError::ServiceUnavailable(_) => "unavailable",
        _ => "internal",
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        let status = match &err {
            TtsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TtsError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            detail: self.message,
        });
        (self.status, body).into_response()
    }
}

/// JSON body extractor whose rejections use the `{"detail"}` error shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(
                    status = %rejection.status(),
                    error = %rejection.body_text(),
                    "Rejected request body"
                );
                Err(rejection.into())
            }
        }
    }
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    startup: StartupState,
}

#[derive(Serialize)]
pub(crate) struct PrefetchResponse {
    ok: bool,
    startup: StartupState,
}

#[derive(Serialize)]
pub(crate) struct SpeakersResponse {
    speakers: &'static [&'static str],
}

#[derive(Serialize)]
pub(crate) struct ReadyResponse {
    status: &'static str,
    startup: StartupState,
}

pub(crate) async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        startup: StartupState::clone(&state.runtime.startup_state()),
    })
}

pub(crate) async fn startup_status_handler(
    State(state): State<Arc<AppState>>,
) -> Json<StartupState> {
    Json(StartupState::clone(&state.runtime.startup_state()))
}

/// Run (or join) a prefetch and report the final state.
pub(crate) async fn prefetch_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PrefetchResponse>, ApiError> {
    match state.runtime.prefetch().await {
        Ok(startup) => Ok(Json(PrefetchResponse {
            ok: true,
            startup: StartupState::clone(&startup),
        })),
        Err(e) => {
            error!(error = %e, "Prefetch request failed");
            Err(e.into())
        }
    }
}

pub(crate) async fn capabilities_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Capabilities> {
    Json(state.runtime.capabilities())
}

pub(crate) async fn speakers_handler() -> Json<SpeakersResponse> {
    Json(SpeakersResponse {
        speakers: DEFAULT_SPEAKERS,
    })
}

/// 200 once every model is ready, 503 while starting or shutting down.
pub(crate) async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    let startup = StartupState::clone(&state.runtime.startup_state());
    let (code, status) = if state.runtime.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else if startup.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };
    (code, Json(ReadyResponse { status, startup })).into_response()
}

/// Prometheus text exposition.
pub(crate) async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

/// Synthesize speech and return it as a 16-bit PCM WAV file.
#[instrument(skip_all, fields(mode = %request.mode, text_len = request.text.len()))]
pub(crate) async fn tts_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<TtsRequest>,
) -> Result<Response, ApiError> {
    let runtime = &state.runtime;
    let metrics = runtime.metrics();
    metrics.request_received();

    let result = synthesize_wav(runtime, request).await;
    match result {
        Ok(response) => {
            metrics.request_completed();
            Ok(response)
        }
        Err(err) => {
            metrics.request_failed(error_kind(&err));
            if matches!(err, TtsError::ServiceUnavailable(_)) {
                metrics.request_rejected_shutdown();
            }
            if err.is_client_error() {
                warn!(error = %err, "TTS request rejected");
            } else {
                error!(error = %err, "TTS request failed");
            }
            Err(err.into())
        }
    }
}

async fn synthesize_wav(runtime: &TtsRuntime, request: TtsRequest) -> Result<Response, TtsError> {
    if runtime.is_shutting_down() {
        return Err(TtsError::unavailable("Server is shutting down"));
    }

    let start = Instant::now();
    let job = runtime.validate(request)?;
    let request_id = job.request_id;
    info!(
        request_id,
        role = %job.role(),
        speaker = job.voice.speaker(),
        speed = job.speed,
        "TTS request accepted"
    );

    let audio = runtime.synthesize(job).await?;
    let wav = encode_wav(&audio.pcm, audio.sample_rate)?;

    let wav_info = wav_header_info(&wav);
    info!(
        request_id,
        bytes = wav_info.bytes,
        riff_ok = wav_info.ok,
        channels = wav_info.channels,
        sample_rate = wav_info.sample_rate,
        bits_per_sample = wav_info.bits_per_sample,
        data_bytes = wav_info.data_bytes,
        duration_ms = audio.duration_ms() as u64,
        total_ms = start.elapsed().as_millis() as u64,
        "TTS response ready"
    );

    let sample_rate = HeaderValue::from(audio.sample_rate);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (header::HeaderName::from_static(SAMPLE_RATE_HEADER), sample_rate),
        ],
        wav,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (TtsError::invalid_request("bad"), StatusCode::BAD_REQUEST),
            (
                TtsError::unavailable("Server is shutting down"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (TtsError::inference("no audio"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                TtsError::artifact_unavailable("org/m", "offline"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                TtsError::engine_load("/tmp/m", "missing"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_error_message_is_passed_through() {
        let api = ApiError::from(TtsError::invalid_request(
            "ref_text is required for voice cloning",
        ));
        assert_eq!(api.message, "ref_text is required for voice cloning");
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(error_kind(&TtsError::inference("x")), "inference");
        assert_eq!(error_kind(&TtsError::config("x")), "internal");
    }
}
