//! Unified error types for the TTS server.

use std::path::PathBuf;

/// Main error type for TTS operations.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// Model artifacts could not be fetched or are still incomplete after a fetch.
    #[error("artifacts unavailable for {model_id}: {reason}")]
    ArtifactUnavailable { model_id: String, reason: String },

    /// Engine loading error.
    #[error("model load failed for {path}: {reason}")]
    EngineLoad { path: PathBuf, reason: String },

    /// The request is missing mode-specific fields or carries invalid values.
    #[error("{0}")]
    InvalidRequest(String),

    /// Engine inference error, including an engine that produced no audio.
    #[error("inference error: {0}")]
    Inference(String),

    /// The server is shutting down and accepts no new work.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with TtsError.
pub type TtsResult<T> = Result<T, TtsError>;

impl TtsError {
    /// Create an artifact error for a model repository.
    pub fn artifact_unavailable(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArtifactUnavailable {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an engine load error for a model location.
    pub fn engine_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::EngineLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error with message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an inference error with message.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a service-unavailable error with message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error was caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TtsError::invalid_request("ref_text is required for voice cloning");
        assert_eq!(err.to_string(), "ref_text is required for voice cloning");

        let err = TtsError::artifact_unavailable("org/model", "download incomplete");
        assert_eq!(
            err.to_string(),
            "artifacts unavailable for org/model: download incomplete"
        );

        let err = TtsError::engine_load("/models/x", "model path is missing");
        assert_eq!(
            err.to_string(),
            "model load failed for /models/x: model path is missing"
        );
    }

    #[test]
    fn test_error_constructors() {
        let err = TtsError::inference("engine returned no audio");
        assert!(matches!(err, TtsError::Inference(_)));

        let err = TtsError::unavailable("Server is shutting down");
        assert!(matches!(err, TtsError::ServiceUnavailable(_)));
        assert!(!err.is_client_error());

        assert!(TtsError::invalid_request("x").is_client_error());
    }
}
