//! # tts-server
//!
//! HTTP server for local text-to-speech.
//!
//! Provides:
//! - Startup status, prefetch and capability endpoints
//! - Serialized WAV synthesis at `POST /tts`
//! - Health, readiness and Prometheus metrics endpoints
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded drain

pub mod doctor;
pub mod server;
pub mod service;

pub use server::{ServerConfig, TtsServer, router};
pub use service::{ApiError, ApiJson, AppState};
