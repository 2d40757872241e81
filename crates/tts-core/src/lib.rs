//! # tts-core
//!
//! Core types, traits, and error definitions for the local TTS server.
//!
//! This crate provides the foundational abstractions used across all other crates
//! in the workspace, including:
//!
//! - Model roles and the catalog that resolves them to hub repositories
//! - The synthesis request payload and its validated form (`SynthesisJob`)
//! - Trait definitions for the external collaborators (hub, engine)
//! - Unified error handling via `TtsError`
//! - Configuration structures

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{DEFAULT_SPEAKERS, ModelCatalog, RuntimeConfig, StoragePaths};
pub use error::{TtsError, TtsResult};
pub use traits::{EngineLoader, GenerateRequest, HubClient, SpeechEngine};
pub use types::{
    AudioChunk, CustomModelSize, ModelRole, ReferenceAudio, RequestMode, SamplingParams,
    SynthesisJob, TtsRequest, VoiceMode,
};
