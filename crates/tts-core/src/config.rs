//! Configuration structures for the TTS server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TtsError, TtsResult};
use crate::types::{CustomModelSize, ModelRole};

/// Built-in voice presets of the CustomVoice models.
pub const DEFAULT_SPEAKERS: &[&str] = &[
    "Serena", "Vivian", "Uncle_Fu", "Ryan", "Aiden", "Ono_Anna", "Sohee", "Eric", "Dylan",
];

/// Hub repositories backing each model role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Small CustomVoice model (0.6B).
    #[serde(default = "default_custom_small")]
    pub custom_small: String,
    /// Large CustomVoice model (1.7B).
    #[serde(default = "default_custom_large")]
    pub custom_large: String,
    /// VoiceDesign model.
    #[serde(default = "default_design")]
    pub design: String,
    /// Base model used for voice cloning.
    #[serde(default = "default_clone")]
    pub clone: String,
}

fn default_custom_small() -> String {
    "Qwen/Qwen3-TTS-12Hz-0.6B-CustomVoice".to_string()
}

fn default_custom_large() -> String {
    "Qwen/Qwen3-TTS-12Hz-1.7B-CustomVoice".to_string()
}

fn default_design() -> String {
    "Qwen/Qwen3-TTS-12Hz-1.7B-VoiceDesign".to_string()
}

fn default_clone() -> String {
    "Qwen/Qwen3-TTS-12Hz-0.6B-Base".to_string()
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            custom_small: default_custom_small(),
            custom_large: default_custom_large(),
            design: default_design(),
            clone: default_clone(),
        }
    }
}

impl ModelCatalog {
    /// Repository id for a role.
    pub fn repo_id(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::CustomSmall => &self.custom_small,
            ModelRole::CustomLarge => &self.custom_large,
            ModelRole::Design => &self.design,
            ModelRole::Clone => &self.clone,
        }
    }

    /// All roles with their repository ids, in prefetch order.
    pub fn entries(&self) -> impl Iterator<Item = (ModelRole, &str)> + '_ {
        ModelRole::ALL.iter().map(|&role| (role, self.repo_id(role)))
    }

    /// Number of required models.
    pub fn len(&self) -> usize {
        ModelRole::ALL.len()
    }

    /// Always false: the catalog has a fixed set of roles.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// On-disk layout of the runtime directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePaths {
    /// Root for everything the server writes.
    pub runtime_dir: PathBuf,
    /// Directory holding one sub-directory per model repository.
    pub models_dir: PathBuf,
    /// Hub download cache.
    pub hub_cache_dir: PathBuf,
}

impl StoragePaths {
    /// Derive the standard layout under a runtime directory.
    pub fn under(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            models_dir: runtime_dir.join("models"),
            hub_cache_dir: runtime_dir.join("hf-cache"),
            runtime_dir,
        }
    }

    /// Location of the manifest written after a successful prefetch.
    pub fn manifest_path(&self) -> PathBuf {
        self.runtime_dir.join("model_manifest.json")
    }

    /// Create all runtime directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.runtime_dir, &self.models_dir, &self.hub_cache_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Local directory for a model repository.
    pub fn model_dir(&self, repo_id: &str) -> PathBuf {
        model_dir_under(&self.models_dir, repo_id)
    }
}

/// Map a repository id to its directory under `models_dir`.
///
/// `org/name` becomes `org--name` so that every repository is a single
/// directory level.
pub fn model_dir_under(models_dir: &Path, repo_id: &str) -> PathBuf {
    models_dir.join(repo_id.replace('/', "--"))
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::under(default_runtime_dir())
    }
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".runtime")
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model catalog.
    #[serde(default)]
    pub models: ModelCatalog,

    /// Runtime directories.
    #[serde(default)]
    pub paths: StoragePaths,

    /// Speaker used when a request names none.
    #[serde(default = "default_speaker")]
    pub default_speaker: String,

    /// CustomVoice size used when a request names none.
    #[serde(default)]
    pub default_custom_model_size: CustomModelSize,

    /// Ceiling for waiting on in-flight synthesis during shutdown.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: f64,
}

fn default_speaker() -> String {
    "Vivian".to_string()
}

fn default_drain_timeout_secs() -> f64 {
    30.0
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            models: ModelCatalog::default(),
            paths: StoragePaths::default(),
            default_speaker: default_speaker(),
            default_custom_model_size: CustomModelSize::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Drain ceiling as a duration. Fails for negative, non-finite or
    /// unrepresentable values.
    pub fn drain_timeout(&self) -> TtsResult<Duration> {
        Duration::try_from_secs_f64(self.drain_timeout_secs).map_err(|e| {
            TtsError::config(format!(
                "invalid drain timeout {}: {e}",
                self.drain_timeout_secs
            ))
        })
    }

    /// Set the runtime directory, re-deriving the layout below it.
    pub fn with_runtime_dir(mut self, runtime_dir: impl Into<PathBuf>) -> Self {
        self.paths = StoragePaths::under(runtime_dir);
        self
    }

    /// Set the drain ceiling.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_secs = timeout.as_secs_f64();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_speaker, "Vivian");
        assert_eq!(config.default_custom_model_size, CustomModelSize::Small);
        assert_eq!(config.drain_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.paths.models_dir, PathBuf::from(".runtime/models"));
    }

    #[test]
    fn test_unusable_drain_timeout_is_a_config_error() {
        for secs in [f64::INFINITY, f64::NAN, -1.0, 1e300] {
            let config = RuntimeConfig {
                drain_timeout_secs: secs,
                ..RuntimeConfig::default()
            };
            assert!(matches!(config.drain_timeout(), Err(TtsError::Config(_))));
        }

        let config = RuntimeConfig::default().with_drain_timeout(Duration::from_millis(50));
        assert_eq!(config.drain_timeout().unwrap(), Duration::from_millis(50));
    }

    #[test]
    fn test_catalog_order_is_stable() {
        let catalog = ModelCatalog::default();
        let roles: Vec<_> = catalog.entries().map(|(role, _)| role.key()).collect();
        assert_eq!(roles, ["custom_small", "custom_large", "design", "clone"]);
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_model_dir_mapping() {
        let paths = StoragePaths::under("/srv/tts");
        assert_eq!(
            paths.model_dir("Qwen/Qwen3-TTS-12Hz-0.6B-Base"),
            PathBuf::from("/srv/tts/models/Qwen--Qwen3-TTS-12Hz-0.6B-Base")
        );
        assert_eq!(
            paths.manifest_path(),
            PathBuf::from("/srv/tts/model_manifest.json")
        );
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"models": {"design": "me/design"}, "drain_timeout_secs": 5}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.models.design, "me/design");
        assert_eq!(config.models.clone, default_clone());
        assert_eq!(config.drain_timeout_secs, 5.0);
    }
}
