//! Local model artifact store backed by the Hugging Face Hub.

use glob::Pattern;
use hf_hub::api::sync::{Api, ApiBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tts_core::config::model_dir_under;
use tts_core::{HubClient, ModelRole, TtsError, TtsResult};

/// Files that must exist under a model directory for it to be usable.
pub const REQUIRED_FILES: [&str; 5] = [
    "config.json",
    "model.safetensors",
    "tokenizer_config.json",
    "speech_tokenizer/config.json",
    "speech_tokenizer/model.safetensors",
];

/// Repository files worth downloading; everything else is skipped.
pub const ALLOW_PATTERNS: [&str; 17] = [
    "*.json",
    "*.safetensors",
    "*.py",
    "*.model",
    "*.tiktoken",
    "*.txt",
    "*.jsonl",
    "*.yaml",
    "*.wav",
    "*.pth",
    "*.npz",
    "*.bin",
    "*.md",
    "*tokenizer*",
    "speech_tokenizer/*",
    "speech_tokenizer/*.json",
    "speech_tokenizer/*.safetensors",
];

/// Availability of one configured model on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub key: &'static str,
    pub model_id: String,
    pub local_dir: String,
    /// The model directory exists.
    pub exists: bool,
    /// Every required file is present.
    pub complete: bool,
}

/// On-disk availability of `model_id` under `models_dir`. Never fetches.
pub fn model_status(models_dir: &Path, role: ModelRole, model_id: &str) -> ModelStatus {
    let location = model_dir_under(models_dir, model_id);
    ModelStatus {
        key: role.key(),
        model_id: model_id.to_string(),
        local_dir: location.display().to_string(),
        exists: location.exists(),
        complete: ArtifactStore::missing_files(&location).is_empty(),
    }
}

/// Maps model identifiers to local directories and fills them on demand.
pub struct ArtifactStore {
    models_dir: PathBuf,
    hub: Arc<dyn HubClient>,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>, hub: Arc<dyn HubClient>) -> Self {
        Self {
            models_dir: models_dir.into(),
            hub,
        }
    }

    /// Directory a model lives in. Deterministic and unique per identifier.
    pub fn location(&self, model_id: &str) -> PathBuf {
        model_dir_under(&self.models_dir, model_id)
    }

    /// Required files absent from `location`.
    pub fn missing_files(location: &Path) -> Vec<&'static str> {
        REQUIRED_FILES
            .iter()
            .copied()
            .filter(|file| !location.join(file).is_file())
            .collect()
    }

    pub fn is_complete(&self, model_id: &str) -> bool {
        Self::missing_files(&self.location(model_id)).is_empty()
    }

    pub fn status(&self, role: ModelRole, model_id: &str) -> ModelStatus {
        model_status(&self.models_dir, role, model_id)
    }

    /// Make sure the model's required files are on disk, downloading if not.
    ///
    /// A complete directory is returned without touching the network.
    pub fn ensure_local(&self, role: ModelRole, model_id: &str) -> TtsResult<PathBuf> {
        let location = self.location(model_id);
        fs::create_dir_all(&location)?;

        if Self::missing_files(&location).is_empty() {
            info!(model_id, local_dir = %location.display(), "Model already present");
            return Ok(location);
        }

        info!(
            key = role.key(),
            model_id,
            local_dir = %location.display(),
            "Downloading model"
        );
        let start = Instant::now();
        self.hub.fetch(model_id, &location, &ALLOW_PATTERNS)?;

        let missing = Self::missing_files(&location);
        if !missing.is_empty() {
            return Err(TtsError::artifact_unavailable(
                model_id,
                format!(
                    "download incomplete at {}: missing {}",
                    location.display(),
                    missing.join(", ")
                ),
            ));
        }

        info!(
            model_id,
            took_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
            local_dir = %location.display(),
            "Downloaded model"
        );
        Ok(location)
    }
}

/// True when a repository file name matches any allow pattern.
pub fn is_allowed(file_name: &str, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| p.matches(file_name))
}

/// Hub client that downloads through the shared Hugging Face cache and copies
/// matching files into the model directory.
pub struct HfHubClient {
    api: Api,
}

impl HfHubClient {
    pub fn new(cache_dir: &Path, token: Option<String>) -> TtsResult<Self> {
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_token(token)
            .with_progress(false)
            .build()
            .map_err(|e| TtsError::config(format!("failed to build hub client: {e}")))?;
        Ok(Self { api })
    }
}

impl HubClient for HfHubClient {
    fn fetch(&self, repo_id: &str, dest: &Path, allow_patterns: &[&str]) -> TtsResult<()> {
        let patterns = allow_patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TtsError::internal(format!("bad allow pattern: {e}")))?;

        let repo = self.api.model(repo_id.to_string());
        let info = repo
            .info()
            .map_err(|e| TtsError::artifact_unavailable(repo_id, e.to_string()))?;

        for sibling in info.siblings {
            let name = sibling.rfilename;
            if !is_allowed(&name, &patterns) {
                debug!(repo_id, file = %name, "Skipping file");
                continue;
            }

            let cached = repo
                .get(&name)
                .map_err(|e| TtsError::artifact_unavailable(repo_id, format!("{name}: {e}")))?;
            let target = dest.join(&name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&cached, &target)?;
            debug!(repo_id, file = %name, "Fetched file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct WritingHub {
        calls: AtomicUsize,
        files: Vec<&'static str>,
    }

    impl HubClient for WritingHub {
        fn fetch(&self, _repo_id: &str, dest: &Path, _allow: &[&str]) -> TtsResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for file in &self.files {
                let path = dest.join(file);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, b"{}")?;
            }
            Ok(())
        }
    }

    fn store(files: Vec<&'static str>) -> (tempfile::TempDir, Arc<WritingHub>, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(WritingHub {
            calls: AtomicUsize::new(0),
            files,
        });
        let store = ArtifactStore::new(dir.path().join("models"), hub.clone());
        (dir, hub, store)
    }

    #[test]
    fn test_location_is_unique_per_id() {
        let (_dir, _hub, store) = store(vec![]);
        let a = store.location("org/model-a");
        let b = store.location("org/model-b");
        assert_ne!(a, b);
        assert_eq!(a, store.location("org/model-a"));
    }

    #[test]
    fn test_ensure_local_downloads_once() {
        let (_dir, hub, store) = store(REQUIRED_FILES.to_vec());

        let first = store.ensure_local(ModelRole::Design, "org/design").unwrap();
        let second = store.ensure_local(ModelRole::Design, "org/design").unwrap();

        assert_eq!(first, second);
        assert!(store.is_complete("org/design"));
        assert_eq!(hub.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_incomplete_download_is_an_error() {
        let (_dir, _hub, store) = store(vec!["config.json"]);

        let err = store
            .ensure_local(ModelRole::Clone, "org/clone")
            .unwrap_err();
        assert!(matches!(err, TtsError::ArtifactUnavailable { .. }));
        assert!(err.to_string().contains("model.safetensors"));
    }

    #[test]
    fn test_status_reports_presence() {
        let (_dir, _hub, store) = store(REQUIRED_FILES.to_vec());
        let before = store.status(ModelRole::CustomSmall, "org/small");
        assert!(!before.exists);
        assert!(!before.complete);

        store.ensure_local(ModelRole::CustomSmall, "org/small").unwrap();
        let after = store.status(ModelRole::CustomSmall, "org/small");
        assert!(after.exists);
        assert!(after.complete);
        assert_eq!(after.key, "custom_small");
    }

    #[test]
    fn test_allow_patterns() {
        let patterns: Vec<Pattern> = ALLOW_PATTERNS
            .iter()
            .map(|p| Pattern::new(p).unwrap())
            .collect();
        assert!(is_allowed("config.json", &patterns));
        assert!(is_allowed("speech_tokenizer/model.safetensors", &patterns));
        assert!(is_allowed("vocab_tokenizer.data", &patterns));
        assert!(!is_allowed("model.gguf", &patterns));
        assert!(!is_allowed(".gitattributes", &patterns));
    }
}
