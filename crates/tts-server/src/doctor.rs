//! Environment checks for the `doctor` subcommand.

use serde::Serialize;
use tracing::{error, info};

use runtime::ModelStatus;
use runtime::artifacts::model_status;
use tts_core::RuntimeConfig;

/// Findings of a doctor run.
#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub os: &'static str,
    pub arch: &'static str,
    pub backend: &'static str,
    pub runtime_dir: String,
    pub models_dir: String,
    pub hub_cache_dir: String,
    /// Runtime directories exist or could be created.
    pub dirs_ok: bool,
    pub models: Vec<ModelStatus>,
}

impl DoctorReport {
    pub fn passed(&self) -> bool {
        self.dirs_ok
    }
}

/// Inspect platform, directories and model availability without touching
/// the network.
pub fn run_doctor(config: &RuntimeConfig, backend: &'static str) -> DoctorReport {
    let paths = &config.paths;
    info!("Doctor checks starting");

    let dirs_ok = match paths.ensure_dirs() {
        Ok(()) => true,
        Err(e) => {
            error!(
                error = %e,
                runtime_dir = %paths.runtime_dir.display(),
                "Cannot prepare runtime directories"
            );
            false
        }
    };

    let models: Vec<ModelStatus> = config
        .models
        .entries()
        .map(|(role, model_id)| model_status(&paths.models_dir, role, model_id))
        .collect();

    for model in &models {
        info!(
            key = model.key,
            model_id = %model.model_id,
            complete = model.complete,
            "Model"
        );
    }

    let report = DoctorReport {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        backend,
        runtime_dir: paths.runtime_dir.display().to_string(),
        models_dir: paths.models_dir.display().to_string(),
        hub_cache_dir: paths.hub_cache_dir.display().to_string(),
        dirs_ok,
        models,
    };

    if report.passed() {
        info!("Doctor checks passed");
    } else {
        error!("Doctor checks failed");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doctor_reports_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::default().with_runtime_dir(dir.path().join("rt"));

        let report = run_doctor(&config, "tone");

        assert!(report.passed());
        assert_eq!(report.backend, "tone");
        assert_eq!(report.models.len(), 4);
        assert!(report.models.iter().all(|m| !m.complete));
        assert!(dir.path().join("rt/models").is_dir());
    }

    #[test]
    fn test_doctor_sees_complete_model_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::default().with_runtime_dir(dir.path());
        let location = config.paths.model_dir(&config.models.design);
        for file in runtime::artifacts::REQUIRED_FILES {
            let path = location.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"{}").unwrap();
        }

        let report = run_doctor(&config, "tone");

        let design = report.models.iter().find(|m| m.key == "design").unwrap();
        assert!(design.exists && design.complete);
        assert_eq!(report.models.iter().filter(|m| m.complete).count(), 1);
    }

    #[test]
    fn test_doctor_fails_on_unusable_runtime_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = RuntimeConfig::default().with_runtime_dir(blocker.join("rt"));

        let report = run_doctor(&config, "tone");

        assert!(!report.passed());
    }
}
