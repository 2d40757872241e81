//! Structured logging setup with tracing.
//!
//! Console output follows `--log-level`/`RUST_LOG`. With a log directory the
//! same events also go to two daily-rotated files: a DEBUG service log and an
//! ERROR-only log.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};
use tts_core::{TtsError, TtsResult};

/// Directives appended to every filter so HTTP internals stay quiet.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "h2=warn", "ureq=warn", "rustls=warn"];

pub const SERVICE_LOG_PREFIX: &str = "tts_server";
pub const ERROR_LOG_PREFIX: &str = "tts_server.error";
const SERVICE_LOG_RETENTION: usize = 14;
const ERROR_LOG_RETENTION: usize = 30;

type BoxedLayer = Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>;

/// Logging format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text format.
    #[default]
    Text,
    /// JSON format for structured logging.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

/// Keeps the file writers alive. Dropping it flushes and stops file logging.
#[must_use = "file logging stops when the guard is dropped"]
#[derive(Debug)]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
    installed: bool,
}

impl LogGuard {
    /// False when another subscriber was already installed.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

fn with_quiet_dependencies(mut filter: EnvFilter) -> EnvFilter {
    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn build_filter(level: &str) -> EnvFilter {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    with_quiet_dependencies(filter)
}

fn console_layer(level: &str, format: LogFormat) -> BoxedLayer {
    let output = match format {
        LogFormat::Text => fmt::layer()
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_thread_ids(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };
    output.with_filter(build_filter(level)).boxed()
}

fn rolling_appender(dir: &Path, prefix: &str, keep: usize) -> TtsResult<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(keep)
        .build(dir)
        .map_err(|e| TtsError::config(format!("cannot open log file in {}: {e}", dir.display())))
}

/// Service log at DEBUG and error log at ERROR, both under `dir`.
fn file_layers(dir: &Path) -> TtsResult<(Vec<BoxedLayer>, Vec<WorkerGuard>)> {
    std::fs::create_dir_all(dir)?;

    let (service, service_guard) = tracing_appender::non_blocking(rolling_appender(
        dir,
        SERVICE_LOG_PREFIX,
        SERVICE_LOG_RETENTION,
    )?);
    let (errors, error_guard) = tracing_appender::non_blocking(rolling_appender(
        dir,
        ERROR_LOG_PREFIX,
        ERROR_LOG_RETENTION,
    )?);

    let layers = vec![
        fmt::layer()
            .with_ansi(false)
            .with_writer(service)
            .with_filter(with_quiet_dependencies(EnvFilter::new("debug")))
            .boxed(),
        fmt::layer()
            .with_ansi(false)
            .with_writer(errors)
            .with_filter(LevelFilter::ERROR)
            .boxed(),
    ];
    Ok((layers, vec![service_guard, error_guard]))
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `level` for the console. A
/// second call leaves the first subscriber in place and reports
/// `installed() == false`.
///
/// # Example
/// ```ignore
/// use runtime::logging::{init_logging, LogFormat};
/// let _guard = init_logging("info", LogFormat::Text, None)?;
/// ```
pub fn init_logging(level: &str, format: LogFormat, log_dir: Option<&Path>) -> TtsResult<LogGuard> {
    let mut layers = vec![console_layer(level, format)];
    let mut workers = Vec::new();
    if let Some(dir) = log_dir {
        let (files, guards) = file_layers(dir)?;
        layers.extend(files);
        workers = guards;
    }

    let installed = tracing_subscriber::registry().with(layers).try_init().is_ok();
    Ok(LogGuard {
        _workers: workers,
        installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_log(dir: &Path, prefix: &str) -> String {
        let entry = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.') && !rest.starts_with(".error"))
            })
            .unwrap();
        fs::read_to_string(entry.path()).unwrap()
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_quiet_directives_parse() {
        let filter = build_filter("DEBUG");
        assert!(filter.to_string().contains("hyper=warn"));
    }

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let _first = init_logging("debug", LogFormat::Text, None).unwrap();
        let second = init_logging("info", LogFormat::Json, None).unwrap();
        assert!(!second.installed());
        tracing::info!("logging initialized");
    }

    #[test]
    fn test_error_log_only_receives_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (layers, guards) = file_layers(dir.path()).unwrap();

        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("model cache warmed");
            tracing::error!("engine crashed");
        });
        drop(guards);

        let service = read_log(dir.path(), SERVICE_LOG_PREFIX);
        assert!(service.contains("model cache warmed"));
        assert!(service.contains("engine crashed"));

        let errors = read_log(dir.path(), ERROR_LOG_PREFIX);
        assert!(errors.contains("engine crashed"));
        assert!(!errors.contains("model cache warmed"));
    }
}
