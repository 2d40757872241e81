//! Local TTS server.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use runtime::logging::{LogFormat, init_logging};
use runtime::{HfHubClient, ServerMetrics, ToneEngineLoader, TtsRuntime};
use tts_core::{CustomModelSize, EngineLoader, ModelCatalog, RuntimeConfig, StoragePaths};
use tts_server::doctor::run_doctor;
use tts_server::server::DEFAULT_MAX_BODY_BYTES;
use tts_server::{ServerConfig, TtsServer};

/// Local text-to-speech server
#[derive(Debug, Parser)]
#[command(name = "tts-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level
    #[arg(short, long, global = true, env = "TTS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text or json)
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Also write rotating service and error logs to this directory
    #[arg(long, global = true, env = "TTS_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    runtime: RuntimeArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prefetch models and start the HTTP server
    Serve {
        #[arg(long, env = "TTS_HOST", default_value = "127.0.0.1")]
        host: IpAddr,

        #[arg(long, env = "TTS_PORT", default_value_t = 9872)]
        port: u16,

        /// Disable the /metrics endpoint
        #[arg(long)]
        no_metrics: bool,

        /// Largest accepted request body in bytes
        #[arg(long, env = "TTS_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
        max_body_bytes: usize,
    },
    /// Download all required models and exit
    Prefetch,
    /// Check the local environment and model availability
    Doctor,
}

#[derive(Debug, Args)]
struct RuntimeArgs {
    /// Directory for models, hub cache and the manifest
    #[arg(long, global = true, env = "TTS_RUNTIME_DIR", default_value = ".runtime")]
    runtime_dir: PathBuf,

    #[arg(long, global = true, env = "TTS_MODEL_CUSTOM_SMALL")]
    model_custom_small: Option<String>,

    #[arg(long, global = true, env = "TTS_MODEL_CUSTOM_LARGE")]
    model_custom_large: Option<String>,

    #[arg(long, global = true, env = "TTS_MODEL_DESIGN")]
    model_design: Option<String>,

    #[arg(long, global = true, env = "TTS_MODEL_CLONE")]
    model_clone: Option<String>,

    /// CustomVoice size used when a request names none (0.6b or 1.7b)
    #[arg(long, global = true, env = "TTS_DEFAULT_CUSTOM_SIZE", default_value = "0.6b")]
    default_custom_size: CustomModelSize,

    #[arg(long, global = true, env = "TTS_DEFAULT_SPEAKER", default_value = "Vivian")]
    default_speaker: String,

    /// Seconds to wait for in-flight synthesis on shutdown
    #[arg(
        long,
        global = true,
        env = "TTS_DRAIN_TIMEOUT_SECS",
        default_value_t = 30.0,
        value_parser = parse_timeout_secs
    )]
    drain_timeout_secs: f64,

    /// Hugging Face access token
    #[arg(long, global = true, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,
}

/// A finite, non-negative number of seconds that fits in a `Duration`.
fn parse_timeout_secs(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.trim().parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs)
        .map(|_| secs)
        .map_err(|e| format!("{raw} is not a usable timeout: {e}"))
}

impl RuntimeArgs {
    fn to_config(&self) -> RuntimeConfig {
        let defaults = ModelCatalog::default();
        RuntimeConfig {
            models: ModelCatalog {
                custom_small: self
                    .model_custom_small
                    .clone()
                    .unwrap_or(defaults.custom_small),
                custom_large: self
                    .model_custom_large
                    .clone()
                    .unwrap_or(defaults.custom_large),
                design: self.model_design.clone().unwrap_or(defaults.design),
                clone: self.model_clone.clone().unwrap_or(defaults.clone),
            },
            paths: StoragePaths::under(&self.runtime_dir),
            default_speaker: self.default_speaker.clone(),
            default_custom_model_size: self.default_custom_size,
            drain_timeout_secs: self.drain_timeout_secs,
        }
    }
}

fn build_runtime(
    config: RuntimeConfig,
    hf_token: Option<String>,
    metrics: ServerMetrics,
) -> Result<Arc<TtsRuntime>> {
    config
        .paths
        .ensure_dirs()
        .context("Failed to create runtime directories")?;
    let hub = HfHubClient::new(&config.paths.hub_cache_dir, hf_token)
        .context("Failed to create hub client")?;
    let runtime = TtsRuntime::new(config, Arc::new(hub), Arc::new(ToneEngineLoader), metrics)
        .context("Failed to initialize runtime")?;
    Ok(Arc::new(runtime))
}

async fn serve(args: &RuntimeArgs, server_config: ServerConfig, no_metrics: bool) -> Result<()> {
    let config = args.to_config();
    let (metrics, handle) = if no_metrics {
        (ServerMetrics::init_noop(), None)
    } else {
        let (metrics, handle) = ServerMetrics::install().context("Failed to install metrics")?;
        (metrics, Some(handle))
    };

    let runtime = build_runtime(config, args.hf_token.clone(), metrics)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_addr = %server_config.http_addr,
        backend = runtime.backend_name(),
        "Starting TTS server"
    );

    TtsServer::new(server_config, runtime, handle)
        .run()
        .await
        .context("Server failed")?;

    info!("Server shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_format, cli.log_dir.as_deref())
        .context("Failed to initialize logging")?;

    match cli.command {
        Command::Serve {
            host,
            port,
            no_metrics,
            max_body_bytes,
        } => {
            let server_config = ServerConfig {
                http_addr: SocketAddr::new(host, port),
                max_body_bytes,
                ..ServerConfig::default()
            };
            serve(&cli.runtime, server_config, no_metrics).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Prefetch => {
            let config = cli.runtime.to_config();
            let runtime =
                build_runtime(config, cli.runtime.hf_token.clone(), ServerMetrics::init_noop())?;
            runtime.prefetch().await.context("Prefetch failed")?;
            info!("Prefetch complete");
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor => {
            let config = cli.runtime.to_config();
            let report = run_doctor(&config, ToneEngineLoader.name());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_parser_rejects_unusable_values() {
        assert_eq!(parse_timeout_secs("2.5"), Ok(2.5));
        assert_eq!(parse_timeout_secs("0"), Ok(0.0));
        for raw in ["inf", "NaN", "-1", "1e300", "soon"] {
            assert!(parse_timeout_secs(raw).is_err(), "{raw} accepted");
        }
    }

    #[test]
    fn test_cli_rejects_infinite_drain_timeout() {
        let parsed = Cli::try_parse_from(["tts-server", "--drain-timeout-secs", "inf", "doctor"]);
        assert!(parsed.is_err());
    }
}
