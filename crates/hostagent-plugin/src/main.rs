//! Hostagent Plugin
//!
//! Launched by the host plugin manager. Serves the plugin lifecycle API and
//! supervises the telemetry subagents once told to Start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use hostagent_core::config::load_config;
use hostagent_core::tracing_init::init_tracing;
use hostagent_plugin::runner::{ProcessRunner, platform_isolation};
use hostagent_plugin::server::{PluginServer, ServerConfig};
use hostagent_plugin::service::LifecycleService;
use hostagent_plugin::signals::ShutdownSignals;

/// Extra time on top of the runner's terminate timeout for groups to unwind.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "hostagent-plugin")]
#[command(version, about = "hostagent plugin - telemetry subagent supervisor")]
struct Args {
    /// Transport the plugin manager connects over
    #[arg(long, default_value = "tcp", env = "HOSTAGENT_PROTOCOL", value_parser = ["tcp", "unix"])]
    protocol: String,

    /// Address to listen on: host:port for tcp, a socket path for unix
    #[arg(long, default_value = "127.0.0.1:1234", env = "HOSTAGENT_ADDRESS")]
    address: String,

    /// File that receives warnings and errors in addition to stderr
    #[arg(long, env = "HOSTAGENT_ERROR_LOG_FILE")]
    errorlogfile: Option<PathBuf>,

    /// JSON settings file overriding built-in defaults
    #[arg(long, env = "HOSTAGENT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log level filter for the plugin (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "HOSTAGENT_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "HOSTAGENT_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("hostagent_plugin={}", args.log_level);
    init_tracing(&log_filter, args.log_json, args.errorlogfile.as_deref())?;

    let config = load_config(args.settings.as_deref())?;
    let server_config = ServerConfig::from_protocol(&args.protocol, &args.address)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol = %args.protocol,
        address = %args.address,
        isolation = platform_isolation().name(),
        max_consecutive_failures = config.supervisor.max_consecutive_failures,
        restart_backoff_ms = config.supervisor.restart_backoff_ms,
        "Starting hostagent-plugin"
    );

    let runner = Arc::new(ProcessRunner::new());
    let shutdown_grace = runner.terminate_timeout() + SHUTDOWN_MARGIN;
    let service = LifecycleService::new(&config, runner);
    let server = PluginServer::new(server_config, service.clone());
    let mut signals = ShutdownSignals::install()?;

    tokio::select! {
        result = server.serve() => {
            result?;
        }
        signal = signals.recv() => {
            warn!(signal, "Received termination signal, stopping subagents");
            if !service.shutdown(&format!("received {signal}"), shutdown_grace).await {
                warn!("Exiting with subagents still running");
            }
        }
    }

    info!("Plugin stopped");
    Ok(())
}
