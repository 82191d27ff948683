//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter, optional JSON output and
//! an optional error log file that receives WARN and above.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"hostagent_plugin=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
/// * `error_log` -- when set, WARN and ERROR events are also appended to this
///   file regardless of the env-filter.
pub fn init_tracing(default_filter: &str, log_json: bool, error_log: Option<&Path>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_filter(env_filter))
            .with(error_log.map(error_file_layer).transpose()?)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
            .with(error_log.map(error_file_layer).transpose()?)
            .init();
    }
    Ok(())
}

fn error_file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = open_error_log(path)?;
    Ok(tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::WARN))
}

fn open_error_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Logging(format!("cannot open {}: {e}", path.display())))
}
