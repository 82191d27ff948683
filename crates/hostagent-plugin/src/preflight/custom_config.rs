//! Custom configuration carried by a Start request.

use std::path::Path;

use prost_types::value::Kind;
use tracing::{debug, info};

use super::PreflightError;

/// User configuration supplied with Start.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomConfig {
    /// YAML text, written verbatim.
    Text(String),
    /// Structured config, converted to YAML before writing.
    Structured(prost_types::Struct),
}

impl CustomConfig {
    /// YAML document to write, or `None` for an empty payload.
    pub fn render(&self) -> Result<Option<String>, PreflightError> {
        match self {
            Self::Text(text) if text.is_empty() => Ok(None),
            Self::Text(text) => Ok(Some(text.clone())),
            Self::Structured(s) if s.fields.is_empty() => Ok(None),
            Self::Structured(s) => serde_yaml::to_string(&struct_to_json(s))
                .map(Some)
                .map_err(|e| PreflightError::ConfigRender(e.to_string())),
        }
    }
}

/// Write `config` to `path`, creating parent directories.
///
/// `None` or an empty payload leaves any existing file untouched.
pub async fn write_custom_config(
    config: Option<&CustomConfig>,
    path: &Path,
) -> Result<(), PreflightError> {
    let Some(yaml) = config.map(CustomConfig::render).transpose()?.flatten() else {
        debug!(path = %path.display(), "No custom config supplied, keeping existing file");
        return Ok(());
    };

    let write_err = |e: std::io::Error| PreflightError::ConfigWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, yaml.as_bytes())
        .await
        .map_err(write_err)?;
    info!(path = %path.display(), bytes = yaml.len(), "Wrote custom config");
    Ok(())
}

fn struct_to_json(s: &prost_types::Struct) -> serde_json::Value {
    serde_json::Value::Object(
        s.fields
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

fn value_to_json(value: &prost_types::Value) -> serde_json::Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::NumberValue(n)) => number_to_json(*n),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::StructValue(s)) => struct_to_json(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(value_to_json).collect())
        }
    }
}

/// Struct numbers are all doubles; integral ones are written as integers so
/// ports and counts do not turn into `8080.0`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}
