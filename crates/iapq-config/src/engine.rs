//! Typed engine settings read from the merged configuration.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the engine and its binaries read from configuration.
///
/// Missing keys take their defaults; keys present with the wrong type are an
/// error rather than a silent default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Answer for store-initiated payments when the caller installed no
    /// predicate.
    pub allow_store_payments: bool,
    pub restore_atomically: bool,
    /// Opaque account hint forwarded with restore requests.
    pub restore_app_user_name: Option<String>,
    pub completions_atomically: bool,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_store_payments: false,
            restore_atomically: true,
            restore_app_user_name: None,
            completions_atomically: false,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();

        let log_filter = opt_str(cfg, "/logging/filter")?
            .map(str::to_string)
            .unwrap_or(d.log_filter);
        if log_filter.trim().is_empty() {
            return Err(anyhow!("logging.filter must not be empty"));
        }

        let restore_app_user_name = match opt_str(cfg, "/restore/app_user_name")? {
            Some(s) if s.trim().is_empty() => None,
            other => other.map(str::to_string),
        };

        Ok(Self {
            allow_store_payments: opt_bool(cfg, "/engine/allow_store_payments")?
                .unwrap_or(d.allow_store_payments),
            restore_atomically: opt_bool(cfg, "/restore/atomically")?
                .unwrap_or(d.restore_atomically),
            restore_app_user_name,
            completions_atomically: opt_bool(cfg, "/completions/atomically")?
                .unwrap_or(d.completions_atomically),
            log_filter,
        })
    }
}

fn opt_bool(cfg: &Value, ptr: &str) -> Result<Option<bool>> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(anyhow!("{ptr} must be a boolean (got {other})")),
    }
}

fn opt_str<'a>(cfg: &'a Value, ptr: &str) -> Result<Option<&'a str>> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(anyhow!("{ptr} must be a string (got {other})")),
    }
}
