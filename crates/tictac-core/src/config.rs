//! Protocol runtime configuration
//!
//! Defaults can be overridden from a TOML or JSON file and then from
//! `TICTAC_*` environment variables, in that order.

use crate::errors::{Result, TictacError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "TICTAC_";

/// Timeouts and queue sizing for sessions and finality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Per-counter-party bound on one PROPOSE round trip
    pub session_timeout_ms: u64,
    /// Bound on one FINALIZE delivery
    pub finality_timeout_ms: u64,
    /// Inbound envelope buffer per participant
    pub responder_queue_depth: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 30_000,
            finality_timeout_ms: 30_000,
            responder_queue_depth: 64,
        }
    }
}

impl ProtocolConfig {
    /// Config with a shared timeout for sessions and finality
    pub fn with_timeout(timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        Self {
            session_timeout_ms: ms,
            finality_timeout_ms: ms,
            ..Self::default()
        }
    }

    /// Session round-trip timeout
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Finality delivery timeout
    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }

    /// Load configuration from a `.toml` or `.json` file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TictacError::config(format!("Failed to read config file: {e}")))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| TictacError::config(format!("Invalid TOML: {e}")))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| TictacError::config(format!("Invalid JSON: {e}")))?,
            _ => return Err(TictacError::config("Unsupported file format")),
        };
        config.validate()?;
        debug!(path = %path.display(), "Loaded protocol config");
        Ok(config)
    }

    /// Apply `TICTAC_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `TICTAC_*` overrides from an explicit variable set.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "SESSION_TIMEOUT_MS" => self.session_timeout_ms = parse_var(name, value)?,
                "FINALITY_TIMEOUT_MS" => self.finality_timeout_ms = parse_var(name, value)?,
                "RESPONDER_QUEUE_DEPTH" => self.responder_queue_depth = parse_var(name, value)?,
                _ => continue,
            }
            debug!(variable = %key.as_ref(), "Applied config override");
        }
        self.validate()
    }

    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_ms == 0 {
            return Err(TictacError::config("session_timeout_ms must be positive"));
        }
        if self.finality_timeout_ms == 0 {
            return Err(TictacError::config("finality_timeout_ms must be positive"));
        }
        if self.responder_queue_depth == 0 {
            return Err(TictacError::config("responder_queue_depth must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TictacError::config(format!("Invalid value in {ENV_PREFIX}{name}: {value}")))
}
