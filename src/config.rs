//! Process bootstrap configuration, read once at startup.
//!
//! Everything an operator can change at runtime lives in [`crate::settings`]
//! instead (persisted JSON, hot-reloadable). This module only holds what the
//! process needs before it can even open its settings file: where the data
//! directory is and the bind address to fall back on until settings load.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Bootstrap configuration, sourced entirely from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding the JSON-file-backed stores (accounts, api keys,
    /// settings, secrets, OAuth sessions). Created on first run.
    pub data_dir: PathBuf,
    /// Bind host. Overridden by `settings.host` once the settings store
    /// loads; this is only the value used to bring the listener up.
    pub host: String,
    pub port: u16,
}

impl GatewayConfig {
    /// Load configuration from environment variables:
    /// - `KIRO_DATA_DIR` — defaults to `.kiro-gateway`.
    /// - `KIRO_HOST` — defaults to `0.0.0.0`.
    /// - `KIRO_PORT` — defaults to `9091` (see settings §`port`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("KIRO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".kiro-gateway"));

        let host = std::env::var("KIRO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = match std::env::var("KIRO_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("KIRO_PORT".to_string(), raw))?,
            Err(_) => 9091,
        };

        Ok(Self {
            data_dir,
            host,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        std::env::remove_var("KIRO_DATA_DIR");
        std::env::remove_var("KIRO_HOST");
        std::env::remove_var("KIRO_PORT");
        let cfg = GatewayConfig::from_env().unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9091);
    }
}
