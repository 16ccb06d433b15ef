use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::module::ExportNames;

/// Settings for one engine client and the worker it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Location of the engine binary. Required by the wasm runtime.
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    /// Search level handed to the engine on every request. Not clamped.
    #[serde(default = "default_level")]
    pub level: i32,
    /// Upper bound on the wait for the module's ready signal.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Default caller-side timeout for `calculate_move`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// CRC32 the binary must match. A module manifest may pin one as well.
    #[serde(default)]
    pub expected_crc32: Option<u32>,
    #[serde(default)]
    pub exports: ExportNames,
}

fn default_level() -> i32 {
    1
}
fn default_ready_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    3_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_path: None,
            level: default_level(),
            ready_timeout_ms: default_ready_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            expected_crc32: None,
            exports: ExportNames::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid engine config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineConfig {
    pub fn with_module_path(path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_millis(3000));
        assert_eq!(config.level, 1);
    }

    #[test]
    fn json_overrides_selected_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"modulePath": "engine/ai.wasm", "level": 21, "exports": {"malloc": "_malloc"}}"#,
        )
        .unwrap();

        assert_eq!(config.module_path, Some(PathBuf::from("engine/ai.wasm")));
        assert_eq!(config.level, 21);
        assert_eq!(config.exports.malloc, "_malloc");
        assert_eq!(config.exports.compute_move, "ai_js");
        assert_eq!(config.request_timeout_ms, 3000);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{\"level\": \"hard\"}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/engine.json")).unwrap_err();

        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
