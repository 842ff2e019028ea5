//! Runner configuration.
//!
//! Every section is optional in the JSON form; missing fields take the
//! defaults below:
//!
//! ```json
//! {
//!   "allow_list": { "capabilities": ["print", "range"], "intrinsics": [] },
//!   "script": { "max_code_bytes": 65536, "max_output_bytes": 1048576,
//!               "max_loop_iterations": 10000000, "max_recursion_depth": 512 },
//!   "command": { "enabled": true, "shell": "sh", "max_output_bytes": 1048576,
//!                "timeout": 5000 },
//!   "quota": { "limit": 10, "window": 60000, "gate_commands": true }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allowlist::CapabilityAllowList;
use crate::limits::{CommandLimits, ScriptLimits};
use crate::quota::QuotaConfig;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON
    #[error("invalid config {path}: {source}")]
    Parse {
        /// File that failed
        path: String,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Everything a [`Runner`](crate::Runner) needs to know.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Names scripts may reference.
    pub allow_list: CapabilityAllowList,
    /// Script guards.
    pub script: ScriptLimits,
    /// Shell command settings.
    pub command: CommandLimits,
    /// Per-caller quota.
    pub quota: QuotaConfig,
}

impl RunnerConfig {
    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config = RunnerConfig::from_json("{}").unwrap();
        assert_eq!(config.quota.limit, 10);
        assert_eq!(config.command.timeout, Duration::from_secs(5));
        assert!(config.allow_list.permits("print"));
        assert!(!config.allow_list.permits("Math"));
    }

    #[test]
    fn test_partial_sections() {
        let config = RunnerConfig::from_json(
            r#"{"command": {"enabled": false}, "quota": {"limit": 2, "window": 1000},
                "allow_list": {"intrinsics": ["Math"]}}"#,
        )
        .unwrap();

        assert!(!config.command.enabled);
        assert_eq!(config.command.shell, "sh");
        assert_eq!(config.quota.limit, 2);
        assert_eq!(config.quota.window, Duration::from_secs(1));
        assert!(config.quota.gate_commands);
        assert!(config.allow_list.permits("Math"));
        assert!(config.allow_list.permits("range"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coderun.json");
        std::fs::write(&path, r#"{"script": {"max_code_bytes": 10}}"#).unwrap();

        let config = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(config.script.max_code_bytes, 10);

        let missing = RunnerConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RunnerConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
