// Runner configuration
// Built once at startup and handed to the sandbox explicitly

use crate::formats::AcceptedFormats;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/runner.json";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter executable, resolved through PATH when not absolute
    pub interpreter: String,
    /// Extension of the script file written into every workspace
    pub script_extension: String,
    pub timeout_ms: u64,
    /// Parent directory of all per-request workspaces
    pub workspace_root: PathBuf,
    pub max_script_bytes: usize,
    pub max_attachment_bytes: usize,
    /// Upper bound on a whole HTTP request body
    pub max_request_bytes: usize,
    /// Per-stream capture limit
    pub max_output_bytes: usize,
    /// How long output readers may keep draining after a forced kill
    pub kill_grace_ms: u64,
    pub accepted_formats: AcceptedFormats,
    pub enforce_formats: bool,
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_extension: "py".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            workspace_root: std::env::temp_dir().join("pyrunner"),
            max_script_bytes: MIB,
            max_attachment_bytes: 10 * MIB,
            max_request_bytes: 50 * MIB,
            max_output_bytes: MIB,
            kill_grace_ms: 500,
            accepted_formats: AcceptedFormats::default(),
            enforce_formats: true,
            bind_addr: "0.0.0.0:5000".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file. Fields missing from the file keep their defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runner config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Defaults, then `config/runner.json` if present, then environment overrides
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Apply PYTHON_PATH and RUNNER_* environment variables
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interpreter) = lookup("PYTHON_PATH") {
            self.interpreter = interpreter;
        }
        if let Some(timeout) = lookup("RUNNER_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .trim()
                .parse()
                .with_context(|| format!("RUNNER_TIMEOUT_MS is not a number: {}", timeout))?;
        }
        if let Some(root) = lookup("RUNNER_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(limit) = lookup("RUNNER_MAX_OUTPUT_BYTES") {
            self.max_output_bytes = limit
                .trim()
                .parse()
                .with_context(|| format!("RUNNER_MAX_OUTPUT_BYTES is not a number: {}", limit))?;
        }
        if let Some(addr) = lookup("RUNNER_BIND_ADDR") {
            self.bind_addr = addr;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.trim().is_empty() {
            bail!("interpreter must not be empty");
        }
        if self.script_extension.trim().is_empty() {
            bail!("script_extension must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_script_bytes == 0 || self.max_output_bytes == 0 {
            bail!("size limits must be greater than zero");
        }
        if self.max_request_bytes < self.max_script_bytes {
            bail!("max_request_bytes must be at least max_script_bytes");
        }
        if self.accepted_formats.is_empty() {
            bail!("accepted_formats must list at least one extension");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Fixed script file name, e.g. `script.py`
    pub fn script_file_name(&self) -> String {
        format!("script.{}", self.script_extension.trim_start_matches('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.script_file_name(), "script.py");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        fs::write(&path, r#"{ "interpreter": "/usr/bin/python3.12", "timeout_ms": 2500 }"#).unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.interpreter, "/usr/bin/python3.12");
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.script_extension, "py");
        assert!(config.enforce_formats);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunnerConfig::load(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = RunnerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PYTHON_PATH", "py"),
            ("RUNNER_TIMEOUT_MS", "1500"),
            ("RUNNER_WORKSPACE_ROOT", "/srv/runner"),
        ]
        .into_iter()
        .collect();

        let config = RunnerConfig::default()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.interpreter, "py");
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.workspace_root, PathBuf::from("/srv/runner"));
    }

    #[test]
    fn test_bad_timeout_override_is_an_error() {
        let result = RunnerConfig::default().with_overrides_from(|key| {
            (key == "RUNNER_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RunnerConfig {
            timeout_ms: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
