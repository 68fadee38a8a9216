//! Executor configuration stored under `.agent/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default location of the executor config, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".agent/config.toml";

/// Executor configuration (TOML).
///
/// Missing fields default to values that work against a local controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Base URL of the controller service.
    pub controller_url: String,

    /// Per-request timeout when talking to the controller, in seconds.
    pub request_timeout_secs: u64,

    /// Stop after dispatching this many tool actions without a `finish`. `0` disables the limit.
    pub max_steps: u32,

    pub tools: ToolsConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 300,
            max_steps: 0,
            tools: ToolsConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.controller_url.trim().is_empty() {
            return Err(anyhow!("controller_url must be non-empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        self.tools.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Local tool execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Interpreter argv used for `run_shell_command`; the command is appended.
    pub shell: Vec<String>,

    /// Wall-clock limit for any spawned tool process, in seconds.
    pub command_timeout_secs: u64,

    /// Truncate each of stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub list_directory: ProgramTier,
    pub glob_files: ProgramTier,
    pub grep_content: ProgramTier,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell: vec!["sh".to_string(), "-c".to_string()],
            command_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            list_directory: ProgramTier::new("eza", "ls"),
            glob_files: ProgramTier::new("fd", "find"),
            grep_content: ProgramTier::new("rg", "grep"),
        }
    }
}

impl ToolsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(anyhow!("tools.shell must be a non-empty array"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("tools.command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        for (name, tier) in [
            ("list_directory", &self.list_directory),
            ("glob_files", &self.glob_files),
            ("grep_content", &self.grep_content),
        ] {
            if tier.preferred.trim().is_empty() || tier.baseline.trim().is_empty() {
                return Err(anyhow!("tools.{name} programs must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Preferred program with a universally available fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramTier {
    pub preferred: String,
    pub baseline: String,
}

impl ProgramTier {
    pub fn new(preferred: &str, baseline: &str) -> Self {
        Self {
            preferred: preferred.to_string(),
            baseline: baseline.to_string(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ExecutorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExecutorConfig> {
    if !path.exists() {
        let cfg = ExecutorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExecutorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ExecutorConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_steps = 25\n\n[tools.grep_content]\npreferred = \"ag\"\nbaseline = \"grep\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 25);
        assert_eq!(cfg.tools.grep_content, ProgramTier::new("ag", "grep"));
        assert_eq!(cfg.tools.list_directory, ProgramTier::new("eza", "ls"));
        assert_eq!(cfg.controller_url, ExecutorConfig::default().controller_url);
    }

    #[test]
    fn rejects_empty_shell() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[tools]\nshell = []\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("tools.shell"));
    }
}
