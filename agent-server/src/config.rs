//! Server configuration (TOML, optional).

use std::fs;
use std::path::Path;
use std::time::Duration;

use agent::io::reasoner::GeminiConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Idle expiry for stored conversations, refreshed on every step.
    pub conversation_ttl_secs: u64,
    pub redis_url: String,
    pub gemini: GeminiConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            conversation_ttl_secs: 60 * 60,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            gemini: GeminiConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(anyhow!("bind must be non-empty"));
        }
        if self.conversation_ttl_secs == 0 {
            return Err(anyhow!("conversation_ttl_secs must be > 0"));
        }
        if self.redis_url.trim().is_empty() {
            return Err(anyhow!("redis_url must be non-empty"));
        }
        self.gemini.validate()
    }

    pub fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_ttl_secs)
    }
}

/// Load the server config. A missing file yields `ServerConfig::default()`.
pub fn load_server_config(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        return Ok(ServerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
