//! Tunnel configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main tunnel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Jump host address as `host:port` (no scheme).
    pub jumpbox_url: String,

    /// SSH username on the jump host.
    pub jumpbox_user: String,

    /// Path to the private key used for authentication.
    pub private_key_path: PathBuf,

    /// Expected jump host public key in OpenSSH format. Required to start;
    /// there is no trust-on-first-use fallback.
    pub jumpbox_host_key: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let ssh_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(".ssh");

        Self {
            jumpbox_url: "127.0.0.1:22".to_string(),
            jumpbox_user: "jumpbox".to_string(),
            private_key_path: ssh_dir.join("id_rsa"),
            jumpbox_host_key: None,
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
