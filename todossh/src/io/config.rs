//! Server configuration stored as TOML (default `todossh.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::DEFAULT_MIN_PASSWORD_LEN;
use crate::io::atomic::write_atomic;
use crate::io::credential_store::{DEFAULT_HASH_COST, MAX_HASH_COST, MIN_HASH_COST};

/// Server configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is a valid config.
/// Relative paths are resolved against the process working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    pub port: u16,

    /// Ed25519 host key in PKCS#8 PEM; generated on first start if missing.
    pub host_key_path: PathBuf,

    /// Root directory for `users.json` and `tasks/<user>.json`.
    pub data_dir: PathBuf,

    /// Minimum password length accepted during registration.
    pub min_password_len: usize,

    /// bcrypt cost for newly registered passwords.
    pub password_hash_cost: u32,

    /// Delay applied to rejected authentication attempts, in milliseconds.
    pub auth_rejection_millis: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 2222,
            host_key_path: PathBuf::from("host_key"),
            data_dir: PathBuf::from("data"),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            password_hash_cost: DEFAULT_HASH_COST,
            auth_rejection_millis: 1000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(anyhow!("bind must be a non-empty address"));
        }
        if self.port == 0 {
            return Err(anyhow!("port must be > 0"));
        }
        if self.host_key_path.as_os_str().is_empty() {
            return Err(anyhow!("host_key_path must be set"));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("data_dir must be set"));
        }
        if self.min_password_len == 0 {
            return Err(anyhow!("min_password_len must be > 0"));
        }
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&self.password_hash_cost) {
            return Err(anyhow!(
                "password_hash_cost must be between {MIN_HASH_COST} and {MAX_HASH_COST}"
            ));
        }
        Ok(())
    }

    /// `bind:port` in the form the listener expects.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn auth_rejection_time(&self) -> Duration {
        Duration::from_millis(self.auth_rejection_millis)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ServerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        let cfg = ServerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ServerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
