//! Configuration management with XDG paths
//!
//! ~/.config/patentqa/config.json - backend endpoint, timeout (0600)
//! ~/.local/state/patentqa/       - log file for the interactive UI
//!
//! Environment overrides: PATENTQA_ENDPOINT, PATENTQA_TIMEOUT_MS

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::parse_endpoint;

const APP_NAME: &str = "patentqa";

pub const ENDPOINT_ENV: &str = "PATENTQA_ENDPOINT";
pub const TIMEOUT_ENV: &str = "PATENTQA_TIMEOUT_MS";

/// Get config directory (~/.config/patentqa/)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get state directory (~/.local/state/patentqa/)
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .context("Could not determine state directory")?;
    Ok(base.join(APP_NAME))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Full query endpoint; wins over host/port when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Backend host used to build the default endpoint
    #[serde(default = "default_host")]
    pub backend_host: String,

    /// Backend port used to build the default endpoint
    #[serde(default = "default_port")]
    pub backend_port: u16,

    /// Hard limit per exchange (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 8000 }
fn default_timeout_ms() -> u64 { 10_000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            backend_host: default_host(),
            backend_port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from the default location, or return defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load config from `path`, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    /// Save config to `path` with owner-only permissions
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;

        Ok(())
    }

    /// Set a value by its CLI key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "endpoint" | "url" => {
                parse_endpoint(value)?;
                self.endpoint = Some(value.to_string());
            }
            "host" | "backend_host" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Host cannot be empty");
                }
                self.backend_host = value.trim().to_string();
            }
            "port" | "backend_port" => {
                self.backend_port = value
                    .parse()
                    .with_context(|| format!("Invalid port: {}", value))?;
            }
            "timeout" | "timeout_ms" => {
                self.timeout_ms = parse_timeout_ms(value)?;
            }
            _ => {
                anyhow::bail!(
                    "Unknown config key: {}. Valid keys: endpoint, host, port, timeout",
                    key
                );
            }
        }
        Ok(())
    }

    /// Endpoint from config alone (no environment)
    pub fn configured_endpoint(&self) -> String {
        match &self.endpoint {
            Some(url) => url.clone(),
            None => format!("http://{}:{}/query", self.backend_host, self.backend_port),
        }
    }

    /// Endpoint after applying the environment override
    pub fn resolve_endpoint(&self) -> Result<String> {
        let endpoint = match std::env::var(ENDPOINT_ENV) {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.configured_endpoint(),
        };
        parse_endpoint(&endpoint)?;
        Ok(endpoint)
    }

    /// Timeout after applying the environment override
    pub fn resolve_timeout(&self) -> Result<Duration> {
        let ms = match std::env::var(TIMEOUT_ENV) {
            Ok(v) if !v.trim().is_empty() => parse_timeout_ms(&v)
                .with_context(|| format!("Invalid {}", TIMEOUT_ENV))?,
            _ => self.timeout_ms,
        };
        Ok(Duration::from_millis(ms))
    }
}

/// Parse a positive millisecond count
pub fn parse_timeout_ms(value: &str) -> Result<u64> {
    let ms: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid timeout: {}", value))?;
    if ms == 0 {
        anyhow::bail!("Timeout must be greater than zero");
    }
    Ok(ms)
}
