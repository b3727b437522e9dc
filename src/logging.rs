//! Tracing setup
//!
//! CLI commands log to stderr. The interactive UI owns the terminal, so it
//! logs to ~/.local/state/patentqa/patentqa.log instead.
//! Filter with PATENTQA_LOG (same syntax as RUST_LOG).

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config;

pub const LOG_ENV: &str = "PATENTQA_LOG";

/// Build the filter from `directives`, falling back to `default` when unset
/// or unparsable
pub fn build_filter(directives: Option<&str>, default: &str) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn env_filter(default: &str) -> EnvFilter {
    build_filter(std::env::var(LOG_ENV).ok().as_deref(), default)
}

/// Default log file for the interactive UI
pub fn log_path() -> Result<PathBuf> {
    Ok(config::state_dir()?.join("patentqa.log"))
}

/// Log warnings and up to stderr
pub fn init_stderr() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Append info and up to `path`
pub fn init_file(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
