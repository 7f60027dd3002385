//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::backend::Mode;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the CallPal backend API
    pub api_url: String,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Mode used when a request does not name one
    pub default_mode: Mode,

    /// Upper bound on any single backend request
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("callpal");

        let socket_path = lookup("CALLPAL_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let api_url = lookup("CALLPAL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(anyhow!("CALLPAL_API_URL must be an http(s) URL, got '{}'", api_url));
        }

        let default_mode = match lookup("CALLPAL_MODE") {
            Some(raw) => raw
                .parse::<Mode>()
                .map_err(|e| anyhow!(e))
                .context("invalid CALLPAL_MODE")?,
            None => Mode::default(),
        };

        let timeout_secs = match lookup("CALLPAL_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| format!("invalid CALLPAL_HTTP_TIMEOUT_SECS '{}'", raw))?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            socket_path,
            data_dir,
            default_mode,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
