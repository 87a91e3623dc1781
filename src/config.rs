use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "DMUX_CONFIG";

/// Runtime settings for the monitoring subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Default poll interval for each monitor
    pub poll_interval_ms: u64,
    /// Lines captured from the bottom of each pane
    pub capture_lines: usize,
    /// Base delay for restart backoff
    pub restart_base_delay_ms: u64,
    /// Grace period between a shutdown request and a forced stop
    pub shutdown_grace_ms: u64,
    /// How long `send_to_monitor` waits for a response
    pub request_timeout_ms: u64,
    /// Cadence of the stale close-marker sweep
    pub stale_cleanup_interval_ms: u64,
    /// Cadence of pane discovery in the binary
    pub pane_refresh_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            capture_lines: 30,
            restart_base_delay_ms: 1000,
            shutdown_grace_ms: 2000,
            request_timeout_ms: 5000,
            stale_cleanup_interval_ms: 60_000,
            pane_refresh_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    /// Load from `$DMUX_CONFIG` or `~/.dmux/monitor.json`, falling back to
    /// defaults when no file exists
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    fn path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".dmux").join("monitor.json"))
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stale_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.stale_cleanup_interval_ms)
    }

    pub fn pane_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.pane_refresh_interval_ms)
    }
}
