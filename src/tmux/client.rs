use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;

use super::{AgentKind, PaneAdapter, PaneSpec};
use crate::error::AdapterError;

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    /// Check if tmux server is running
    pub async fn is_server_running(&self) -> bool {
        Command::new(&self.tmux_path)
            .arg("list-sessions")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// List every pane on the server
    pub async fn list_panes(&self) -> Result<Vec<PaneSpec>> {
        // Format: pane_id|session_name|window_index|pane_index|pane_current_command
        let output = Command::new(&self.tmux_path)
            .args([
                "list-panes",
                "-a",
                "-F",
                "#{pane_id}|#{session_name}|#{window_index}|#{pane_index}|#{pane_current_command}",
            ])
            .output()
            .await
            .context("Failed to execute tmux list-panes")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-panes failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_pane_line).collect())
    }

    async fn run(&self, target: &str, args: &[&str]) -> Result<Output, AdapterError> {
        let output = Command::new(&self.tmux_path).args(args).output().await?;
        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_target(&stderr) {
            Err(AdapterError::PaneNotFound(target.to_string()))
        } else {
            Err(AdapterError::Command(stderr))
        }
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaneAdapter for TmuxClient {
    async fn capture(&self, pane_id: &str, lines: usize) -> Result<String, AdapterError> {
        let start = format!("-{}", lines);
        let output = self
            .run(pane_id, &["capture-pane", "-p", "-t", pane_id, "-S", &start])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_keys(&self, pane_id: &str, keys: &str) -> Result<(), AdapterError> {
        self.run(pane_id, &["send-keys", "-t", pane_id, "-l", keys])
            .await
            .map(|_| ())
    }

    async fn resize(&self, pane_id: &str, width: u16, height: u16) -> Result<(), AdapterError> {
        let width = width.to_string();
        let height = height.to_string();
        self.run(
            pane_id,
            &["resize-pane", "-t", pane_id, "-x", &width, "-y", &height],
        )
        .await
        .map(|_| ())
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        self.run("", &["refresh-client", "-S"]).await.map(|_| ())
    }
}

fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("can't find pane")
        || stderr.contains("no such pane")
        || stderr.contains("can't find window")
        || stderr.contains("can't find session")
}

fn parse_pane_line(line: &str) -> Option<PaneSpec> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 5 {
        return None;
    }

    let id = format!("{}:{}.{}", parts[1], parts[2], parts[3]);
    Some(PaneSpec {
        id,
        tmux_pane_id: parts[0].to_string(),
        agent: AgentKind::from_command(parts[4]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pane_line() {
        let pane = parse_pane_line("%7|work|1|0|claude").unwrap();
        assert_eq!(pane.id, "work:1.0");
        assert_eq!(pane.tmux_pane_id, "%7");
        assert_eq!(pane.agent, Some(AgentKind::Claude));

        assert!(parse_pane_line("%7|work").is_none());
    }

    #[test]
    fn test_missing_target_detection() {
        assert!(is_missing_target("can't find pane: %42"));
        assert!(is_missing_target("can't find window: 3"));
        assert!(!is_missing_target("server exited unexpectedly"));
    }
}
