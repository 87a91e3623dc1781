mod client;
pub mod heuristics;

pub use client::TmuxClient;
pub use heuristics::{AgentStatus, StateInferenceEngine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Capture and control operations a monitor needs from the multiplexer
#[async_trait]
pub trait PaneAdapter: Send + Sync {
    /// Read the last `lines` lines of pane text
    async fn capture(&self, pane_id: &str, lines: usize) -> Result<String, AdapterError>;

    /// Type `keys` into the pane
    async fn send_keys(&self, pane_id: &str, keys: &str) -> Result<(), AdapterError>;

    /// Resize the pane
    async fn resize(&self, pane_id: &str, width: u16, height: u16) -> Result<(), AdapterError>;

    /// Redraw attached clients
    async fn refresh(&self) -> Result<(), AdapterError>;
}

/// Kind of coding agent running in a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
}

impl AgentKind {
    /// Guess the agent from a pane's current command
    pub fn from_command(command: &str) -> Option<Self> {
        let command = command.to_ascii_lowercase();
        if command.contains("claude") {
            Some(Self::Claude)
        } else if command.contains("codex") {
            Some(Self::Codex)
        } else if command.contains("gemini") {
            Some(Self::Gemini)
        } else if command.contains("opencode") {
            Some(Self::Opencode)
        } else {
            None
        }
    }
}

/// A pane as reported by the authoritative pane list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneSpec {
    /// Stable logical id (e.g. "work:1.0")
    pub id: String,
    /// tmux pane id (e.g. "%12"); may be rebound over time
    pub tmux_pane_id: String,
    /// Detected agent, if any
    pub agent: Option<AgentKind>,
}

impl PaneSpec {
    pub fn new(id: impl Into<String>, tmux_pane_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tmux_pane_id: tmux_pane_id.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentKind) -> Self {
        self.agent = Some(agent);
        self
    }
}
