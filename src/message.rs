use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Activity of the agent running in a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    /// Sitting at a prompt with nothing to do
    #[default]
    Idle,
    /// Waiting on the classifier to decide
    Analyzing,
    /// Blocked on user input (question, confirmation)
    Waiting,
    /// Actively processing
    Working,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Waiting => write!(f, "waiting"),
            Self::Working => write!(f, "working"),
        }
    }
}

/// Why a monitor asked for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisReason {
    NewStaticContent,
}

/// Pane text captured at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub content: String,
    pub captured_at: u64,
}

impl CaptureSnapshot {
    pub fn new(content: String) -> Self {
        Self {
            content,
            captured_at: now_ms(),
        }
    }
}

/// Outcome of a request that carries no data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Messages sent to a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum MonitorCommand {
    SendKeys {
        keys: String,
    },
    Resize {
        width: u16,
        height: u16,
    },
    #[serde(rename_all = "camelCase")]
    AnalyzeComplete {
        status: ActivityState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_before_next_check: Option<u64>,
    },
    GetStatus,
    Shutdown,
}

/// Messages emitted by a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum MonitorEvent {
    Ready,
    StatusChange {
        status: ActivityState,
        previous: ActivityState,
    },
    AnalysisNeeded {
        snapshot: CaptureSnapshot,
        reason: AnalysisReason,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    PaneRemoved,
    ShutdownComplete,
    SendKeysResponse(Ack),
    ResizeResponse(Ack),
    AnalyzeCompleteResponse(Ack),
    GetStatusResponse {
        status: ActivityState,
    },
}

impl MonitorEvent {
    /// Whether this event answers a correlated request
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::SendKeysResponse(_)
                | Self::ResizeResponse(_)
                | Self::AnalyzeCompleteResponse(_)
                | Self::GetStatusResponse { .. }
                | Self::ShutdownComplete
        )
    }

    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::StatusChange { .. } => "status-change",
            Self::AnalysisNeeded { .. } => "analysis-needed",
            Self::Error { .. } => "error",
            Self::PaneRemoved => "pane-removed",
            Self::ShutdownComplete => "shutdown-complete",
            Self::SendKeysResponse(_) => "send-keys-response",
            Self::ResizeResponse(_) => "resize-response",
            Self::AnalyzeCompleteResponse(_) => "analyze-complete-response",
            Self::GetStatusResponse { .. } => "get-status-response",
        }
    }
}

/// Correlated message wrapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub id: Uuid,
    pub timestamp: u64,
    pub pane_id: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wrap `body` under a fresh correlation id
    pub fn new(pane_id: impl Into<String>, body: T) -> Self {
        Self::reply(Uuid::new_v4(), pane_id, body)
    }

    /// Wrap `body` under an existing correlation id
    pub fn reply(id: Uuid, pane_id: impl Into<String>, body: T) -> Self {
        Self {
            id,
            timestamp: now_ms(),
            pane_id: pane_id.into(),
            body,
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
