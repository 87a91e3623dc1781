use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a [`PaneAdapter`](crate::tmux::PaneAdapter)
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The target pane no longer exists
    #[error("pane not found: {0}")]
    PaneNotFound(String),

    /// tmux ran but reported a failure
    #[error("tmux command failed: {0}")]
    Command(String),

    /// tmux could not be executed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether this error means the pane vanished (terminal, never retried)
    pub fn is_pane_not_found(&self) -> bool {
        matches!(self, Self::PaneNotFound(_))
    }
}

/// Failures inside a single monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The identity cannot be monitored
    #[error("invalid monitor identity for pane {pane_id}: {reason}")]
    InvalidIdentity { pane_id: String, reason: String },

    /// The supervisor side of the outbound channel went away
    #[error("outbound channel closed for pane {0}")]
    OutboundClosed(String),
}

/// Failures while waiting on a correlated response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No response arrived in time
    #[error("timed out waiting for response to {0}")]
    Timeout(Uuid),

    /// The monitor owning the request exited before answering
    #[error("monitor for pane {0} exited before responding")]
    MonitorExited(String),

    /// The waiter was dropped without a response
    #[error("request {0} was cancelled")]
    Cancelled(Uuid),
}

/// Failures surfaced by the [`Supervisor`](crate::supervisor::Supervisor)
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// No monitor is tracked for this pane
    #[error("no monitor for pane {0}")]
    MonitorNotFound(String),

    /// The monitor is tracked but currently restarting
    #[error("monitor for pane {0} is restarting")]
    MonitorUnavailable(String),

    /// The monitor's inbound channel is closed
    #[error("monitor for pane {0} is not accepting messages")]
    MonitorClosed(String),

    /// Creating the monitor failed
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Waiting for the response failed
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pane_not_found_predicate() {
        assert!(AdapterError::PaneNotFound("%3".into()).is_pane_not_found());
        assert!(!AdapterError::Command("server exited".into()).is_pane_not_found());
    }
}
