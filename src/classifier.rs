use anyhow::Result;
use async_trait::async_trait;

use crate::message::{ActivityState, CaptureSnapshot};
use crate::tmux::{AgentKind, AgentStatus, StateInferenceEngine};

/// Delay before re-checking a pane whose output could not be classified
const UNKNOWN_RECHECK_MS: u64 = 3000;

/// A classifier's verdict for one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: ActivityState,
    pub delay_before_next_check: Option<u64>,
}

/// Decides what an agent is doing from a pane snapshot
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        snapshot: &CaptureSnapshot,
        agent: Option<AgentKind>,
    ) -> Result<Classification>;
}

/// Regex-based classifier for running without an LLM
pub struct HeuristicClassifier;

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(
        &self,
        snapshot: &CaptureSnapshot,
        _agent: Option<AgentKind>,
    ) -> Result<Classification> {
        let classification = match StateInferenceEngine::analyze(&snapshot.content) {
            AgentStatus::Busy => Classification {
                status: ActivityState::Working,
                delay_before_next_check: None,
            },
            AgentStatus::WaitingForInput | AgentStatus::Error => Classification {
                status: ActivityState::Waiting,
                delay_before_next_check: None,
            },
            AgentStatus::Idle => Classification {
                status: ActivityState::Idle,
                delay_before_next_check: None,
            },
            AgentStatus::Unknown => Classification {
                status: ActivityState::Idle,
                delay_before_next_check: Some(UNKNOWN_RECHECK_MS),
            },
        };
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn classify(content: &str) -> Classification {
        HeuristicClassifier
            .classify(&CaptureSnapshot::new(content.to_string()), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_heuristic_mapping() {
        assert_eq!(classify("Apply edit? [y/n]").await.status, ActivityState::Waiting);
        assert_eq!(classify("Error: build failed").await.status, ActivityState::Waiting);
        assert_eq!(classify("Thinking...").await.status, ActivityState::Working);
        assert_eq!(classify("ok\n$ ").await.status, ActivityState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_output_is_rechecked_later() {
        let result = classify("lorem ipsum").await;
        assert_eq!(result.status, ActivityState::Idle);
        assert_eq!(result.delay_before_next_check, Some(UNKNOWN_RECHECK_MS));
    }
}
