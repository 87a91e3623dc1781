use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::classifier::{Classification, Classifier, HeuristicClassifier};
use crate::lifecycle::LifecycleGuard;
use crate::message::{now_ms, ActivityState, CaptureSnapshot, Envelope, MonitorCommand, MonitorEvent};
use crate::supervisor::Supervisor;
use crate::tmux::{AgentKind, PaneSpec};

/// Last known state of one pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneStatus {
    pub activity: ActivityState,
    /// Set once the pane's monitor was given up on
    pub stale: bool,
    pub last_error: Option<String>,
    pub updated_at: u64,
}

impl Default for PaneStatus {
    fn default() -> Self {
        Self {
            activity: ActivityState::Idle,
            stale: false,
            last_error: None,
            updated_at: now_ms(),
        }
    }
}

/// How a `pane-removed` report was treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalDisposition {
    /// The pane was being closed on purpose
    Expected,
    /// The pane disappeared on its own
    Unexpected,
}

pub struct StateLayer {
    supervisor: Supervisor,
    guard: Arc<LifecycleGuard>,
    classifier: Arc<dyn Classifier>,
    statuses: RwLock<HashMap<String, PaneStatus>>,
    agents: RwLock<HashMap<String, AgentKind>>,
    unexpected_removals: AtomicUsize,
}

impl StateLayer {
    pub fn new(
        supervisor: Supervisor,
        guard: Arc<LifecycleGuard>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            supervisor,
            guard,
            classifier,
            statuses: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            unexpected_removals: AtomicUsize::new(0),
        }
    }

    /// Consume supervisor events until the bus closes
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.supervisor.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(envelope) => self.handle_event(envelope),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "state layer fell behind monitor events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Record the authoritative pane list and reconcile monitors against it
    pub async fn sync_panes(&self, panes: &[PaneSpec]) {
        {
            let mut agents = write(&self.agents);
            agents.clear();
            agents.extend(panes.iter().filter_map(|p| p.agent.map(|a| (p.id.clone(), a))));
        }
        write(&self.statuses).retain(|id, _| panes.iter().any(|p| &p.id == id));
        self.supervisor.update_monitors(panes).await;
    }

    pub fn handle_event(self: &Arc<Self>, envelope: Envelope<MonitorEvent>) {
        let pane_id = envelope.pane_id;
        match envelope.body {
            MonitorEvent::Ready => {
                let mut statuses = write(&self.statuses);
                let status = statuses.entry(pane_id).or_default();
                status.stale = false;
                status.updated_at = now_ms();
            }
            MonitorEvent::StatusChange { status, previous } => {
                tracing::info!(pane_id = %pane_id, %previous, %status, "pane status changed");
                let mut statuses = write(&self.statuses);
                let entry = statuses.entry(pane_id).or_default();
                entry.activity = status;
                entry.updated_at = now_ms();
            }
            MonitorEvent::AnalysisNeeded { snapshot, reason } => {
                tracing::debug!(pane_id = %pane_id, ?reason, "classifying pane");
                let layer = Arc::clone(self);
                tokio::spawn(async move { layer.classify(pane_id, snapshot).await });
            }
            MonitorEvent::Error {
                message,
                recoverable,
            } => {
                if recoverable {
                    tracing::warn!(pane_id = %pane_id, error = %message, "monitor error");
                } else {
                    tracing::error!(pane_id = %pane_id, error = %message, "monitor lost, status is stale");
                }
                let mut statuses = write(&self.statuses);
                let entry = statuses.entry(pane_id).or_default();
                entry.stale |= !recoverable;
                entry.last_error = Some(message);
                entry.updated_at = now_ms();
            }
            MonitorEvent::PaneRemoved => {
                self.handle_pane_removed(&pane_id);
            }
            MonitorEvent::ShutdownComplete => {
                tracing::debug!(pane_id = %pane_id, "monitor shut down");
            }
            MonitorEvent::SendKeysResponse(_)
            | MonitorEvent::ResizeResponse(_)
            | MonitorEvent::AnalyzeCompleteResponse(_)
            | MonitorEvent::GetStatusResponse { .. } => {}
        }
    }

    /// Decide whether a vanished pane is news or part of a close in progress
    pub fn handle_pane_removed(&self, pane_id: &str) -> RemovalDisposition {
        if self.guard.is_expected_removal(pane_id) {
            tracing::debug!(pane_id = %pane_id, "pane closed intentionally");
            return RemovalDisposition::Expected;
        }

        tracing::warn!(pane_id = %pane_id, "pane vanished unexpectedly");
        write(&self.statuses).remove(pane_id);
        self.unexpected_removals.fetch_add(1, Ordering::Relaxed);
        RemovalDisposition::Unexpected
    }

    pub fn status(&self, pane_id: &str) -> Option<PaneStatus> {
        read(&self.statuses).get(pane_id).cloned()
    }

    pub fn statuses(&self) -> HashMap<String, PaneStatus> {
        read(&self.statuses).clone()
    }

    pub fn unexpected_removals(&self) -> usize {
        self.unexpected_removals.load(Ordering::Relaxed)
    }

    async fn classify(&self, pane_id: String, snapshot: CaptureSnapshot) {
        let agent = read(&self.agents).get(&pane_id).copied();
        let Classification {
            status,
            delay_before_next_check,
        } = match self.classifier.classify(&snapshot, agent).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(pane_id = %pane_id, error = %e, "classifier failed, using heuristics");
                match HeuristicClassifier.classify(&snapshot, agent).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(pane_id = %pane_id, error = %e, "heuristic classifier failed");
                        return;
                    }
                }
            }
        };

        let command = MonitorCommand::AnalyzeComplete {
            status,
            delay_before_next_check,
        };
        if let Err(e) = self.supervisor.notify_monitor(&pane_id, command) {
            tracing::debug!(pane_id = %pane_id, error = %e, "dropping classification");
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
