use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, SupervisorError};
use crate::message::{Envelope, MonitorCommand, MonitorEvent};
use crate::monitor::{Monitor, MonitorExit, MonitorIdentity};
use crate::tmux::{AgentKind, PaneAdapter, PaneSpec};

/// Restarts attempted before a crashing monitor is dropped for good
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

const EVENT_CAPACITY: usize = 1024;

/// Supervisor-side view of one monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub pane_id: String,
    pub tmux_pane_id: String,
    pub agent: Option<AgentKind>,
    #[serde(skip)]
    pub uptime: Duration,
    pub restart_count: u32,
    pub running: bool,
}

struct RunningMonitor {
    instance: Uuid,
    commands: mpsc::UnboundedSender<Envelope<MonitorCommand>>,
    abort: AbortHandle,
    stopped: oneshot::Receiver<()>,
}

enum Slot {
    Running(RunningMonitor),
    Restarting,
}

struct MonitorRecord {
    identity: MonitorIdentity,
    started_at: Instant,
    restart_count: u32,
    slot: Slot,
}

impl MonitorRecord {
    fn is_instance(&self, instance: Uuid) -> bool {
        matches!(&self.slot, Slot::Running(m) if m.instance == instance)
    }
}

#[derive(Debug)]
enum ExitOutcome {
    Graceful(MonitorExit),
    Failed(String),
    Aborted,
}

impl From<Result<Result<MonitorExit, MonitorError>, JoinError>> for ExitOutcome {
    fn from(result: Result<Result<MonitorExit, MonitorError>, JoinError>) -> Self {
        match result {
            Ok(Ok(exit)) => Self::Graceful(exit),
            Ok(Err(e)) => Self::Failed(e.to_string()),
            Err(e) if e.is_cancelled() => Self::Aborted,
            Err(_) => Self::Failed("monitor panicked".to_string()),
        }
    }
}

enum Inbound {
    Event(Envelope<MonitorEvent>),
    Exited {
        pane_id: String,
        instance: Uuid,
        outcome: ExitOutcome,
    },
}

struct Inner {
    adapter: Arc<dyn PaneAdapter>,
    config: MonitorConfig,
    bus: MessageBus,
    records: Mutex<HashMap<String, MonitorRecord>>,
    reconcile: tokio::sync::Mutex<()>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

/// Owner of every monitor in the process
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor and start its router. Must be called inside a
    /// tokio runtime.
    pub fn new(adapter: Arc<dyn PaneAdapter>, config: MonitorConfig) -> Self {
        let (inbound, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            adapter,
            config,
            bus: MessageBus::new(EVENT_CAPACITY),
            records: Mutex::new(HashMap::new()),
            reconcile: tokio::sync::Mutex::new(()),
            inbound,
        });
        tokio::spawn(route(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Receive unsolicited monitor events
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<MonitorEvent>> {
        self.inner.bus.subscribe()
    }

    /// Bring the running monitors in line with `panes`
    pub async fn update_monitors(&self, panes: &[PaneSpec]) {
        let _reconcile = self.inner.reconcile.lock().await;

        let desired: HashMap<&str, &PaneSpec> = panes.iter().map(|p| (p.id.as_str(), p)).collect();
        let stale: Vec<MonitorRecord> = {
            let mut records = self.records();
            let ids: Vec<String> = records
                .iter()
                .filter(|(id, record)| match desired.get(id.as_str()) {
                    None => true,
                    Some(pane) => {
                        let rebound = pane.tmux_pane_id != record.identity.tmux_pane_id;
                        if rebound {
                            tracing::info!(
                                pane_id = %id,
                                from = %record.identity.tmux_pane_id,
                                to = %pane.tmux_pane_id,
                                "pane rebound, recreating monitor"
                            );
                        }
                        rebound
                    }
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| records.remove(id)).collect()
        };
        self.destroy_all(stale).await;

        let mut records = self.records();
        let mut seen = HashSet::new();
        for pane in panes {
            if !seen.insert(pane.id.as_str()) || records.contains_key(&pane.id) {
                continue;
            }
            let identity = MonitorIdentity {
                pane_id: pane.id.clone(),
                tmux_pane_id: pane.tmux_pane_id.clone(),
                agent: pane.agent,
                poll_interval_ms: self.inner.config.poll_interval_ms,
            };
            match self.start(&identity) {
                Ok(running) => {
                    tracing::info!(pane_id = %pane.id, tmux_pane = %pane.tmux_pane_id, "monitor created");
                    records.insert(
                        pane.id.clone(),
                        MonitorRecord {
                            identity,
                            started_at: Instant::now(),
                            restart_count: 0,
                            slot: Slot::Running(running),
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(pane_id = %pane.id, error = %e, "failed to create monitor");
                }
            }
        }
    }

    /// Send a request and wait for its correlated response
    pub async fn send_to_monitor(
        &self,
        pane_id: &str,
        command: MonitorCommand,
    ) -> Result<MonitorEvent, SupervisorError> {
        let envelope = Envelope::new(pane_id, command);
        let id = envelope.id;

        let waiter = {
            let records = self.records();
            let running = running_monitor(&records, pane_id)?;
            let waiter = self.inner.bus.expect_response(id, running.instance, pane_id);
            if running.commands.send(envelope).is_err() {
                self.inner.bus.cancel(id);
                return Err(SupervisorError::MonitorClosed(pane_id.to_string()));
            }
            waiter
        };

        let reply = self
            .inner
            .bus
            .wait_for_response(waiter, self.inner.config.request_timeout())
            .await?;
        Ok(reply)
    }

    /// Send a command without waiting for its response
    pub fn notify_monitor(
        &self,
        pane_id: &str,
        command: MonitorCommand,
    ) -> Result<(), SupervisorError> {
        let records = self.records();
        let running = running_monitor(&records, pane_id)?;
        running
            .commands
            .send(Envelope::new(pane_id, command))
            .map_err(|_| SupervisorError::MonitorClosed(pane_id.to_string()))
    }

    /// Send a command to every running monitor, returning how many got it
    pub fn broadcast_to_monitors(&self, command: MonitorCommand) -> usize {
        let records = self.records();
        records
            .iter()
            .filter_map(|(pane_id, record)| match &record.slot {
                Slot::Running(m) => Some((pane_id, m)),
                Slot::Restarting => None,
            })
            .filter(|(pane_id, m)| {
                m.commands
                    .send(Envelope::new(pane_id.as_str(), command.clone()))
                    .is_ok()
            })
            .count()
    }

    pub fn stats(&self) -> Vec<MonitorStats> {
        let records = self.records();
        let mut stats: Vec<MonitorStats> = records
            .values()
            .map(|r| MonitorStats {
                pane_id: r.identity.pane_id.clone(),
                tmux_pane_id: r.identity.tmux_pane_id.clone(),
                agent: r.identity.agent,
                uptime: r.started_at.elapsed(),
                restart_count: r.restart_count,
                running: matches!(r.slot, Slot::Running(_)),
            })
            .collect();
        stats.sort_by(|a, b| a.pane_id.cmp(&b.pane_id));
        stats
    }

    /// Stop every monitor
    pub async fn shutdown(&self) {
        let _reconcile = self.inner.reconcile.lock().await;
        let all: Vec<MonitorRecord> = self.records().drain().map(|(_, r)| r).collect();
        tracing::info!(count = all.len(), "shutting down monitors");
        self.destroy_all(all).await;
    }

    fn start(&self, identity: &MonitorIdentity) -> Result<RunningMonitor, MonitorError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(
            identity.clone(),
            self.inner.adapter.clone(),
            self.inner.config.capture_lines,
            events_tx,
        )?;

        let (stopped_tx, stopped) = oneshot::channel();
        let abort = handle.join.abort_handle();
        tokio::spawn(bridge(
            identity.pane_id.clone(),
            handle.instance,
            handle.join,
            events_rx,
            self.inner.inbound.clone(),
            stopped_tx,
        ));

        Ok(RunningMonitor {
            instance: handle.instance,
            commands: handle.commands,
            abort,
            stopped,
        })
    }

    async fn destroy_all(&self, records: Vec<MonitorRecord>) {
        let grace = self.inner.config.shutdown_grace();
        let mut set = JoinSet::new();
        for record in records {
            set.spawn(destroy(record, grace));
        }
        while set.join_next().await.is_some() {}
    }

    fn handle_exit(&self, pane_id: String, instance: Uuid, outcome: ExitOutcome) {
        let failed = self.inner.bus.fail_instance(instance);
        if failed > 0 {
            tracing::debug!(pane_id = %pane_id, failed, "rejected requests to exited monitor");
        }

        let mut records = self.records();
        let current = records
            .get(&pane_id)
            .is_some_and(|record| record.is_instance(instance));
        if !current {
            return;
        }

        let reason = match outcome {
            ExitOutcome::Failed(reason) => reason,
            ExitOutcome::Graceful(exit) => {
                tracing::info!(pane_id = %pane_id, ?exit, "monitor stopped");
                records.remove(&pane_id);
                return;
            }
            ExitOutcome::Aborted => {
                records.remove(&pane_id);
                return;
            }
        };

        let Some(record) = records.get_mut(&pane_id) else {
            return;
        };
        let stable_for = self.inner.config.restart_base_delay() * MAX_RESTART_ATTEMPTS;
        if record.restart_count > 0 && record.started_at.elapsed() >= stable_for {
            tracing::debug!(pane_id = %pane_id, "monitor ran stably, resetting restart count");
            record.restart_count = 0;
        }
        if record.restart_count >= MAX_RESTART_ATTEMPTS {
            let attempts = record.restart_count;
            records.remove(&pane_id);
            drop(records);
            tracing::error!(pane_id = %pane_id, attempts, reason = %reason, "monitor keeps crashing, giving up");
            self.inner.bus.publish(Envelope::new(
                pane_id.clone(),
                MonitorEvent::Error {
                    message: format!(
                        "monitor for {} failed after {} restart attempts: {}",
                        pane_id, attempts, reason
                    ),
                    recoverable: false,
                },
            ));
            return;
        }

        record.restart_count += 1;
        record.slot = Slot::Restarting;
        let attempt = record.restart_count;
        let delay = self.inner.config.restart_base_delay() * attempt;
        tracing::warn!(pane_id = %pane_id, attempt, ?delay, reason = %reason, "monitor crashed, restarting");

        let supervisor = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            supervisor.restart(&pane_id, attempt);
        });
    }

    fn restart(&self, pane_id: &str, attempt: u32) {
        let mut records = self.records();
        let Some(record) = records.get_mut(pane_id) else {
            return;
        };
        if record.restart_count != attempt || !matches!(record.slot, Slot::Restarting) {
            return;
        }

        match self.start(&record.identity) {
            Ok(running) => {
                tracing::info!(pane_id = %pane_id, attempt, "monitor restarted");
                record.slot = Slot::Running(running);
                record.started_at = Instant::now();
            }
            Err(e) => {
                tracing::error!(pane_id = %pane_id, error = %e, "failed to restart monitor");
                records.remove(pane_id);
            }
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, MonitorRecord>> {
        self.inner.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn running_monitor<'a>(
    records: &'a HashMap<String, MonitorRecord>,
    pane_id: &str,
) -> Result<&'a RunningMonitor, SupervisorError> {
    let record = records
        .get(pane_id)
        .ok_or_else(|| SupervisorError::MonitorNotFound(pane_id.to_string()))?;
    match &record.slot {
        Slot::Running(m) => Ok(m),
        Slot::Restarting => Err(SupervisorError::MonitorUnavailable(pane_id.to_string())),
    }
}

/// Ask a monitor to stop, then force it after `grace`
async fn destroy(record: MonitorRecord, grace: Duration) {
    let pane_id = record.identity.pane_id;
    let Slot::Running(monitor) = record.slot else {
        return;
    };

    let _ = monitor
        .commands
        .send(Envelope::new(pane_id.as_str(), MonitorCommand::Shutdown));
    if time::timeout(grace, monitor.stopped).await.is_err() {
        tracing::warn!(pane_id = %pane_id, "monitor ignored shutdown, forcing stop");
    }
    monitor.abort.abort();
    tracing::info!(pane_id = %pane_id, "monitor destroyed");
}

/// Forward a monitor's events to the router, then report how it ended
async fn bridge(
    pane_id: String,
    instance: Uuid,
    mut join: tokio::task::JoinHandle<Result<MonitorExit, MonitorError>>,
    mut events: mpsc::UnboundedReceiver<Envelope<MonitorEvent>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    stopped: oneshot::Sender<()>,
) {
    let outcome = loop {
        tokio::select! {
            biased;
            Some(envelope) = events.recv() => {
                let _ = inbound.send(Inbound::Event(envelope));
            }
            result = &mut join => break ExitOutcome::from(result),
        }
    };

    while let Ok(envelope) = events.try_recv() {
        let _ = inbound.send(Inbound::Event(envelope));
    }
    let _ = stopped.send(());
    let _ = inbound.send(Inbound::Exited {
        pane_id,
        instance,
        outcome,
    });
}

async fn route(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(message) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let supervisor = Supervisor { inner };
        match message {
            Inbound::Event(envelope) => supervisor.inner.bus.route(envelope),
            Inbound::Exited {
                pane_id,
                instance,
                outcome,
            } => supervisor.handle_exit(pane_id, instance, outcome),
        }
    }
}
