use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::{AdapterError, MonitorError};
use crate::message::{
    Ack, ActivityState, AnalysisReason, CaptureSnapshot, Envelope, MonitorCommand, MonitorEvent,
};
use crate::tmux::heuristics::{has_working_indicator, is_user_typing};
use crate::tmux::{AgentKind, PaneAdapter};

/// Captures kept in the rolling history
pub const HISTORY_CAPACITY: usize = 5;

/// Captures needed before change detection kicks in
pub const MIN_SAMPLES: usize = 3;

/// Minimum gap between analysis requests for new static content
pub const REANALYSIS_COOLDOWN: Duration = Duration::from_millis(5000);

/// Time given to the final message before the task exits
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(100);

/// Who a monitor watches and how often
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorIdentity {
    pub pane_id: String,
    pub tmux_pane_id: String,
    pub agent: Option<AgentKind>,
    pub poll_interval_ms: u64,
}

/// Something the tracker wants reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    StatusChanged {
        previous: ActivityState,
        current: ActivityState,
    },
    AnalysisNeeded(AnalysisReason),
}

/// Pure activity state machine fed one capture per poll.
#[derive(Debug)]
pub struct ActivityTracker {
    agent: Option<AgentKind>,
    state: ActivityState,
    history: VecDeque<String>,
    idle_confirmed: bool,
    last_static: Option<String>,
    last_analysis_request: Option<Instant>,
}

impl ActivityTracker {
    pub fn new(agent: Option<AgentKind>) -> Self {
        Self {
            agent,
            state: ActivityState::Idle,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            idle_confirmed: false,
            last_static: None,
            last_analysis_request: None,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn idle_confirmed(&self) -> bool {
        self.idle_confirmed
    }

    /// Feed one capture taken at `now`
    pub fn observe(&mut self, capture: &str, now: Instant) -> Vec<Signal> {
        let mut signals = Vec::new();

        if has_working_indicator(capture, self.agent) {
            self.set_state(ActivityState::Working, &mut signals);
            self.idle_confirmed = false;
            self.history.clear();
            self.history.push_back(capture.to_string());
            return signals;
        }

        if self.state == ActivityState::Working {
            self.set_state(ActivityState::Analyzing, &mut signals);
            self.request_analysis(now, &mut signals);
            self.history.clear();
            return signals;
        }

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(capture.to_string());
        if self.history.len() < MIN_SAMPLES {
            return signals;
        }

        let first = &self.history[0];
        let is_static = self.history.iter().all(|c| c == first);

        if !is_static {
            let len = self.history.len();
            if is_user_typing(&self.history[len - 2], &self.history[len - 1]) {
                tracing::trace!("change looks like typing");
            } else if self.idle_confirmed {
                tracing::trace!("idle confirmed, ignoring activity");
            } else if self.state != ActivityState::Analyzing {
                self.set_state(ActivityState::Analyzing, &mut signals);
                self.request_analysis(now, &mut signals);
            }
            return signals;
        }

        if self.last_static.as_deref() != Some(capture) {
            self.last_static = Some(capture.to_string());
            if self.idle_confirmed {
                return signals;
            }
            let cooling_down = self
                .last_analysis_request
                .is_some_and(|at| now.duration_since(at) < REANALYSIS_COOLDOWN);
            if !cooling_down && self.state != ActivityState::Analyzing {
                self.set_state(ActivityState::Analyzing, &mut signals);
                self.request_analysis(now, &mut signals);
            }
        }

        signals
    }

    /// Apply a classifier verdict
    pub fn complete_analysis(&mut self, status: ActivityState) -> Option<Signal> {
        if status == ActivityState::Idle {
            self.idle_confirmed = true;
        }
        let mut signals = Vec::new();
        self.set_state(status, &mut signals);
        signals.pop()
    }

    /// Forget recent captures so the next one is treated as new
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn set_state(&mut self, next: ActivityState, signals: &mut Vec<Signal>) {
        if self.state != next {
            signals.push(Signal::StatusChanged {
                previous: self.state,
                current: next,
            });
            self.state = next;
        }
    }

    fn request_analysis(&mut self, now: Instant, signals: &mut Vec<Signal>) {
        self.last_analysis_request = Some(now);
        signals.push(Signal::AnalysisNeeded(AnalysisReason::NewStaticContent));
    }
}

/// How a monitor task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// A shutdown command was honored
    Shutdown,
    /// The pane vanished
    PaneRemoved,
    /// Every command sender was dropped
    Detached,
}

/// Supervisor-side handle to a running monitor task
#[derive(Debug)]
pub struct MonitorHandle {
    pub instance: Uuid,
    pub commands: mpsc::UnboundedSender<Envelope<MonitorCommand>>,
    pub join: JoinHandle<Result<MonitorExit, MonitorError>>,
}

enum Flow {
    Continue,
    Stop(MonitorExit),
}

/// The per-pane poller
pub struct Monitor {
    identity: MonitorIdentity,
    adapter: Arc<dyn PaneAdapter>,
    capture_lines: usize,
    tracker: ActivityTracker,
    outbound: mpsc::UnboundedSender<Envelope<MonitorEvent>>,
    paused_until: Option<Instant>,
}

impl Monitor {
    /// Start a monitor task for `identity`
    pub fn spawn(
        identity: MonitorIdentity,
        adapter: Arc<dyn PaneAdapter>,
        capture_lines: usize,
        outbound: mpsc::UnboundedSender<Envelope<MonitorEvent>>,
    ) -> Result<MonitorHandle, MonitorError> {
        if identity.tmux_pane_id.is_empty() {
            return Err(MonitorError::InvalidIdentity {
                pane_id: identity.pane_id,
                reason: "missing tmux pane id".to_string(),
            });
        }
        if identity.poll_interval_ms == 0 {
            return Err(MonitorError::InvalidIdentity {
                pane_id: identity.pane_id,
                reason: "poll interval must be positive".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Monitor {
            tracker: ActivityTracker::new(identity.agent),
            identity,
            adapter,
            capture_lines,
            outbound,
            paused_until: None,
        };
        let join = tokio::spawn(monitor.run(rx));

        Ok(MonitorHandle {
            instance: Uuid::new_v4(),
            commands: tx,
            join,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Envelope<MonitorCommand>>,
    ) -> Result<MonitorExit, MonitorError> {
        let period = Duration::from_millis(self.identity.poll_interval_ms);
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(pane_id = %self.identity.pane_id, tmux_pane = %self.identity.tmux_pane_id, "monitor started");
        self.emit(MonitorEvent::Ready)?;

        loop {
            let paused = self.paused_until.is_some();
            let resume_at = self.paused_until.unwrap_or_else(Instant::now);

            let flow = tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(envelope) => self.handle_command(envelope).await?,
                    None => Flow::Stop(MonitorExit::Detached),
                },
                _ = time::sleep_until(resume_at), if paused => {
                    self.paused_until = None;
                    ticker.reset();
                    Flow::Continue
                }
                _ = ticker.tick(), if !paused => self.poll().await?,
            };

            if let Flow::Stop(exit) = flow {
                tracing::debug!(pane_id = %self.identity.pane_id, ?exit, "monitor stopped");
                return Ok(exit);
            }
        }
    }

    async fn poll(&mut self) -> Result<Flow, MonitorError> {
        let capture = match self
            .adapter
            .capture(&self.identity.tmux_pane_id, self.capture_lines)
            .await
        {
            Ok(text) => text,
            Err(e) if e.is_pane_not_found() => {
                tracing::info!(pane_id = %self.identity.pane_id, "pane vanished, stopping monitor");
                self.emit(MonitorEvent::PaneRemoved)?;
                return Ok(Flow::Stop(MonitorExit::PaneRemoved));
            }
            Err(e) => {
                self.report_recoverable(&e)?;
                return Ok(Flow::Continue);
            }
        };

        let signals = self.tracker.observe(&capture, Instant::now());
        for signal in signals {
            let event = match signal {
                Signal::StatusChanged { previous, current } => MonitorEvent::StatusChange {
                    status: current,
                    previous,
                },
                Signal::AnalysisNeeded(reason) => MonitorEvent::AnalysisNeeded {
                    snapshot: CaptureSnapshot::new(capture.clone()),
                    reason,
                },
            };
            self.emit(event)?;
        }

        Ok(Flow::Continue)
    }

    async fn handle_command(
        &mut self,
        envelope: Envelope<MonitorCommand>,
    ) -> Result<Flow, MonitorError> {
        let id = envelope.id;
        let target = self.identity.tmux_pane_id.clone();

        let response = match envelope.body {
            MonitorCommand::SendKeys { keys } => {
                let result = self.adapter.send_keys(&target, &keys).await;
                self.tracker.clear_history();
                MonitorEvent::SendKeysResponse(self.ack(result)?)
            }
            MonitorCommand::Resize { width, height } => {
                let result = match self.adapter.resize(&target, width, height).await {
                    Ok(()) => self.adapter.refresh().await,
                    Err(e) => Err(e),
                };
                MonitorEvent::ResizeResponse(self.ack(result)?)
            }
            MonitorCommand::AnalyzeComplete {
                status,
                delay_before_next_check,
            } => {
                if let Some(Signal::StatusChanged { previous, current }) =
                    self.tracker.complete_analysis(status)
                {
                    self.emit(MonitorEvent::StatusChange {
                        status: current,
                        previous,
                    })?;
                }
                if let Some(delay) = delay_before_next_check {
                    self.paused_until = Some(Instant::now() + Duration::from_millis(delay));
                }
                MonitorEvent::AnalyzeCompleteResponse(Ack::ok())
            }
            MonitorCommand::GetStatus => MonitorEvent::GetStatusResponse {
                status: self.tracker.state(),
            },
            MonitorCommand::Shutdown => {
                self.reply(id, MonitorEvent::ShutdownComplete)?;
                time::sleep(SHUTDOWN_FLUSH).await;
                return Ok(Flow::Stop(MonitorExit::Shutdown));
            }
        };

        self.reply(id, response)?;
        Ok(Flow::Continue)
    }

    /// Turn an adapter result into a response, reporting the failure too
    fn ack(&self, result: Result<(), AdapterError>) -> Result<Ack, MonitorError> {
        match result {
            Ok(()) => Ok(Ack::ok()),
            Err(e) => {
                self.report_recoverable(&e)?;
                Ok(Ack::failed(e))
            }
        }
    }

    fn report_recoverable(&self, error: &AdapterError) -> Result<(), MonitorError> {
        tracing::warn!(pane_id = %self.identity.pane_id, error = %error, "pane operation failed");
        self.emit(MonitorEvent::Error {
            message: error.to_string(),
            recoverable: true,
        })
    }

    fn emit(&self, event: MonitorEvent) -> Result<(), MonitorError> {
        self.send(Envelope::new(self.identity.pane_id.clone(), event))
    }

    fn reply(&self, id: Uuid, event: MonitorEvent) -> Result<(), MonitorError> {
        self.send(Envelope::reply(id, self.identity.pane_id.clone(), event))
    }

    fn send(&self, envelope: Envelope<MonitorEvent>) -> Result<(), MonitorError> {
        self.outbound
            .send(envelope)
            .map_err(|_| MonitorError::OutboundClosed(self.identity.pane_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAdapter;

    const PROMPT: &str = "Done.\n> ";
    const WORKING: &str = "✻ Thinking… (3s · esc to interrupt)";

    fn analysis_count(signals: &[Signal]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s, Signal::AnalysisNeeded(_)))
            .count()
    }

    fn feed(tracker: &mut ActivityTracker, captures: &[&str], start: Instant) -> Vec<Signal> {
        captures
            .iter()
            .enumerate()
            .flat_map(|(i, c)| tracker.observe(c, start + Duration::from_secs(i as u64)))
            .collect()
    }

    #[test]
    fn test_shell_typing_stays_idle() {
        let mut tracker = ActivityTracker::new(None);
        let signals = feed(&mut tracker, &["$ ", "$ l", "$ ls"], Instant::now());

        assert!(signals.is_empty());
        assert_eq!(tracker.state(), ActivityState::Idle);
    }

    #[test]
    fn test_working_indicator_resets_history() {
        let mut tracker = ActivityTracker::new(None);
        feed(&mut tracker, &["a", "b"], Instant::now());
        assert_eq!(tracker.history_len(), 2);

        let signals = tracker.observe(WORKING, Instant::now());
        assert_eq!(tracker.state(), ActivityState::Working);
        assert_eq!(tracker.history_len(), 1);
        assert_eq!(
            signals,
            vec![Signal::StatusChanged {
                previous: ActivityState::Idle,
                current: ActivityState::Working
            }]
        );
    }

    #[test]
    fn test_indicator_disappearing_requests_analysis() {
        let mut tracker = ActivityTracker::new(None);
        let signals = feed(&mut tracker, &[WORKING, PROMPT], Instant::now());

        assert_eq!(tracker.state(), ActivityState::Analyzing);
        assert_eq!(analysis_count(&signals), 1);
        assert!(signals.contains(&Signal::AnalysisNeeded(AnalysisReason::NewStaticContent)));
    }

    #[test]
    fn test_identical_captures_after_idle_never_request_analysis() {
        let mut tracker = ActivityTracker::new(None);
        tracker.complete_analysis(ActivityState::Idle);
        let signals = feed(&mut tracker, &[PROMPT; 5], Instant::now());
        assert_eq!(analysis_count(&signals), 0);
    }

    #[test]
    fn test_new_static_content_requests_analysis_once() {
        let mut tracker = ActivityTracker::new(None);
        let signals = feed(&mut tracker, &[PROMPT; 8], Instant::now());
        assert_eq!(analysis_count(&signals), 1);
        assert_eq!(tracker.state(), ActivityState::Analyzing);
    }

    #[test]
    fn test_idle_confirmed_suppresses_until_working() {
        let mut tracker = ActivityTracker::new(None);
        let start = Instant::now();
        tracker.complete_analysis(ActivityState::Idle);
        assert!(tracker.idle_confirmed());

        let signals = feed(
            &mut tracker,
            &["one\n", "one\ntwo\nthree\nfour", "x\ny\nz\nw\nv\nu", "q", "q", "q"],
            start,
        );
        assert_eq!(analysis_count(&signals), 0);

        tracker.observe(WORKING, start + Duration::from_secs(10));
        assert!(!tracker.idle_confirmed());
        let signals = tracker.observe(PROMPT, start + Duration::from_secs(11));
        assert_eq!(analysis_count(&signals), 1);
    }

    #[test]
    fn test_static_cooldown() {
        let mut tracker = ActivityTracker::new(None);
        let start = Instant::now();
        feed(&mut tracker, &[WORKING, PROMPT], start);
        tracker.complete_analysis(ActivityState::Waiting);

        // new static content within 5s of the last request
        let t = start + Duration::from_secs(2);
        let signals: Vec<_> = (0..3)
            .flat_map(|i| tracker.observe("other", t + Duration::from_millis(i * 100)))
            .collect();
        assert_eq!(analysis_count(&signals), 0);
        assert_eq!(tracker.state(), ActivityState::Waiting);

        // and after the cooldown
        let t = start + Duration::from_secs(10);
        let signals: Vec<_> = (0..3)
            .flat_map(|i| tracker.observe("later", t + Duration::from_millis(i * 100)))
            .collect();
        assert_eq!(analysis_count(&signals), 1);
    }

    #[test]
    fn test_idle_never_jumps_to_waiting_from_captures() {
        let mut tracker = ActivityTracker::new(None);
        let captures = ["a", "b", "c", WORKING, "d", "d", "d", "e", "f", "g"];
        for (i, capture) in captures.iter().enumerate() {
            for signal in tracker.observe(capture, Instant::now() + Duration::from_secs(i as u64 * 10)) {
                if let Signal::StatusChanged { current, .. } = signal {
                    assert_ne!(current, ActivityState::Waiting);
                    assert_ne!(current, ActivityState::Idle);
                }
            }
        }
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<Envelope<MonitorEvent>>,
    ) -> Envelope<MonitorEvent> {
        time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    fn identity() -> MonitorIdentity {
        MonitorIdentity {
            pane_id: "work:0.0".into(),
            tmux_pane_id: "%1".into(),
            agent: None,
            poll_interval_ms: 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_working_then_analysis() {
        let adapter = Arc::new(ScriptedAdapter::new([WORKING, PROMPT]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter, 30, tx).unwrap();

        assert_eq!(next_event(&mut rx).await.body, MonitorEvent::Ready);
        assert!(matches!(
            next_event(&mut rx).await.body,
            MonitorEvent::StatusChange { status: ActivityState::Working, .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await.body,
            MonitorEvent::StatusChange { status: ActivityState::Analyzing, .. }
        ));
        match next_event(&mut rx).await.body {
            MonitorEvent::AnalysisNeeded { snapshot, reason } => {
                assert_eq!(snapshot.content, PROMPT);
                assert_eq!(reason, AnalysisReason::NewStaticContent);
            }
            other => panic!("unexpected event {:?}", other),
        }
        handle.join.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_answers_requests_with_same_id() {
        let adapter = Arc::new(ScriptedAdapter::new(["$ "]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter.clone(), 30, tx).unwrap();
        next_event(&mut rx).await;

        let request = Envelope::new("work:0.0", MonitorCommand::SendKeys { keys: "ls".into() });
        handle.commands.send(request.clone()).unwrap();
        let reply = next_event(&mut rx).await;
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.body, MonitorEvent::SendKeysResponse(Ack::ok()));
        assert_eq!(adapter.sent_keys(), vec!["ls".to_string()]);

        let request = Envelope::new("work:0.0", MonitorCommand::GetStatus);
        handle.commands.send(request.clone()).unwrap();
        let reply = next_event(&mut rx).await;
        assert_eq!(reply.id, request.id);
        assert_eq!(
            reply.body,
            MonitorEvent::GetStatusResponse { status: ActivityState::Idle }
        );

        let request = Envelope::new("work:0.0", MonitorCommand::Shutdown);
        handle.commands.send(request.clone()).unwrap();
        let reply = next_event(&mut rx).await;
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.body, MonitorEvent::ShutdownComplete);
        assert_eq!(handle.join.await.unwrap().unwrap(), MonitorExit::Shutdown);
    }

    async fn reply_to(
        rx: &mut mpsc::UnboundedReceiver<Envelope<MonitorEvent>>,
        id: Uuid,
    ) -> (Envelope<MonitorEvent>, Vec<MonitorEvent>) {
        let mut skipped = Vec::new();
        loop {
            let event = next_event(rx).await;
            if event.id == id {
                return (event, skipped);
            }
            skipped.push(event.body);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_forwards_then_refreshes() {
        let adapter = Arc::new(ScriptedAdapter::new(["$ "]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter.clone(), 30, tx).unwrap();
        next_event(&mut rx).await;

        let request = Envelope::new("work:0.0", MonitorCommand::Resize { width: 120, height: 40 });
        handle.commands.send(request.clone()).unwrap();
        let (reply, _) = reply_to(&mut rx, request.id).await;

        assert_eq!(reply.body, MonitorEvent::ResizeResponse(Ack::ok()));
        assert_eq!(
            adapter.control_calls(),
            vec!["resize %1 120x40".to_string(), "refresh".to_string()]
        );
        handle.join.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resize_skips_refresh() {
        let adapter = Arc::new(ScriptedAdapter::new(["$ "]));
        adapter.fail_resize("size too small");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter.clone(), 30, tx).unwrap();
        next_event(&mut rx).await;

        let request = Envelope::new("work:0.0", MonitorCommand::Resize { width: 1, height: 1 });
        handle.commands.send(request.clone()).unwrap();
        let (reply, skipped) = reply_to(&mut rx, request.id).await;

        match reply.body {
            MonitorEvent::ResizeResponse(ack) => {
                assert!(!ack.success);
                assert!(ack.error.unwrap().contains("size too small"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(skipped
            .iter()
            .any(|e| matches!(e, MonitorEvent::Error { recoverable: true, .. })));
        assert_eq!(adapter.control_calls(), vec!["resize %1 1x1".to_string()]);
        assert!(!handle.join.is_finished());
        handle.join.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_pane_stops_monitor() {
        let adapter = Arc::new(ScriptedAdapter::new(Vec::<&str>::new()));
        adapter.fail_with(AdapterError::PaneNotFound("%1".into()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter, 30, tx).unwrap();

        next_event(&mut rx).await;
        assert_eq!(next_event(&mut rx).await.body, MonitorEvent::PaneRemoved);
        assert_eq!(handle.join.await.unwrap().unwrap(), MonitorExit::PaneRemoved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_capture_errors_are_recoverable() {
        let adapter = Arc::new(ScriptedAdapter::new(Vec::<&str>::new()));
        adapter.fail_with(AdapterError::Command("server busy".into()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter, 30, tx).unwrap();

        next_event(&mut rx).await;
        for _ in 0..2 {
            match next_event(&mut rx).await.body {
                MonitorEvent::Error { recoverable, .. } => assert!(recoverable),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(!handle.join.is_finished());
        handle.join.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_delay_pauses_polling() {
        let adapter = Arc::new(ScriptedAdapter::new(["$ "]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Monitor::spawn(identity(), adapter.clone(), 30, tx).unwrap();
        next_event(&mut rx).await;

        let request = Envelope::new(
            "work:0.0",
            MonitorCommand::AnalyzeComplete {
                status: ActivityState::Idle,
                delay_before_next_check: Some(10_000),
            },
        );
        handle.commands.send(request).unwrap();
        next_event(&mut rx).await;

        let before = adapter.capture_count();
        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(adapter.capture_count(), before);

        time::sleep(Duration::from_secs(3)).await;
        assert!(adapter.capture_count() > before);
        handle.join.abort();
    }
}
