use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::error::AdapterError;
use crate::tmux::PaneAdapter;

#[derive(Clone)]
enum Failure {
    NotFound(String),
    Command(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Panic,
    Hang,
}

/// Adapter that replays a fixed list of captures, repeating the last one
pub struct ScriptedAdapter {
    captures: Mutex<VecDeque<String>>,
    failure: Mutex<Option<Failure>>,
    mode: Mutex<Mode>,
    release: Notify,
    capture_count: AtomicUsize,
    sent_keys: Mutex<Vec<String>>,
    control_calls: Mutex<Vec<String>>,
    resize_failure: Mutex<Option<String>>,
}

impl ScriptedAdapter {
    pub fn new<I, S>(captures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            captures: Mutex::new(captures.into_iter().map(Into::into).collect()),
            failure: Mutex::new(None),
            mode: Mutex::new(Mode::Normal),
            release: Notify::new(),
            capture_count: AtomicUsize::new(0),
            sent_keys: Mutex::new(Vec::new()),
            control_calls: Mutex::new(Vec::new()),
            resize_failure: Mutex::new(None),
        }
    }

    /// Make every capture fail with `error`
    pub fn fail_with(&self, error: AdapterError) {
        let failure = match error {
            AdapterError::PaneNotFound(pane) => Failure::NotFound(pane),
            other => Failure::Command(other.to_string()),
        };
        *self.failure.lock().unwrap() = Some(failure);
    }

    /// Make every capture panic
    pub fn panic_on_capture(&self) {
        *self.mode.lock().unwrap() = Mode::Panic;
    }

    /// Make every capture block until [`release_hang_with_panic`] is called
    pub fn hang_on_capture(&self) {
        *self.mode.lock().unwrap() = Mode::Hang;
    }

    pub fn release_hang_with_panic(&self) {
        self.release.notify_waiters();
    }

    pub fn capture_count(&self) -> usize {
        self.capture_count.load(Ordering::SeqCst)
    }

    pub fn sent_keys(&self) -> Vec<String> {
        self.sent_keys.lock().unwrap().clone()
    }

    /// Make every resize fail with a command error
    pub fn fail_resize(&self, message: &str) {
        *self.resize_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Resize and refresh calls in order, e.g. `resize %1 120x40`, `refresh`
    pub fn control_calls(&self) -> Vec<String> {
        self.control_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaneAdapter for ScriptedAdapter {
    async fn capture(&self, pane_id: &str, _lines: usize) -> Result<String, AdapterError> {
        self.capture_count.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Panic => panic!("scripted capture panic for {}", pane_id),
            Mode::Hang => {
                self.release.notified().await;
                panic!("scripted capture panic for {}", pane_id);
            }
            Mode::Normal => {}
        }

        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(Failure::NotFound(pane)) => return Err(AdapterError::PaneNotFound(pane)),
            Some(Failure::Command(message)) => return Err(AdapterError::Command(message)),
            None => {}
        }

        let mut captures = self.captures.lock().unwrap();
        let capture = if captures.len() > 1 {
            captures.pop_front().unwrap_or_default()
        } else {
            captures.front().cloned().unwrap_or_default()
        };
        Ok(capture)
    }

    async fn send_keys(&self, _pane_id: &str, keys: &str) -> Result<(), AdapterError> {
        self.sent_keys.lock().unwrap().push(keys.to_string());
        Ok(())
    }

    async fn resize(&self, pane_id: &str, width: u16, height: u16) -> Result<(), AdapterError> {
        self.control_calls
            .lock()
            .unwrap()
            .push(format!("resize {} {}x{}", pane_id, width, height));
        match self.resize_failure.lock().unwrap().clone() {
            Some(message) => Err(AdapterError::Command(message)),
            None => Ok(()),
        }
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        self.control_calls.lock().unwrap().push("refresh".to_string());
        Ok(())
    }
}
