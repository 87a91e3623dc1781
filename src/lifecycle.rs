use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::message::now_ms;

/// Close markers older than this are considered abandoned
pub const STALE_CLOSE_AGE: Duration = Duration::from_secs(30);

/// A resource that is being closed on purpose
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockEntry {
    pub reason: String,
    /// Epoch milliseconds when the close began
    pub timestamp: u64,
    #[serde(skip)]
    pub started: Instant,
}

/// Diagnostics emitted by the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StaleOperationCleaned {
        resource_id: String,
        reason: String,
        age: Duration,
    },
}

/// Per-resource operation locks plus markers for resources closed on purpose
pub struct LifecycleGuard {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    closing: Mutex<HashMap<String, LockEntry>>,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Prunes the lock table entry once its last user is gone
struct LockSlot<'a> {
    guard: &'a LifecycleGuard,
    id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockSlot<'_> {
    fn drop(&mut self) {
        let mut locks = lock_table(&self.guard.locks);
        let unused = locks
            .get(self.id)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(&self.lock) == 2);
        if unused {
            locks.remove(self.id);
        }
    }
}

/// Clears a close marker however the close ends
struct CloseMarker<'a> {
    guard: &'a LifecycleGuard,
    id: &'a str,
}

impl Drop for CloseMarker<'_> {
    fn drop(&mut self) {
        self.guard.complete_close(self.id);
    }
}

impl LifecycleGuard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            locks: Mutex::new(HashMap::new()),
            closing: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Run `operation` while holding the exclusive lock for `id`. Callers
    /// for the same id queue in arrival order; the lock is released however
    /// the operation ends.
    pub async fn with_lock<F, T>(&self, id: &str, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = lock_table(&self.locks)
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let slot = LockSlot {
            guard: self,
            id,
            lock,
        };

        let _held = slot.lock.lock().await;
        operation.await
    }

    /// Whether an operation currently holds the lock for `id`
    pub fn is_locked(&self, id: &str) -> bool {
        lock_table(&self.locks)
            .get(id)
            .is_some_and(|l| l.try_lock().is_err())
    }

    /// Mark `id` as being closed on purpose
    pub fn begin_close(&self, id: &str, reason: &str) {
        self.mark_closing_at(id, reason, Instant::now());
    }

    /// Clear the close marker for `id`, returning whether one existed
    pub fn complete_close(&self, id: &str) -> bool {
        self.closing().remove(id).is_some()
    }

    pub fn is_closing(&self, id: &str) -> bool {
        self.closing().contains_key(id)
    }

    /// Whether disappearance of `id` is expected right now
    pub fn is_expected_removal(&self, id: &str) -> bool {
        self.is_closing(id) || self.is_locked(id)
    }

    pub fn closing_entry(&self, id: &str) -> Option<LockEntry> {
        self.closing().get(id).cloned()
    }

    /// Bracket `operation` with a close marker and the resource lock
    pub async fn guarded_close<F, T>(&self, id: &str, reason: &str, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        self.begin_close(id, reason);
        let _marker = CloseMarker { guard: self, id };
        self.with_lock(id, operation).await
    }

    /// Drop close markers older than [`STALE_CLOSE_AGE`], returning their ids
    pub fn cleanup_stale_operations(&self) -> Vec<String> {
        self.cleanup_stale_operations_at(Instant::now())
    }

    /// Sweep stale close markers every `interval` until the task is aborted
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_stale_operations();
                if !removed.is_empty() {
                    tracing::debug!(count = removed.len(), "swept stale close markers");
                }
            }
        })
    }

    fn cleanup_stale_operations_at(&self, now: Instant) -> Vec<String> {
        let stale: Vec<(String, LockEntry)> = {
            let mut closing = self.closing();
            let ids: Vec<String> = closing
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.started) > STALE_CLOSE_AGE)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| closing.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        stale
            .into_iter()
            .map(|(id, entry)| {
                let age = now.saturating_duration_since(entry.started);
                tracing::warn!(resource_id = %id, reason = %entry.reason, ?age, "close never completed, clearing marker");
                let _ = self.events.send(LifecycleEvent::StaleOperationCleaned {
                    resource_id: id.clone(),
                    reason: entry.reason,
                    age,
                });
                id
            })
            .collect()
    }

    fn mark_closing_at(&self, id: &str, reason: &str, started: Instant) {
        tracing::debug!(resource_id = %id, reason, "close started");
        self.closing().insert(
            id.to_string(),
            LockEntry {
                reason: reason.to_string(),
                timestamp: now_ms(),
                started,
            },
        );
    }

    fn closing(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.closing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_table(
    locks: &Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    locks.lock().unwrap_or_else(|e| e.into_inner())
}
