use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::error::BusError;
use crate::message::{Envelope, MonitorEvent};

type Reply = Result<MonitorEvent, BusError>;

struct Pending {
    instance: Uuid,
    pane_id: String,
    tx: oneshot::Sender<Reply>,
}

/// A registered interest in the response to one request
#[derive(Debug)]
pub struct ResponseWaiter {
    id: Uuid,
    rx: oneshot::Receiver<Reply>,
}

impl ResponseWaiter {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

pub struct MessageBus {
    pending: Mutex<HashMap<Uuid, Pending>>,
    events: broadcast::Sender<Envelope<MonitorEvent>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Receive every unsolicited monitor event, tagged with its pane id
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<MonitorEvent>> {
        self.events.subscribe()
    }

    /// Register for the response to request `id` sent to monitor `instance`.
    /// Must be called before the request is sent.
    pub fn expect_response(&self, id: Uuid, instance: Uuid, pane_id: &str) -> ResponseWaiter {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id,
            Pending {
                instance,
                pane_id: pane_id.to_string(),
                tx,
            },
        );
        ResponseWaiter { id, rx }
    }

    /// Wait for the matching `<type>-response`, giving up after `timeout`
    pub async fn wait_for_response(
        &self,
        waiter: ResponseWaiter,
        timeout: Duration,
    ) -> Result<MonitorEvent, BusError> {
        let id = waiter.id;
        match tokio::time::timeout(timeout, waiter.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BusError::Cancelled(id)),
            Err(_) => {
                self.cancel(id);
                Err(BusError::Timeout(id))
            }
        }
    }

    /// Drop a registration without resolving it
    pub fn cancel(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    /// Deliver an envelope from a monitor: responses go to their waiter,
    /// everything else is republished
    pub fn route(&self, envelope: Envelope<MonitorEvent>) {
        if envelope.body.is_response() {
            let pending = self.lock().remove(&envelope.id);
            if let Some(pending) = pending {
                let _ = pending.tx.send(Ok(envelope.body));
                return;
            }
            if envelope.body != MonitorEvent::ShutdownComplete {
                tracing::trace!(id = %envelope.id, kind = envelope.body.kind(), "response without waiter");
                return;
            }
        }
        self.publish(envelope);
    }

    pub fn publish(&self, envelope: Envelope<MonitorEvent>) {
        // no subscribers is fine
        let _ = self.events.send(envelope);
    }

    /// Reject every request still waiting on a monitor that exited
    pub fn fail_instance(&self, instance: Uuid) -> usize {
        let failed: Vec<Pending> = {
            let mut pending = self.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| p.instance == instance)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = failed.len();
        for p in failed {
            let _ = p.tx.send(Err(BusError::MonitorExited(p.pane_id)));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}
