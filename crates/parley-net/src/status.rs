//! Connectivity status broadcast.
//!
//! Subscribers live in a copy-on-write map. `publish` records the new value
//! and delivers it while holding the subscriber lock, so every subscriber
//! sees changes in the order they were recorded. Delivery is an unbounded
//! send and never waits on a subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_shared::ConnectionStatus;

type Subscribers = Arc<HashMap<u64, mpsc::UnboundedSender<ConnectionStatus>>>;

struct Inner {
    current: AtomicU8,
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

#[derive(Clone)]
pub struct StatusFanout {
    inner: Arc<Inner>,
}

impl StatusFanout {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                current: AtomicU8::new(ConnectionStatus::Disconnected as u8),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Arc::new(HashMap::new())),
            }),
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        ConnectionStatus::from_byte(self.inner.current.load(Ordering::Acquire))
    }

    /// Record `status` and notify subscribers if it changed.
    pub fn publish(&self, status: ConnectionStatus) {
        let subscribers = self.inner.subscribers.lock();
        let previous = self.inner.current.swap(status as u8, Ordering::AcqRel);
        if previous == status as u8 {
            return;
        }
        tracing::debug!(?status, "connection status changed");

        for tx in subscribers.values() {
            let _ = tx.send(status);
        }
    }

    /// Subscribe to changes. The current value is delivered first.
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self.inner.subscribers.lock();
            let _ = tx.send(self.current());
            let mut next = HashMap::clone(&subscribers);
            next.insert(id, tx);
            *subscribers = Arc::new(next);
        }
        StatusSubscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for StatusFanout {
    fn default() -> Self {
        Self::new()
    }
}

/// A live status subscription; unsubscribes on drop.
pub struct StatusSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionStatus>,
    owner: Weak<Inner>,
}

impl StatusSubscription {
    pub async fn recv(&mut self) -> Option<ConnectionStatus> {
        self.rx.recv().await
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            let mut subscribers = inner.subscribers.lock();
            if subscribers.contains_key(&self.id) {
                let mut next = HashMap::clone(&subscribers);
                next.remove(&self.id);
                *subscribers = Arc::new(next);
            }
        }
    }
}
