//! Fan-out of one firehose event stream to many readers.
//!
//! A single pump task drains the manager's receiver and copies every event
//! to each registered reader. A reader that joins after a session has been
//! seen starts with a synthetic `StreamBroken`, so it never assumes it saw
//! the stream from the beginning.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::FirehoseEvent;

type Readers = Arc<Vec<(u64, mpsc::UnboundedSender<FirehoseEvent>)>>;

struct State {
    readers: Readers,
    next_id: u64,
    /// `None` until the first `StreamBroken`; then the latest session id.
    session: Option<Option<String>>,
    closed: bool,
}

pub struct FirehoseFanout {
    state: Arc<Mutex<State>>,
    pump: JoinHandle<()>,
}

impl FirehoseFanout {
    pub fn spawn(mut events: mpsc::Receiver<FirehoseEvent>) -> Self {
        let state = Arc::new(Mutex::new(State {
            readers: Arc::new(Vec::new()),
            next_id: 1,
            session: None,
            closed: false,
        }));

        let pump_state = Arc::clone(&state);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // Record the session and snapshot under one lock so a reader
                // registering concurrently gets either the marker or the event.
                let readers = {
                    let mut state = pump_state.lock();
                    if let FirehoseEvent::StreamBroken { session_id } = &event {
                        state.session = Some(session_id.clone());
                    }
                    Arc::clone(&state.readers)
                };
                for (_, tx) in readers.iter() {
                    let _ = tx.send(event.clone());
                }
            }
            let mut state = pump_state.lock();
            state.closed = true;
            state.readers = Arc::new(Vec::new());
            debug!("firehose fan-out finished");
        });

        Self { state, pump }
    }

    /// Register a new reader. It only sees events published after this call.
    pub fn reader(&self) -> FirehoseReader {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if !state.closed {
            if let Some(session_id) = &state.session {
                let _ = tx.send(FirehoseEvent::StreamBroken {
                    session_id: session_id.clone(),
                });
            }
            let mut next = Vec::clone(&state.readers);
            next.push((id, tx));
            state.readers = Arc::new(next);
        }

        FirehoseReader {
            id,
            rx,
            state: Arc::clone(&self.state),
        }
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }
}

impl Drop for FirehoseFanout {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub struct FirehoseReader {
    id: u64,
    rx: mpsc::UnboundedReceiver<FirehoseEvent>,
    state: Arc<Mutex<State>>,
}

impl FirehoseReader {
    /// Next event, or `None` once the upstream has ended.
    pub async fn recv(&mut self) -> Option<FirehoseEvent> {
        self.rx.recv().await
    }
}

impl Drop for FirehoseReader {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.readers.iter().any(|(id, _)| *id == self.id) {
            let next = state
                .readers
                .iter()
                .filter(|(id, _)| *id != self.id)
                .cloned()
                .collect();
            state.readers = Arc::new(next);
        }
    }
}
