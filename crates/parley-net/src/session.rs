//! Firehose session manager.
//!
//! Owns the transport lifecycle: connects, resumes, subscribes, and runs the
//! per-connection loops until one of them ends, then reconnects with
//! backoff. It never gives up on its own; [`FirehoseManager::dispose`] is
//! the only way out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_shared::constants::{
    APP_HEARTBEAT_SECS, DEFAULT_FIREHOSE_URL, GENERAL_QUEUE, RECONNECT_BACKOFF_MAX_MS,
    RECONNECT_BACKOFF_MIN_MS, SEND_DESTINATION, SESSION_QUEUE_PREFIX, STOMP_HEARTBEAT_MS,
};
use parley_shared::protocol::{Decoded, IncomingMessage, MessageRegistry, OutgoingMessage};
use parley_shared::ConnectionStatus;

use crate::error::{ApiError, FirehoseError, TransportError};
use crate::frame::StompFrame;
use crate::status::StatusFanout;
use crate::transport::{classify_error_frame, ConnectRequest, FrameTransport, TransportConnector};

/// Pongs may be missing for this many ping intervals before the connection
/// is considered dead.
const MISSED_PONGS: u32 = 3;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What consumers of the firehose receive.
#[derive(Debug, Clone, PartialEq)]
pub enum FirehoseEvent {
    /// The server session changed. Anything not yet seen must be backfilled
    /// from the log rather than assumed contiguous.
    StreamBroken { session_id: Option<String> },
    Message(IncomingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseCredentials {
    pub login: String,
    pub passcode: String,
    pub character: Option<String>,
}

/// Supplies credentials for each connect attempt.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `force_refresh` is set after the server rejected the last ones.
    async fn credentials(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<FirehoseCredentials, ApiError>;
}

#[derive(Debug, Clone)]
pub struct FirehoseConfig {
    pub url: String,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Interval of application-level pings.
    pub app_heartbeat: Duration,
    /// Our STOMP heart-beat offer `(send_ms, receive_ms)`.
    pub stomp_heartbeat: (u64, u64),
    /// A session must stay up this long before the reconnect backoff resets.
    pub stable_after: Duration,
    pub event_buffer: usize,
    pub outgoing_buffer: usize,
    /// Receives MESSAGE frames the registry does not know and frames with
    /// unexpected commands.
    pub diagnostics: Option<mpsc::UnboundedSender<StompFrame>>,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FIREHOSE_URL.to_string(),
            backoff_min: Duration::from_millis(RECONNECT_BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(RECONNECT_BACKOFF_MAX_MS),
            app_heartbeat: Duration::from_secs(APP_HEARTBEAT_SECS),
            stomp_heartbeat: (STOMP_HEARTBEAT_MS, STOMP_HEARTBEAT_MS),
            stable_after: Duration::from_secs(APP_HEARTBEAT_SECS),
            event_buffer: 256,
            outgoing_buffer: 64,
            diagnostics: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager handle
// ---------------------------------------------------------------------------

pub struct FirehoseManager {
    outgoing: mpsc::Sender<OutgoingMessage>,
    status: StatusFanout,
    session_id: Arc<RwLock<Option<String>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FirehoseManager {
    /// Start the connection loop. Events arrive on the returned receiver.
    pub fn spawn(
        config: FirehoseConfig,
        connector: Arc<dyn TransportConnector>,
        credentials: Arc<dyn CredentialSource>,
        registry: Arc<MessageRegistry>,
    ) -> (Self, mpsc::Receiver<FirehoseEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_buffer.max(1));
        let status = StatusFanout::new();
        let session_id = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        let runner = Runner {
            config: Arc::new(config),
            connector,
            credentials,
            registry,
            events: event_tx,
            outgoing: Arc::new(Mutex::new(outgoing_rx)),
            status: status.clone(),
            session_id: Arc::clone(&session_id),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run());

        let manager = Self {
            outgoing: outgoing_tx,
            status,
            session_id,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (manager, event_rx)
    }

    /// Queue for outgoing messages. It survives reconnects.
    pub fn sender(&self) -> mpsc::Sender<OutgoingMessage> {
        self.outgoing.clone()
    }

    pub async fn send(&self, message: OutgoingMessage, cancel: &CancellationToken) -> Result<(), FirehoseError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FirehoseError::Cancelled),
            sent = self.outgoing.send(message) => sent.map_err(|_| FirehoseError::Disposed),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn status(&self) -> &StatusFanout {
        &self.status
    }

    /// Stop the loop and wait for it. Idempotent.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "firehose task ended abnormally");
            }
        }
        self.status.publish(ConnectionStatus::Disconnected);
    }
}

impl Drop for FirehoseManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    /// A session ended after `uptime`. Only one that outlived `stable_after`
    /// resets the delay; a server that accepts and drops keeps backing off.
    fn session_ended(&mut self, uptime: Duration, stable_after: Duration) {
        if uptime >= stable_after {
            self.reset();
        }
    }

    /// Exponential delay with jitter in `[d/2, d]`.
    fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let full = self.min.saturating_mul(factor).min(self.max);
        let half = full / 2;
        let jitter_ms = half.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        half + Duration::from_millis(extra)
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

struct Runner {
    config: Arc<FirehoseConfig>,
    connector: Arc<dyn TransportConnector>,
    credentials: Arc<dyn CredentialSource>,
    registry: Arc<MessageRegistry>,
    events: mpsc::Sender<FirehoseEvent>,
    outgoing: Arc<Mutex<mpsc::Receiver<OutgoingMessage>>>,
    status: StatusFanout,
    session_id: Arc<RwLock<Option<String>>>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff_min, self.config.backoff_max);
        let mut previous: Option<String> = None;
        let mut force_refresh = false;

        while !self.cancel.is_cancelled() {
            self.status.publish(ConnectionStatus::Connecting);

            match self.connect(previous.clone(), force_refresh).await {
                Ok(transport) => {
                    force_refresh = false;

                    let session = transport.session_id().map(str::to_string);
                    if session.is_none() || session != previous {
                        info!(
                            previous = previous.as_deref().unwrap_or("-"),
                            session = session.as_deref().unwrap_or("-"),
                            "firehose session changed"
                        );
                        let broken = FirehoseEvent::StreamBroken {
                            session_id: session.clone(),
                        };
                        if !self.emit(broken).await {
                            break;
                        }
                    }
                    previous = session.clone();
                    *self.session_id.write() = session;

                    let started = Instant::now();
                    match self.run_session(transport).await {
                        Ok(()) => debug!("firehose connection closed"),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!(error = %e, "firehose connection lost"),
                    }
                    backoff.session_ended(started.elapsed(), self.config.stable_after);
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    if matches!(
                        &e,
                        FirehoseError::Transport(t) if t.is_unauthorized()
                    ) || matches!(&e, FirehoseError::Credentials(a) if a.is_unauthorized())
                    {
                        force_refresh = true;
                    }
                    warn!(error = %e, "firehose connect failed");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.status.publish(ConnectionStatus::Connecting);
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting firehose");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.publish(ConnectionStatus::Disconnected);
        debug!("firehose loop stopped");
    }

    async fn connect(
        &self,
        resume: Option<String>,
        force_refresh: bool,
    ) -> Result<Arc<dyn FrameTransport>, FirehoseError> {
        let creds = self
            .credentials
            .credentials(force_refresh, &self.cancel)
            .await?;

        let mut request = ConnectRequest::new(&self.config.url, &creds.login, &creds.passcode);
        request.character = creds.character;
        request.resume_session = resume;
        request.heartbeat = self.config.stomp_heartbeat;

        Ok(self.connector.connect(&request, &self.cancel).await?)
    }

    async fn emit(&self, event: FirehoseEvent) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Subscribe, then run the four loops until the first one ends.
    async fn run_session(&self, transport: Arc<dyn FrameTransport>) -> Result<(), TransportError> {
        subscribe(transport.as_ref(), &self.cancel).await?;
        self.status.publish(ConnectionStatus::Connected);

        let session_cancel = self.cancel.child_token();
        let last_pong = Arc::new(RwLock::new(Instant::now()));
        let mut loops = JoinSet::new();

        loops.spawn(stomp_heartbeat_loop(
            Arc::clone(&transport),
            session_cancel.clone(),
        ));
        loops.spawn(app_heartbeat_loop(
            Arc::clone(&transport),
            self.config.app_heartbeat,
            Arc::clone(&last_pong),
            session_cancel.clone(),
        ));
        loops.spawn(receive_loop(ReceiveContext {
            transport: Arc::clone(&transport),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            diagnostics: self.config.diagnostics.clone(),
            last_pong,
            cancel: session_cancel.clone(),
        }));
        loops.spawn(send_loop(
            Arc::clone(&transport),
            Arc::clone(&self.outgoing),
            session_cancel.clone(),
        ));

        let first = loops.join_next().await;
        session_cancel.cancel();
        while loops.join_next().await.is_some() {}

        match first {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                warn!(error = %e, "firehose loop panicked");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

async fn subscribe(transport: &dyn FrameTransport, cancel: &CancellationToken) -> Result<(), TransportError> {
    let general = StompFrame::new("SUBSCRIBE")
        .with_header("id", "general")
        .with_header("destination", GENERAL_QUEUE)
        .with_header("ack", "client-individual");
    transport.write(general, cancel).await?;

    if let Some(session) = transport.session_id() {
        let scoped = StompFrame::new("SUBSCRIBE")
            .with_header("id", "session")
            .with_header("destination", format!("{SESSION_QUEUE_PREFIX}{session}"))
            .with_header("ack", "client-individual");
        transport.write(scoped, cancel).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-connection loops
// ---------------------------------------------------------------------------

async fn stomp_heartbeat_loop(
    transport: Arc<dyn FrameTransport>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let Some(period) = transport.heartbeat().send else {
        cancel.cancelled().await;
        return Ok(());
    };
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => transport.send_heartbeat(&cancel).await?,
        }
    }
}

async fn app_heartbeat_loop(
    transport: Arc<dyn FrameTransport>,
    period: Duration,
    last_pong: Arc<RwLock<Instant>>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if last_pong.read().elapsed() > period * MISSED_PONGS {
            return Err(TransportError::Timeout("application pong"));
        }
        transport.write(send_frame(&OutgoingMessage::Ping)?, &cancel).await?;
    }
}

struct ReceiveContext {
    transport: Arc<dyn FrameTransport>,
    registry: Arc<MessageRegistry>,
    events: mpsc::Sender<FirehoseEvent>,
    diagnostics: Option<mpsc::UnboundedSender<StompFrame>>,
    last_pong: Arc<RwLock<Instant>>,
    cancel: CancellationToken,
}

impl ReceiveContext {
    fn diagnose(&self, frame: StompFrame) {
        match &self.diagnostics {
            Some(sink) => {
                let _ = sink.send(frame);
            }
            None => debug!(
                command = %frame.command,
                body = %String::from_utf8_lossy(&frame.body),
                "unrecognised firehose frame"
            ),
        }
    }
}

async fn receive_loop(ctx: ReceiveContext) -> Result<(), TransportError> {
    // Twice the promised server interval before the connection counts as dead.
    let deadline = ctx.transport.heartbeat().receive.map(|d| d * 2);

    loop {
        let read = ctx.transport.read(&ctx.cancel);
        let next = match deadline {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| TransportError::Timeout("server heart-beat"))??,
            None => read.await?,
        };
        let Some(frame) = next else {
            return Ok(());
        };

        match frame.command.as_str() {
            "MESSAGE" => {
                let ack = frame.header("ack").map(str::to_string);
                match ctx.registry.decode_bytes(&frame.body) {
                    Ok(Decoded::Message(IncomingMessage::Pong)) => {
                        *ctx.last_pong.write() = Instant::now();
                    }
                    Ok(Decoded::Message(message)) => {
                        let sent = tokio::select! {
                            _ = ctx.cancel.cancelled() => return Ok(()),
                            sent = ctx.events.send(FirehoseEvent::Message(message)) => sent,
                        };
                        if sent.is_err() {
                            debug!("firehose consumer gone");
                            return Ok(());
                        }
                    }
                    Ok(Decoded::Unrecognized(_)) => ctx.diagnose(frame),
                    Err(e) => {
                        warn!(error = %e, "undecodable firehose message");
                        ctx.diagnose(frame);
                    }
                }
                if let Some(id) = ack {
                    let ack_frame = StompFrame::new("ACK").with_header("id", id);
                    ctx.transport.write(ack_frame, &ctx.cancel).await?;
                }
            }
            "ERROR" => return Err(classify_error_frame(&frame)),
            "RECEIPT" => debug!(receipt = frame.header("receipt-id").unwrap_or("-"), "receipt"),
            _ => ctx.diagnose(frame),
        }
    }
}

async fn send_loop(
    transport: Arc<dyn FrameTransport>,
    outgoing: Arc<Mutex<mpsc::Receiver<OutgoingMessage>>>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut queue = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        queue = outgoing.lock() => queue,
    };
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = queue.recv() => next,
        };
        let Some(message) = next else {
            // Every sender is gone; nothing more will be queued.
            cancel.cancelled().await;
            return Ok(());
        };
        if let Err(e) = transport.write(send_frame(&message)?, &cancel).await {
            warn!(error = %e, ?message, "dropped outgoing firehose message");
            return Err(e);
        }
    }
}

fn send_frame(message: &OutgoingMessage) -> Result<StompFrame, TransportError> {
    let body = message
        .to_envelope()
        .to_bytes()
        .map_err(|e| TransportError::Frame(e.to_string()))?;
    Ok(StompFrame::new("SEND")
        .with_header("destination", SEND_DESTINATION)
        .with_header("content-type", "application/json")
        .with_body(body))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use parley_shared::NameInterner;

    fn text_of(event: &FirehoseEvent) -> Option<&str> {
        match event {
            FirehoseEvent::Message(IncomingMessage::Channel(m)) => Some(m.text.as_str()),
            _ => None,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<FirehoseEvent>) -> FirehoseEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for firehose event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_new_session_id_emits_exactly_one_stream_broken() {
        let connector = Arc::new(FakeConnector::default());
        let (a, feed_a) = FakeTransport::new("A");
        let (b, feed_b) = FakeTransport::new("B");
        connector.scripted.lock().extend([Arc::clone(&a), Arc::clone(&b)]);

        let registry = Arc::new(MessageRegistry::new(Arc::new(NameInterner::new())));
        let (manager, mut events) = FirehoseManager::spawn(
            fast_config(),
            connector.clone(),
            Arc::new(StaticCredentials),
            registry,
        );

        assert_eq!(
            next(&mut events).await,
            FirehoseEvent::StreamBroken { session_id: Some("A".into()) }
        );
        feed_a.send(chat_frame("m1", "on A")).unwrap();
        assert_eq!(text_of(&next(&mut events).await), Some("on A"));

        // Forced disconnect; the next connection gets a different session.
        drop(feed_a);
        assert_eq!(
            next(&mut events).await,
            FirehoseEvent::StreamBroken { session_id: Some("B".into()) }
        );
        feed_b.send(chat_frame("m2", "on B")).unwrap();
        assert_eq!(text_of(&next(&mut events).await), Some("on B"));
        assert_eq!(manager.session_id().as_deref(), Some("B"));

        let requests = connector.requests.lock().clone();
        assert_eq!(requests[0].resume_session, None);
        assert_eq!(requests[1].resume_session.as_deref(), Some("A"));
        assert_eq!(requests[1].character.as_deref(), Some("Alice"));

        let a_commands = a.commands();
        assert_eq!(&a_commands[..2], ["SUBSCRIBE", "SUBSCRIBE"]);
        assert!(a_commands.contains(&"ACK".to_string()));

        manager.dispose().await;
        assert_eq!(manager.status().current(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_resumed_session_does_not_break_stream() {
        let connector = Arc::new(FakeConnector::default());
        let (first, feed_first) = FakeTransport::new("same");
        let (second, feed_second) = FakeTransport::new("same");
        connector.scripted.lock().extend([first, second]);

        let registry = Arc::new(MessageRegistry::new(Arc::new(NameInterner::new())));
        let (manager, mut events) = FirehoseManager::spawn(
            fast_config(),
            connector.clone(),
            Arc::new(StaticCredentials),
            registry,
        );

        assert!(matches!(next(&mut events).await, FirehoseEvent::StreamBroken { .. }));
        drop(feed_first);
        feed_second.send(chat_frame("m1", "still here")).unwrap();
        assert_eq!(text_of(&next(&mut events).await), Some("still here"));

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_outgoing_messages_are_framed() {
        let connector = Arc::new(FakeConnector::default());
        let (a, _feed_a) = FakeTransport::new("A");
        connector.scripted.lock().push_back(Arc::clone(&a));

        let registry = Arc::new(MessageRegistry::new(Arc::new(NameInterner::new())));
        let (manager, mut events) = FirehoseManager::spawn(
            fast_config(),
            connector,
            Arc::new(StaticCredentials),
            registry,
        );
        let _ = next(&mut events).await;

        let cancel = CancellationToken::new();
        manager
            .send(
                OutgoingMessage::ChannelMessage { channel: "Lobby".into(), text: "hello".into() },
                &cancel,
            )
            .await
            .unwrap();

        let mut sent = None;
        for _ in 0..100 {
            sent = a.written.lock().iter().find(|f| f.is("SEND")).cloned();
            if sent.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = sent.expect("SEND frame written");
        assert_eq!(sent.header("destination"), Some(SEND_DESTINATION));
        let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
        assert_eq!(body["type"], "sendChannelMessage");

        manager.dispose().await;
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        for _ in 0..10 {
            let d = backoff.next_delay();
            assert!(d <= Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(50));
        }
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn test_short_session_keeps_backing_off() {
        let stable = Duration::from_secs(30);
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.session_ended(Duration::from_millis(10), stable);
        assert!(backoff.next_delay() >= Duration::from_millis(800));

        backoff.session_ended(stable, stable);
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_flapping_server_backs_off() {
        let connector = Arc::new(FakeConnector::default());
        for i in 0..4 {
            // Handshake succeeds, then the server hangs up straight away.
            let (transport, feed) = FakeTransport::new(&format!("S{i}"));
            drop(feed);
            connector.scripted.lock().push_back(transport);
        }

        let config = FirehoseConfig {
            backoff_min: Duration::from_millis(20),
            backoff_max: Duration::from_secs(5),
            stable_after: Duration::from_secs(3600),
            ..fast_config()
        };
        let registry = Arc::new(MessageRegistry::new(Arc::new(NameInterner::new())));
        let (manager, mut events) = FirehoseManager::spawn(
            config,
            connector.clone(),
            Arc::new(StaticCredentials),
            registry,
        );
        for _ in 0..4 {
            assert!(matches!(next(&mut events).await, FirehoseEvent::StreamBroken { .. }));
        }

        // Delays of at least 10, 20 and 40 ms; a reset after each handshake
        // would keep every delay at 20 ms or less.
        let attempts = connector.attempts.lock().clone();
        assert!(attempts.len() >= 4);
        assert!(attempts[3] - attempts[0] >= Duration::from_millis(70));

        manager.dispose().await;
    }
}
