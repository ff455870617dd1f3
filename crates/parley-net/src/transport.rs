//! STOMP over WebSocket.
//!
//! [`StompClient`] owns one WebSocket. Reads are sequential (one reader at a
//! time holds the read half); writes go through an async mutex so frames
//! never interleave. The first error of any kind marks the client broken and
//! every later call fails fast: reconnecting is the session manager's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_shared::constants::{
    CHARACTER_HEADER, MAX_FRAME_SIZE, RESUME_HEADER, SESSION_HEADER, STOMP_HEARTBEAT_MS,
    STOMP_SUBPROTOCOL, STOMP_VERSION,
};

use crate::error::TransportError;
use crate::frame::{Heartbeat, StompCodec, StompFrame, StompItem};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the server gets to answer CONNECT.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Everything needed to open one firehose connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// STOMP virtual host.
    pub host: String,
    pub login: String,
    pub passcode: String,
    pub character: Option<String>,
    /// Session id of the previous connection, offered for resumption.
    pub resume_session: Option<String>,
    /// Our heart-beat offer `(send_ms, receive_ms)`.
    pub heartbeat: (u64, u64),
}

impl ConnectRequest {
    pub fn new(url: &str, login: &str, passcode: &str) -> Self {
        Self {
            url: url.to_string(),
            host: host_of(url),
            login: login.to_string(),
            passcode: passcode.to_string(),
            character: None,
            resume_session: None,
            heartbeat: (STOMP_HEARTBEAT_MS, STOMP_HEARTBEAT_MS),
        }
    }

    /// The CONNECT frame for this request.
    pub fn connect_frame(&self) -> StompFrame {
        let mut frame = StompFrame::new("CONNECT")
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", self.host.as_str())
            .with_header(
                "heart-beat",
                format!("{},{}", self.heartbeat.0, self.heartbeat.1),
            )
            .with_header("login", self.login.as_str())
            .with_header("passcode", self.passcode.as_str());
        if let Some(character) = &self.character {
            frame = frame.with_header(CHARACTER_HEADER, character.as_str());
        }
        if let Some(previous) = &self.resume_session {
            frame = frame.with_header(RESUME_HEADER, previous.as_str());
        }
        frame
    }
}

fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority).to_string()
}

/// A connected, framed transport.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Session id the server assigned in CONNECTED.
    fn session_id(&self) -> Option<&str>;

    /// Negotiated heart-beat intervals.
    fn heartbeat(&self) -> Heartbeat;

    /// Next frame, skipping heart-beats. `Ok(None)` on graceful close.
    async fn read(&self, cancel: &CancellationToken) -> Result<Option<StompFrame>, TransportError>;

    async fn write(&self, frame: StompFrame, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Send a bare EOL.
    async fn send_heartbeat(&self, cancel: &CancellationToken) -> Result<(), TransportError>;
}

/// Opens transports; the session manager owns one of these.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn FrameTransport>, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket link
// ---------------------------------------------------------------------------

struct ReadHalf {
    stream: SplitStream<WsStream>,
    buf: BytesMut,
    codec: StompCodec,
}

struct Link {
    reader: Mutex<ReadHalf>,
    writer: Mutex<SplitSink<WsStream, Message>>,
    broken: AtomicBool,
}

impl Link {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            reader: Mutex::new(ReadHalf {
                stream,
                buf: BytesMut::new(),
                codec: StompCodec::new(MAX_FRAME_SIZE),
            }),
            writer: Mutex::new(sink),
            broken: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.broken.load(Ordering::Acquire) {
            Err(TransportError::Broken)
        } else {
            Ok(())
        }
    }

    fn fail(&self, e: TransportError) -> TransportError {
        if !e.is_cancelled() {
            self.broken.store(true, Ordering::Release);
        }
        e
    }

    async fn read_item(&self, cancel: &CancellationToken) -> Result<Option<StompItem>, TransportError> {
        self.check()?;
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.reader.lock() => guard,
        };
        let ReadHalf { stream, buf, codec } = &mut *guard;

        loop {
            match codec.decode(buf) {
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }

            // Dropping `next()` loses nothing, so the read can be abandoned.
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => buf.extend_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
                Some(Ok(Message::Close(close))) => {
                    debug!(?close, "firehose socket closed by server");
                    self.broken.store(true, Ordering::Release);
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(self.fail(e.into())),
                None => {
                    self.broken.store(true, Ordering::Release);
                    return Ok(None);
                }
            }
        }
    }

    async fn read_frame(&self, cancel: &CancellationToken) -> Result<Option<StompFrame>, TransportError> {
        loop {
            match self.read_item(cancel).await? {
                Some(StompItem::Frame(frame)) => return Ok(Some(frame)),
                Some(StompItem::Heartbeat) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn write_item(&self, item: StompItem, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.check()?;
        let mut encoded = BytesMut::new();
        StompCodec::new(MAX_FRAME_SIZE).encode(item, &mut encoded)?;
        let message = match String::from_utf8(encoded.to_vec()) {
            Ok(text) => Message::text(text),
            Err(raw) => Message::binary(raw.into_bytes()),
        };

        let mut sink = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            sink = self.writer.lock() => sink,
        };
        let sent = tokio::select! {
            _ = cancel.cancelled() => {
                // A half-written message leaves the socket unusable.
                self.broken.store(true, Ordering::Release);
                return Err(TransportError::Cancelled);
            }
            sent = sink.send(message) => sent,
        };
        sent.map_err(|e| self.fail(e.into()))
    }
}

// ---------------------------------------------------------------------------
// StompClient
// ---------------------------------------------------------------------------

/// A STOMP session over one WebSocket.
pub struct StompClient {
    link: Link,
    session_id: Option<String>,
    heartbeat: Heartbeat,
}

impl StompClient {
    /// Open the socket, send CONNECT and wait for CONNECTED.
    pub async fn connect(request: &ConnectRequest, cancel: &CancellationToken) -> Result<Self, TransportError> {
        let mut upgrade = request.url.as_str().into_client_request()?;
        upgrade
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(STOMP_SUBPROTOCOL));

        let (ws, _response) = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            opened = connect_async(upgrade) => opened?,
        };
        let link = Link::new(ws);

        link.write_item(StompItem::Frame(request.connect_frame()), cancel)
            .await?;
        let first = tokio::time::timeout(CONNECT_TIMEOUT, link.read_frame(cancel))
            .await
            .map_err(|_| TransportError::Timeout("CONNECTED"))??;

        let Some(connected) = first else {
            return Err(TransportError::Connect("socket closed during handshake".into()));
        };
        match connected.command.as_str() {
            "CONNECTED" => {}
            "ERROR" => return Err(classify_error_frame(&connected)),
            other => {
                return Err(TransportError::Connect(format!(
                    "expected CONNECTED, got {other}"
                )))
            }
        }

        let heartbeat = Heartbeat::negotiate(request.heartbeat, connected.header("heart-beat"))?;
        let session_id = connected.header(SESSION_HEADER).map(str::to_string);
        debug!(
            session = session_id.as_deref().unwrap_or("-"),
            version = connected.header("version").unwrap_or("-"),
            ?heartbeat,
            "STOMP session established"
        );

        Ok(Self {
            link,
            session_id,
            heartbeat,
        })
    }
}

/// Map a handshake ERROR frame to a transport error.
pub fn classify_error_frame(frame: &StompFrame) -> TransportError {
    let message = frame
        .header("message")
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned());
    let lower = message.to_lowercase();
    if lower.contains("unauthori") || lower.contains("ticket") || lower.contains("login") {
        warn!(%message, "firehose rejected credentials");
        TransportError::Unauthorized(message)
    } else {
        TransportError::Connect(message)
    }
}

#[async_trait]
impl FrameTransport for StompClient {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Option<StompFrame>, TransportError> {
        self.link.read_frame(cancel).await
    }

    async fn write(&self, frame: StompFrame, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.link.write_item(StompItem::Frame(frame), cancel).await
    }

    async fn send_heartbeat(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.link.write_item(StompItem::Heartbeat, cancel).await
    }
}

/// Production connector: one [`StompClient`] per connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn FrameTransport>, TransportError> {
        let client = StompClient::connect(request, cancel).await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame_headers() {
        let mut request = ConnectRequest::new("wss://chat.example.net:443/firehose", "acct", "tkt");
        request.character = Some("Alice".into());
        request.resume_session = Some("s-1".into());

        let frame = request.connect_frame();
        assert_eq!(frame.command, "CONNECT");
        assert_eq!(frame.header("host"), Some("chat.example.net"));
        assert_eq!(frame.header("accept-version"), Some("1.2"));
        assert_eq!(frame.header(RESUME_HEADER), Some("s-1"));
        assert_eq!(frame.header(CHARACTER_HEADER), Some("Alice"));
        assert_eq!(frame.header("heart-beat"), Some("10000,10000"));
    }

    #[test]
    fn test_no_resume_header_on_first_connect() {
        let request = ConnectRequest::new("ws://localhost/firehose", "a", "b");
        assert!(request.connect_frame().header(RESUME_HEADER).is_none());
    }

    #[test]
    fn test_error_frame_classification() {
        let denied = StompFrame::new("ERROR").with_header("message", "Invalid ticket");
        assert!(classify_error_frame(&denied).is_unauthorized());

        let other = StompFrame::new("ERROR").with_body("server overloaded");
        assert!(matches!(classify_error_frame(&other), TransportError::Connect(m) if m == "server overloaded"));
    }
}
