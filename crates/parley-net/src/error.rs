use thiserror::Error;

/// Errors from the STOMP transport. Every one of them is fatal to the
/// transport instance that produced it.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The handshake completed but the server did not answer CONNECTED.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The server refused the presented credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// An earlier error already invalidated this transport.
    #[error("Transport is no longer usable")]
    Broken,

    #[error("Operation cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

/// Errors from the platform HTTP API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The session ticket was rejected. Recoverable by logging in again.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an application-level error message.
    #[error("API error: {0}")]
    Api(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Errors surfaced by the firehose session manager to its callers.
#[derive(Error, Debug)]
pub enum FirehoseError {
    #[error("Firehose manager has been disposed")]
    Disposed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Credential error: {0}")]
    Credentials(#[from] ApiError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FirehoseError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            FirehoseError::Cancelled => true,
            FirehoseError::Transport(e) => e.is_cancelled(),
            FirehoseError::Credentials(e) => e.is_cancelled(),
            FirehoseError::Disposed => false,
        }
    }
}

/// Errors from the msgid request multiplexer.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The peer answered with an `error` frame.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The connection closed before the request finished.
    #[error("Connection closed")]
    Closed,

    /// `call` received `end` without any response.
    #[error("Empty response")]
    Empty,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl RpcError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }
}
