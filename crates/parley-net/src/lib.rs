// Firehose client: STOMP over WebSocket, session management with resume,
// the authenticated HTTP API, and the msgid request multiplexer.

pub mod api;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod status;
pub mod transport;

pub use api::{Authenticator, ChatApi, HttpAuthenticator, HttpChatApi, LoginGrant};
pub use error::{ApiError, FirehoseError, RpcError, TransportError};
pub use fanout::{FirehoseFanout, FirehoseReader};
pub use frame::{StompCodec, StompFrame};
pub use retry::RetryingSession;
pub use rpc::{RpcClient, RpcFrame, RpcStream};
pub use session::{CredentialSource, FirehoseConfig, FirehoseCredentials, FirehoseEvent, FirehoseManager};
pub use status::{StatusFanout, StatusSubscription};
pub use transport::{ConnectRequest, FrameTransport, StompClient, TransportConnector, WebSocketConnector};
