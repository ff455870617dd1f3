/// Application name
pub const APP_NAME: &str = "Parley";

/// STOMP protocol version we negotiate
pub const STOMP_VERSION: &str = "1.2";

/// WebSocket subprotocol announced during the upgrade
pub const STOMP_SUBPROTOCOL: &str = "v12.stomp";

/// Maximum size of a single STOMP frame in bytes (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Client-side STOMP heart-beat interval in milliseconds
pub const STOMP_HEARTBEAT_MS: u64 = 10_000;

/// Application-level ping interval in seconds
pub const APP_HEARTBEAT_SECS: u64 = 30;

/// Reconnect backoff bounds in milliseconds
pub const RECONNECT_BACKOFF_MIN_MS: u64 = 1_000;
pub const RECONNECT_BACKOFF_MAX_MS: u64 = 60_000;

/// Default firehose endpoint
pub const DEFAULT_FIREHOSE_URL: &str = "wss://chat.f-list.net/firehose";

/// Default platform API base URL
pub const DEFAULT_API_BASE: &str = "https://www.f-list.net";

/// Queue every login subscribes to
pub const GENERAL_QUEUE: &str = "/user/queue/general";

/// Prefix of the per-session queue; the session id is appended
pub const SESSION_QUEUE_PREFIX: &str = "/user/queue/session/";

/// Destination for outgoing application messages
pub const SEND_DESTINATION: &str = "/app/firehose";

/// Header carrying the server-assigned session id on CONNECTED
pub const SESSION_HEADER: &str = "session";

/// Header carrying the previous session id on CONNECT
pub const RESUME_HEADER: &str = "x-resume-session";

/// Header carrying the logged-in character on CONNECT
pub const CHARACTER_HEADER: &str = "x-character";

/// Default upper bound for autocomplete hint lookups
pub const DEFAULT_HINT_LIMIT: usize = 20;

/// Default local endpoint for the UI (host service)
pub const DEFAULT_HTTP_PORT: u16 = 7450;
