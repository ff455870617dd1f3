//! Server side of the msgid request protocol.
//!
//! Each request runs in its own task under a child cancellation token keyed
//! by msgid. Handlers stream zero or more `response` frames and the server
//! closes the request with `end`, or `error` on failure. A cancelled request
//! sends nothing further.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_net::RpcFrame;
use parley_shared::constants::DEFAULT_HINT_LIMIT;
use parley_shared::CharacterName;
use parley_store::{DateAnchor, ImportedMessage, LogStore, NewLogMessage, SearchCriteria};

use crate::error::HostError;

struct Running {
    /// Distinguishes a finished request from a later one reusing its msgid.
    serial: u64,
    token: CancellationToken,
}

struct Inner {
    store: LogStore,
    outbound: mpsc::UnboundedSender<RpcFrame>,
    running: Mutex<HashMap<u64, Running>>,
    next_serial: AtomicU64,
    shutdown: CancellationToken,
}

/// Serves one peer connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

impl RpcServer {
    /// Replies go to `outbound`; cancelling `parent` cancels every request.
    pub fn new(
        store: LogStore,
        outbound: mpsc::UnboundedSender<RpcFrame>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                outbound,
                running: Mutex::new(HashMap::new()),
                next_serial: AtomicU64::new(1),
                shutdown: parent.child_token(),
            }),
        }
    }

    pub fn handle(&self, frame: RpcFrame) {
        match frame {
            RpcFrame::Request { msgid, method, params } => self.start(msgid, method, params),
            RpcFrame::Cancel { msgid } => {
                if let Some(running) = self.inner.running.lock().remove(&msgid) {
                    debug!(msgid, "request cancelled by peer");
                    running.token.cancel();
                }
            }
            other => debug!(msgid = other.msgid(), "ignoring reply frame from peer"),
        }
    }

    fn start(&self, msgid: u64, method: String, params: Value) {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let token = {
            let mut running = self.inner.running.lock();
            if running.contains_key(&msgid) {
                drop(running);
                let _ = self.inner.outbound.send(RpcFrame::Error {
                    msgid,
                    message: "duplicate msgid".into(),
                });
                return;
            }
            let token = self.inner.shutdown.child_token();
            running.insert(
                msgid,
                Running {
                    serial,
                    token: token.clone(),
                },
            );
            token
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let responder = Responder {
                msgid,
                outbound: inner.outbound.clone(),
                cancel: token.clone(),
            };
            let result = dispatch(&inner.store, &method, params, &responder).await;
            {
                let mut running = inner.running.lock();
                if running.get(&msgid).is_some_and(|r| r.serial == serial) {
                    running.remove(&msgid);
                }
            }

            if token.is_cancelled() {
                debug!(msgid, %method, "request abandoned");
                return;
            }
            let reply = match result {
                Ok(()) => RpcFrame::End { msgid },
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    warn!(msgid, %method, error = %e, "request failed");
                    RpcFrame::Error {
                        msgid,
                        message: e.client_message(),
                    }
                }
            };
            let _ = inner.outbound.send(reply);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Cancel everything still running. Used when the peer disconnects.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.running.lock().clear();
    }
}

/// Emits `response` frames for one request.
struct Responder {
    msgid: u64,
    outbound: mpsc::UnboundedSender<RpcFrame>,
    cancel: CancellationToken,
}

impl Responder {
    fn send<T: Serialize>(&self, data: &T) -> Result<(), HostError> {
        if self.cancel.is_cancelled() {
            return Err(HostError::Cancelled);
        }
        let frame = RpcFrame::Response {
            msgid: self.msgid,
            data: serde_json::to_value(data)?,
        };
        self.outbound.send(frame).map_err(|_| HostError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMessagesParams {
    channel: String,
    anchor: DateAnchor,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    date: DateTime<Utc>,
    max_entries: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PmConvoMessagesParams {
    me: CharacterName,
    interlocutor: CharacterName,
    anchor: DateAnchor,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    date: DateTime<Utc>,
    max_entries: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HintParams {
    #[serde(default)]
    me: Option<CharacterName>,
    prefix: String,
    #[serde(default = "default_hint_limit")]
    limit: usize,
}

fn default_hint_limit() -> usize {
    DEFAULT_HINT_LIMIT
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    #[serde(default)]
    criteria: SearchCriteria,
    #[serde(default)]
    skip: usize,
    #[serde(default)]
    take: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateParams {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    me: Option<CharacterName>,
    #[serde(default)]
    other: Option<CharacterName>,
    /// Offset of the UI's local time from UTC.
    #[serde(default)]
    utc_offset_minutes: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationParams {
    me: CharacterName,
    #[serde(default)]
    other: Option<CharacterName>,
    #[serde(default = "default_hint_limit")]
    limit: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogChannelParams {
    channel: String,
    #[serde(default)]
    title: Option<String>,
    message: NewLogMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogPmParams {
    me: CharacterName,
    interlocutor: CharacterName,
    message: NewLogMessage,
}

#[derive(Deserialize)]
struct ChannelParams {
    channel: String,
}

#[derive(Deserialize)]
struct IdsParams {
    ids: Vec<i64>,
}

#[derive(Deserialize)]
struct ImportParams {
    messages: Vec<ImportedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpireParams {
    retention_days: u64,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, HostError> {
    Ok(serde_json::from_value(value)?)
}

fn offset(minutes: i32) -> Result<FixedOffset, HostError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| HostError::BadRequest(format!("utc offset out of range: {minutes}")))
}

async fn dispatch(
    store: &LogStore,
    method: &str,
    raw: Value,
    out: &Responder,
) -> Result<(), HostError> {
    let cancel = &out.cancel;
    match method {
        "logs.channelMessages" => {
            let p: ChannelMessagesParams = params(raw)?;
            let rows = store
                .get_channel_messages(&p.channel, p.anchor, p.date, p.max_entries, cancel)
                .await?;
            out.send(&rows)
        }
        "logs.pmConvoMessages" => {
            let p: PmConvoMessagesParams = params(raw)?;
            let rows = store
                .get_pm_convo_messages(&p.me, &p.interlocutor, p.anchor, p.date, p.max_entries, cancel)
                .await?;
            out.send(&rows)
        }
        "logs.channelHints" => {
            let p: HintParams = params(raw)?;
            out.send(&store.get_channel_hints_from_partial_name(&p.prefix, p.limit, cancel).await?)
        }
        "logs.pmConvoHints" => {
            let p: HintParams = params(raw)?;
            let me = p
                .me
                .ok_or_else(|| HostError::BadRequest("`me` is required".into()))?;
            out.send(
                &store
                    .get_pm_convo_hints_from_partial_name(&me, &p.prefix, p.limit, cancel)
                    .await?,
            )
        }
        "logs.searchCount" => {
            let p: SearchParams = params(raw)?;
            out.send(&store.get_search_result_count(p.criteria, cancel).await?)
        }
        "logs.searchIds" => {
            let p: SearchParams = params(raw)?;
            out.send(&store.get_search_result_ids(p.criteria, p.skip, p.take, cancel).await?)
        }
        "logs.searchSubset" => {
            // One response per message so the UI can render progressively.
            let p: SearchParams = params(raw)?;
            let rows = store
                .get_search_result_subset(p.criteria, p.skip, p.take, cancel)
                .await?;
            for row in &rows {
                out.send(row)?;
            }
            Ok(())
        }
        "logs.messagesByIds" => {
            let p: IdsParams = params(raw)?;
            out.send(&store.get_messages_by_ids(p.ids, cancel).await?)
        }
        "logs.channelDates" => {
            let p: DateParams = params(raw)?;
            let channel = p
                .channel
                .ok_or_else(|| HostError::BadRequest("`channel` is required".into()))?;
            let tz = offset(p.utc_offset_minutes)?;
            out.send(&store.get_channel_message_dates(&channel, tz, cancel).await?)
        }
        "logs.pmConvoDates" => {
            let p: DateParams = params(raw)?;
            let (Some(me), Some(other)) = (p.me, p.other) else {
                return Err(HostError::BadRequest("`me` and `other` are required".into()));
            };
            let tz = offset(p.utc_offset_minutes)?;
            out.send(&store.get_pm_conversation_dates(&me, &other, tz, cancel).await?)
        }
        "logs.recentConversations" => {
            let p: ConversationParams = params(raw)?;
            out.send(&store.get_recent_conversations(&p.me, p.limit, cancel).await?)
        }
        "logs.validateChannel" => {
            let p: ChannelParams = params(raw)?;
            out.send(&store.validate_channel_in_logs(&p.channel, cancel).await?)
        }
        "logs.validatePmConvo" => {
            let p: ConversationParams = params(raw)?;
            let other = p
                .other
                .ok_or_else(|| HostError::BadRequest("`other` is required".into()))?;
            out.send(&store.validate_pm_convo_in_logs(&p.me, &other, cancel).await?)
        }
        "logs.logChannelMessage" => {
            let p: LogChannelParams = params(raw)?;
            let title = p.title.unwrap_or_else(|| p.channel.clone());
            out.send(&store.log_channel_message(&p.channel, &title, p.message, cancel).await?)
        }
        "logs.logPmConvoMessage" => {
            let p: LogPmParams = params(raw)?;
            out.send(
                &store
                    .log_pm_convo_message(&p.me, &p.interlocutor, p.message, cancel)
                    .await?,
            )
        }
        "logs.import" => {
            let p: ImportParams = params(raw)?;
            out.send(&store.import_messages(p.messages, cancel).await?)
        }
        "logs.expire" => {
            let p: ExpireParams = params(raw)?;
            let retention = Duration::from_secs(p.retention_days.saturating_mul(86_400));
            out.send(&store.perform_expiration(retention, cancel).await?)
        }
        "logs.fileSize" => out.send(&store.get_log_file_size(cancel).await?),
        "logs.vacuum" => {
            store.vacuum_database(cancel).await?;
            Ok(())
        }
        other => Err(HostError::UnknownMethod(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_net::RpcClient;
    use parley_shared::{Gender, LogMessageType, OnlineStatus};
    use serde_json::json;

    fn message(speaker: &str, text: &str, ms: i64) -> NewLogMessage {
        NewLogMessage {
            speaker: CharacterName::new(speaker),
            gender: Gender::Female,
            status: OnlineStatus::Online,
            message_type: LogMessageType::Chat,
            text: text.to_string(),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
        }
    }

    async fn seeded_store() -> LogStore {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        for (i, text) in ["hello there", "general kenobi", "hello again"].iter().enumerate() {
            store
                .log_channel_message("Lobby", "The Lobby", message("Bob", text, 1_000 * i as i64), &cancel)
                .await
                .unwrap();
        }
        store
    }

    /// Wire a client to a server over in-process channels.
    fn connect(store: LogStore) -> (RpcClient, RpcServer, CancellationToken) {
        let root = CancellationToken::new();
        let (client, mut to_server) = RpcClient::new();
        let (to_client, mut from_server) = mpsc::unbounded_channel();
        let server = RpcServer::new(store, to_client, &root);

        let pump_server = server.clone();
        tokio::spawn(async move {
            while let Some(frame) = to_server.recv().await {
                pump_server.handle(frame);
            }
        });
        let pump_client = client.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_server.recv().await {
                pump_client.dispatch(frame);
            }
        });
        (client, server, root)
    }

    #[tokio::test]
    async fn test_search_over_rpc() {
        let (client, _server, _root) = connect(seeded_store().await);
        let cancel = CancellationToken::new();

        let count: i64 = client
            .call("logs.searchCount", json!({ "criteria": { "textContains": "hello" } }), &cancel)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let rows = client
            .request_stream(
                "logs.searchSubset",
                json!({ "criteria": { "textContains": "hello" }, "skip": 0, "take": 10 }),
            )
            .unwrap()
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["text"], "hello again");
        assert_eq!(rows[1]["text"], "hello there");
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_not_cross_delivered() {
        let (client, _server, _root) = connect(seeded_store().await);
        let cancel = CancellationToken::new();

        let (valid, missing, hints) = tokio::join!(
            client.call::<bool>("logs.validateChannel", json!({ "channel": "Lobby" }), &cancel),
            client.call::<bool>("logs.validateChannel", json!({ "channel": "Nowhere" }), &cancel),
            client.call::<Value>("logs.channelHints", json!({ "prefix": "lob" }), &cancel),
        );
        assert!(valid.unwrap());
        assert!(!missing.unwrap());
        assert_eq!(hints.unwrap()[0]["title"], "The Lobby");
    }

    #[tokio::test]
    async fn test_errors_become_error_frames() {
        let (client, _server, _root) = connect(seeded_store().await);
        let cancel = CancellationToken::new();

        let unknown = client.call::<Value>("logs.nope", json!({}), &cancel).await;
        assert!(matches!(unknown, Err(parley_net::RpcError::Remote(m)) if m.contains("logs.nope")));

        let bad = client.call::<Value>("logs.channelMessages", json!({ "channel": 5 }), &cancel).await;
        assert!(matches!(bad, Err(parley_net::RpcError::Remote(m)) if m.starts_with("Invalid params")));
    }

    #[tokio::test]
    async fn test_channel_dates_in_offset() {
        let (client, _server, _root) = connect(seeded_store().await);
        let cancel = CancellationToken::new();
        let dates: Vec<String> = client
            .call(
                "logs.channelDates",
                json!({ "channel": "Lobby", "utcOffsetMinutes": -60 }),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(dates, vec!["1969-12-31".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_request_sends_nothing() {
        let store = seeded_store().await;
        let root = CancellationToken::new();
        let (to_client, mut from_server) = mpsc::unbounded_channel();
        let server = RpcServer::new(store.clone(), to_client, &root);

        // Hold the connection so the request queues behind it.
        let busy = CancellationToken::new();
        let blocker = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .with_database(&busy, |_| {
                        std::thread::sleep(std::time::Duration::from_millis(200));
                        Ok(())
                    })
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        server.handle(RpcFrame::Request {
            msgid: 1,
            method: "logs.searchCount".into(),
            params: json!({}),
        });
        server.handle(RpcFrame::Cancel { msgid: 1 });

        blocker.await.unwrap().unwrap();
        for _ in 0..100 {
            if server.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(from_server.try_recv().is_err());
    }
}
