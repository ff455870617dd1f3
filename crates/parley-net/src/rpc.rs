//! Request/response multiplexing over one message stream.
//!
//! Requests carry a `msgid`; the peer answers with any number of `response`
//! frames followed by `end`, or a single `error`. Either side may send
//! `cancel` to stop a request early.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RpcError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum RpcFrame {
    Request {
        msgid: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        msgid: u64,
        data: Value,
    },
    End {
        msgid: u64,
    },
    Error {
        msgid: u64,
        message: String,
    },
    Cancel {
        msgid: u64,
    },
}

impl RpcFrame {
    pub fn msgid(&self) -> u64 {
        match self {
            RpcFrame::Request { msgid, .. }
            | RpcFrame::Response { msgid, .. }
            | RpcFrame::End { msgid }
            | RpcFrame::Error { msgid, .. }
            | RpcFrame::Cancel { msgid } => *msgid,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, RpcError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, RpcError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

enum Reply {
    Data(Value),
    End,
    Error(String),
}

struct ClientInner {
    next_msgid: AtomicU64,
    /// `None` once the client has been closed.
    pending: Mutex<Option<HashMap<u64, mpsc::UnboundedSender<Reply>>>>,
    outbound: mpsc::UnboundedSender<RpcFrame>,
}

impl ClientInner {
    fn forget(&self, msgid: u64) -> bool {
        self.pending
            .lock()
            .as_mut()
            .is_some_and(|pending| pending.remove(&msgid).is_some())
    }
}

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// A client plus the stream of frames it wants sent to the peer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RpcFrame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(ClientInner {
                next_msgid: AtomicU64::new(1),
                pending: Mutex::new(Some(HashMap::new())),
                outbound,
            }),
        };
        (client, rx)
    }

    pub fn request_stream(&self, method: &str, params: impl Serialize) -> Result<RpcStream, RpcError> {
        let params = serde_json::to_value(params)?;
        let msgid = self.inner.next_msgid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        match self.inner.pending.lock().as_mut() {
            Some(pending) => pending.insert(msgid, tx),
            None => return Err(RpcError::Closed),
        };

        let frame = RpcFrame::Request {
            msgid,
            method: method.to_string(),
            params,
        };
        if self.inner.outbound.send(frame).is_err() {
            self.inner.forget(msgid);
            return Err(RpcError::Closed);
        }

        Ok(RpcStream {
            msgid,
            rx,
            inner: Arc::clone(&self.inner),
            finished: false,
        })
    }

    /// Single-answer request: the first `response` is the result. The
    /// stream is read through its `end` so no `cancel` goes out for a
    /// request that completed normally.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError> {
        let mut stream = self.request_stream(method, params)?;
        let Some(data) = stream.next(cancel).await? else {
            return Err(RpcError::Empty);
        };
        while let Some(extra) = stream.next(cancel).await? {
            debug!(msgid = stream.msgid(), ?extra, "ignoring extra response to single-answer call");
        }
        Ok(serde_json::from_value(data)?)
    }

    /// Route a frame from the peer to its waiter. Returns false for frames
    /// that do not belong to a pending request.
    pub fn dispatch(&self, frame: RpcFrame) -> bool {
        let msgid = frame.msgid();
        let mut guard = self.inner.pending.lock();
        let Some(pending) = guard.as_mut() else {
            return false;
        };

        let (reply, last) = match frame {
            RpcFrame::Response { data, .. } => (Reply::Data(data), false),
            RpcFrame::End { .. } => (Reply::End, true),
            RpcFrame::Error { message, .. } => (Reply::Error(message), true),
            RpcFrame::Request { .. } | RpcFrame::Cancel { .. } => return false,
        };

        let delivered = match pending.get(&msgid) {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!(msgid, "reply for unknown request");
                return false;
            }
        };
        if last || !delivered {
            pending.remove(&msgid);
        }
        true
    }

    /// Fail every pending request with [`RpcError::Closed`] and refuse new
    /// ones.
    pub fn close(&self) {
        self.inner.pending.lock().take();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().as_ref().map_or(0, HashMap::len)
    }
}

/// Replies to one request. Dropping it before the end cancels the request.
pub struct RpcStream {
    msgid: u64,
    rx: mpsc::UnboundedReceiver<Reply>,
    inner: Arc<ClientInner>,
    finished: bool,
}

impl RpcStream {
    pub fn msgid(&self) -> u64 {
        self.msgid
    }

    /// The next `response` payload, or `None` after `end`.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Value>, RpcError> {
        if self.finished {
            return Ok(None);
        }
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abandon();
                return Err(RpcError::Cancelled);
            }
            reply = self.rx.recv() => reply,
        };
        match reply {
            Some(Reply::Data(data)) => Ok(Some(data)),
            Some(Reply::End) => {
                self.finished = true;
                Ok(None)
            }
            Some(Reply::Error(message)) => {
                self.finished = true;
                Err(RpcError::Remote(message))
            }
            None => {
                self.finished = true;
                Err(RpcError::Closed)
            }
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<Vec<Value>, RpcError> {
        let mut items = Vec::new();
        while let Some(item) = self.next(cancel).await? {
            items.push(item);
        }
        Ok(items)
    }

    fn abandon(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.inner.forget(self.msgid) {
            let _ = self.inner.outbound.send(RpcFrame::Cancel { msgid: self.msgid });
        }
    }
}

impl Drop for RpcStream {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let frame = RpcFrame::Request {
            msgid: 7,
            method: "logs.search".into(),
            params: json!({ "text": "hi" }),
        };
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["cmd"], "request");
        assert_eq!(value["msgid"], 7);

        let end = RpcFrame::from_json(r#"{"cmd":"end","msgid":3}"#).unwrap();
        assert_eq!(end, RpcFrame::End { msgid: 3 });
        assert!(RpcFrame::from_json(r#"{"cmd":"bogus","msgid":3}"#).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_their_own_replies() {
        let (client, mut outbound) = RpcClient::new();
        let cancel = CancellationToken::new();

        // Echo server that answers in reverse order of arrival.
        let server_client = client.clone();
        let server = tokio::spawn(async move {
            let mut requests = Vec::new();
            while requests.len() < 3 {
                if let Some(RpcFrame::Request { msgid, params, .. }) = outbound.recv().await {
                    requests.push((msgid, params));
                }
            }
            for (msgid, params) in requests.into_iter().rev() {
                server_client.dispatch(RpcFrame::Response { msgid, data: params });
                server_client.dispatch(RpcFrame::End { msgid });
            }
            outbound
        });

        let (a, b, c) = tokio::join!(
            client.call::<String>("echo", "a", &cancel),
            client.call::<String>("echo", "b", &cancel),
            client.call::<String>("echo", "c", &cancel),
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert_eq!(c.unwrap(), "c");
        assert_eq!(client.pending_count(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_call_sends_no_cancel() {
        let (client, mut outbound) = RpcClient::new();
        let cancel = CancellationToken::new();

        let server_client = client.clone();
        let server = tokio::spawn(async move {
            let Some(RpcFrame::Request { msgid, .. }) = outbound.recv().await else {
                panic!("expected a request");
            };
            server_client.dispatch(RpcFrame::Response { msgid, data: json!(42) });
            tokio::task::yield_now().await;
            server_client.dispatch(RpcFrame::End { msgid });
            outbound
        });

        let answer: i64 = client.call("logs.fileSize", (), &cancel).await.unwrap();
        assert_eq!(answer, 42);
        assert_eq!(client.pending_count(), 0);

        let mut outbound = server.await.unwrap();
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_until_end() {
        let (client, _outbound) = RpcClient::new();
        let cancel = CancellationToken::new();
        let stream = client.request_stream("logs.dates", ()).unwrap();
        let msgid = stream.msgid();

        assert!(client.dispatch(RpcFrame::Response { msgid, data: json!(1) }));
        assert!(client.dispatch(RpcFrame::Response { msgid, data: json!(2) }));
        assert!(client.dispatch(RpcFrame::End { msgid }));
        assert!(!client.dispatch(RpcFrame::End { msgid }));

        assert_eq!(stream.collect(&cancel).await.unwrap(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (client, _outbound) = RpcClient::new();
        let cancel = CancellationToken::new();
        let mut stream = client.request_stream("logs.search", ()).unwrap();
        client.dispatch(RpcFrame::Error {
            msgid: stream.msgid(),
            message: "boom".into(),
        });
        assert!(matches!(stream.next(&cancel).await, Err(RpcError::Remote(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn test_cancel_sends_cancel_frame() {
        let (client, mut outbound) = RpcClient::new();
        let cancel = CancellationToken::new();
        let mut stream = client.request_stream("logs.search", ()).unwrap();
        let msgid = stream.msgid();
        assert!(matches!(outbound.recv().await, Some(RpcFrame::Request { .. })));

        cancel.cancel();
        assert!(stream.next(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(outbound.recv().await, Some(RpcFrame::Cancel { msgid }));
        assert_eq!(client.pending_count(), 0);

        // Late replies are ignored.
        assert!(!client.dispatch(RpcFrame::Response { msgid, data: json!(1) }));
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let (client, _outbound) = RpcClient::new();
        let cancel = CancellationToken::new();
        let mut stream = client.request_stream("logs.search", ()).unwrap();
        client.close();
        assert!(matches!(stream.next(&cancel).await, Err(RpcError::Closed)));
        assert!(matches!(client.request_stream("x", ()), Err(RpcError::Closed)));
    }
}
