use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use parley_net::{FirehoseManager, RpcFrame};
use parley_shared::ConnectionStatus;
use parley_store::LogStore;

use crate::rpc_server::RpcServer;

#[derive(Clone)]
pub struct AppState {
    pub store: LogStore,
    pub firehose: Option<Arc<FirehoseManager>>,
    /// Cancelled on host shutdown; ends every socket and request.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    firehose: Option<ConnectionStatus>,
    session: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        firehose: state.firehose.as_ref().map(|f| f.status().current()),
        session: state.firehose.as_ref().and_then(|f| f.session_id()),
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Run the request protocol over one UI socket until either side closes.
async fn serve_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut replies) = mpsc::unbounded_channel::<RpcFrame>();
    let server = RpcServer::new(state.store.clone(), outbound, &state.shutdown);
    info!("UI connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = replies.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(msgid = frame.msgid(), error = %e, "unserialisable reply");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => match RpcFrame::from_json(&text) {
                Ok(frame) => server.handle(frame),
                Err(e) => warn!(error = %e, "malformed request frame"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "UI socket error");
                break;
            }
        }
    }

    server.shutdown();
    writer.abort();
    info!("UI disconnected");
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_without_firehose() {
        let state = AppState {
            store: LogStore::open_in_memory().unwrap(),
            firehose: None,
            shutdown: CancellationToken::new(),
        };
        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["firehose"].is_null());
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let state = AppState {
            store: LogStore::open_in_memory().unwrap(),
            firehose: None,
            shutdown: CancellationToken::new(),
        };
        let response = build_router(state)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
