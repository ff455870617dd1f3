//! # parley-host
//!
//! Backend service for the Parley chat client.
//!
//! This binary provides:
//! - the **chat log store**, migrated at startup and expired periodically
//! - the **firehose** connection, persisting every channel and private
//!   message it delivers
//! - the **request protocol** (msgid multiplexed JSON over a local
//!   WebSocket) through which the UI reads and searches the logs

mod api;
mod bridge;
mod config;
mod error;
mod rpc_server;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_net::{
    FirehoseConfig, FirehoseFanout, FirehoseManager, HttpAuthenticator, RetryingSession,
    WebSocketConnector,
};
use parley_shared::protocol::MessageRegistry;
use parley_shared::NameInterner;
use parley_store::LogStore;

use crate::api::AppState;
use crate::config::{FirehoseLogin, HostConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_host=debug,parley_net=debug")),
        )
        .init();

    info!("Starting Parley host v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = HostConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the log store; a failed migration aborts startup
    // -----------------------------------------------------------------------
    let store = LogStore::open(config.log_db.clone()).await?;
    let shutdown = CancellationToken::new();

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------
    if !config.retention.is_zero() {
        spawn_expiration(store.clone(), config.retention, config.expiration_interval, shutdown.clone());
    }

    let firehose = match &config.firehose {
        Some(login) => Some(start_firehose(login, store.clone(), shutdown.clone())),
        None => {
            info!("No firehose login configured; serving logs only");
            None
        }
    };

    // -----------------------------------------------------------------------
    // 5. Serve the UI until Ctrl+C
    // -----------------------------------------------------------------------
    let state = AppState {
        store: store.clone(),
        firehose: firehose.clone(),
        shutdown: shutdown.clone(),
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                shutdown.cancel();
                if let Some(firehose) = &firehose {
                    firehose.dispose().await;
                }
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    shutdown.cancel();
    if let Some(firehose) = &firehose {
        firehose.dispose().await;
    }
    store.close();
    Ok(())
}

fn spawn_expiration(store: LogStore, retention: Duration, every: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match store.perform_expiration(retention, &shutdown).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "log expiration failed"),
            }
        }
    });
}

fn start_firehose(login: &FirehoseLogin, store: LogStore, shutdown: CancellationToken) -> Arc<FirehoseManager> {
    let authenticator = HttpAuthenticator::with_base(
        &login.api_base,
        &login.account,
        &login.password,
        Some(login.character.clone()),
    );
    let session = Arc::new(RetryingSession::new(Arc::new(authenticator)));
    let names = Arc::new(NameInterner::new());
    let registry = Arc::new(MessageRegistry::new(Arc::clone(&names)));

    let config = FirehoseConfig {
        url: login.url.clone(),
        ..FirehoseConfig::default()
    };
    let (manager, events) = FirehoseManager::spawn(config, Arc::new(WebSocketConnector), session, registry);
    let manager = Arc::new(manager);

    let fanout = Arc::new(FirehoseFanout::spawn(events));
    let me = names.intern(&login.character);
    tokio::spawn(bridge::run_log_bridge(fanout.reader(), store, me, shutdown.clone()));

    let mut status = manager.status().subscribe();
    tokio::spawn(async move {
        // Keeps the fan-out alive for as long as the host runs.
        let _fanout = fanout;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = status.recv() => match next {
                    Some(status) => info!(?status, "firehose status"),
                    None => break,
                },
            }
        }
    });

    info!(character = %login.character, url = %login.url, "firehose started");
    manager
}
