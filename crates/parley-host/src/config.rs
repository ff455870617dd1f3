//! Host configuration loaded from environment variables.
//!
//! Everything has a default so the host starts with no configuration at
//! all; the firehose only runs when a full login is supplied.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_API_BASE, DEFAULT_FIREHOSE_URL, DEFAULT_HTTP_PORT};
use parley_store::database::DATABASE_FILE;
use parley_store::Database;

/// Credentials and endpoints for the live firehose.
#[derive(Clone)]
pub struct FirehoseLogin {
    pub url: String,
    pub api_base: String,
    pub account: String,
    pub password: String,
    pub character: String,
}

impl fmt::Debug for FirehoseLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirehoseLogin")
            .field("url", &self.url)
            .field("api_base", &self.api_base)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("character", &self.character)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Log database file.
    /// Env: `PARLEY_LOG_DB`, or `PARLEY_DATA_DIR`/chatlogs.db
    /// Default: platform data directory, else `./data/chatlogs.db`
    pub log_db: PathBuf,

    /// Local endpoint serving `/health` and `/ws`.
    /// Env: `PARLEY_HTTP_ADDR`
    /// Default: `127.0.0.1:7450`
    pub http_addr: SocketAddr,

    /// Messages older than this are expired. Zero keeps everything.
    /// Env: `PARLEY_LOG_RETENTION_DAYS`
    pub retention: Duration,

    /// Env: `PARLEY_EXPIRATION_INTERVAL_SECS`
    /// Default: one hour
    pub expiration_interval: Duration,

    /// Env: `PARLEY_FIREHOSE_URL`, `PARLEY_API_BASE`, `PARLEY_ACCOUNT`,
    /// `PARLEY_PASSWORD`, `PARLEY_CHARACTER`
    pub firehose: Option<FirehoseLogin>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_db: default_log_db(),
            http_addr: ([127, 0, 0, 1], DEFAULT_HTTP_PORT).into(),
            retention: Duration::ZERO,
            expiration_interval: Duration::from_secs(3600),
            firehose: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = var("PARLEY_DATA_DIR").filter(|v| !v.is_empty()) {
            config.log_db = PathBuf::from(dir).join(DATABASE_FILE);
        }
        if let Some(path) = var("PARLEY_LOG_DB").filter(|v| !v.is_empty()) {
            config.log_db = PathBuf::from(path);
        }

        if let Some(addr) = var("PARLEY_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid PARLEY_HTTP_ADDR, using default"),
            }
        }

        if let Some(val) = var("PARLEY_LOG_RETENTION_DAYS") {
            match val.parse::<u64>().ok().and_then(|days| days.checked_mul(24 * 3600)) {
                Some(secs) => config.retention = Duration::from_secs(secs),
                None => tracing::warn!(value = %val, "Invalid PARLEY_LOG_RETENTION_DAYS, keeping logs forever"),
            }
        }

        if let Some(val) = var("PARLEY_EXPIRATION_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.expiration_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_EXPIRATION_INTERVAL_SECS, using default"),
            }
        }

        let account = var("PARLEY_ACCOUNT").filter(|v| !v.is_empty());
        let password = var("PARLEY_PASSWORD").filter(|v| !v.is_empty());
        let character = var("PARLEY_CHARACTER").filter(|v| !v.is_empty());
        config.firehose = match (account, password, character) {
            (Some(account), Some(password), Some(character)) => Some(FirehoseLogin {
                url: var("PARLEY_FIREHOSE_URL").unwrap_or_else(|| DEFAULT_FIREHOSE_URL.to_string()),
                api_base: var("PARLEY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                account,
                password,
                character,
            }),
            (None, None, None) => None,
            _ => {
                tracing::warn!("Incomplete firehose login (need account, password and character); firehose disabled");
                None
            }
        };

        // RUST_LOG is read by tracing-subscriber directly.

        config
    }
}

fn default_log_db() -> PathBuf {
    Database::default_path().unwrap_or_else(|_| PathBuf::from("./data").join(DATABASE_FILE))
}
