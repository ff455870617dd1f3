//! # parley-store
//!
//! Local chat log storage for Parley, backed by SQLite.
//!
//! Messages are normalized into four tables: interned message text
//! (`strings`), speakers (`character`), log streams (`channel`) and the
//! messages themselves (`channelmessage`). A trigram full-text index over
//! `strings` backs text search. The crate exposes a synchronous [`Database`]
//! handle plus the cancellable async [`LogStore`] that the rest of the
//! application talks to.

pub mod channels;
pub mod database;
pub mod interning;
pub mod maintenance;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod search;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::LogStore;
