//! # parley-shared
//!
//! Types shared by the log store, the firehose client and the host service:
//! character names and their interner, the snapshot enums stored with every
//! logged line, and the firehose envelope registry.

pub mod constants;
pub mod intern;
pub mod protocol;
pub mod types;

mod error;

pub use error::ParleyError;
pub use intern::NameInterner;
pub use types::*;
