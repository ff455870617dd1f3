//! Domain model structs read from and written to the log database.
//!
//! Everything the UI sees derives `Serialize` so it can be handed over the
//! request protocol unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{ChannelDescriptor, CharacterName, Gender, LogMessageType, OnlineStatus};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One message as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedMessage {
    /// Row id in `channelmessage`.
    pub id: i64,
    /// Channel or PM conversation the message belongs to.
    pub channel: ChannelDescriptor,
    pub speaker: CharacterName,
    /// Speaker's gender when the message was logged.
    pub gender: Gender,
    /// Speaker's status when the message was logged.
    pub status: OnlineStatus,
    pub message_type: LogMessageType,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// A message about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogMessage {
    pub speaker: CharacterName,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub status: OnlineStatus,
    #[serde(default)]
    pub message_type: LogMessageType,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Where an imported message goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImportTarget {
    Channel { name: String, title: String },
    PmConvo { me: CharacterName, interlocutor: CharacterName },
}

/// One row of a bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedMessage {
    pub target: ImportTarget,
    pub message: NewLogMessage,
}

/// Which side of the anchor date to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateAnchor {
    /// Strictly older than the date, newest first.
    Before,
    /// At or after the date, oldest first.
    After,
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHint {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub interlocutor: CharacterName,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Restricts a search to one log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SearchScope {
    Channel { name: String },
    PmConvo { me: CharacterName, other: CharacterName },
}

/// Composable search filter. Every field is optional; an empty criteria
/// matches every logged message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default)]
    pub speaker: Option<CharacterName>,
    #[serde(default)]
    pub scope: Option<SearchScope>,
    #[serde(default)]
    pub text_contains: Option<String>,
    /// Only messages strictly before this instant.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub before: Option<DateTime<Utc>>,
    /// Only messages at or after this instant.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub after: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationReport {
    pub messages_deleted: usize,
    pub strings_deleted: usize,
}
