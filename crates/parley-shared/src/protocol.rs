//! Firehose application protocol.
//!
//! Every STOMP MESSAGE body is a JSON [`Envelope`] `{ target, type, content }`.
//! Incoming envelopes are decoded through a static registration table keyed by
//! `(target, type)`; anything not in the table is handed back as
//! [`Decoded::Unrecognized`] so the caller can route it to diagnostics.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParleyError;
use crate::intern::NameInterner;
use crate::types::{CharacterName, Gender, LogMessageType, OnlineStatus};

/// Outer JSON object of every firehose message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    pub fn new(target: &str, kind: &str, content: Value) -> Self {
        Self {
            target: target.to_string(),
            kind: kind.to_string(),
            content,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ParleyError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ParleyError> {
        Ok(serde_json::from_slice(data)?)
    }
}

// ---------------------------------------------------------------------------
// Incoming messages
// ---------------------------------------------------------------------------

/// A line spoken in a public channel (chat, ad, roll or spin).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: String,
    pub channel_title: Option<String>,
    pub character: CharacterName,
    pub gender: Gender,
    pub status: OnlineStatus,
    pub message_type: LogMessageType,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A private message between two characters.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateMessage {
    pub sender: CharacterName,
    pub recipient: CharacterName,
    pub gender: Gender,
    pub status: OnlineStatus,
    pub message_type: LogMessageType,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterStatus {
    pub character: CharacterName,
    pub status: OnlineStatus,
    pub status_message: String,
}

/// All firehose messages the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Channel(ChannelMessage),
    Private(PrivateMessage),
    Status(CharacterStatus),
    Pong,
}

// Raw wire shapes, decoded before names are interned.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannelMessage {
    channel: String,
    #[serde(default)]
    channel_title: Option<String>,
    character: String,
    #[serde(default)]
    gender: Gender,
    #[serde(default)]
    status: OnlineStatus,
    text: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrivateMessage {
    character: String,
    recipient: String,
    #[serde(default)]
    gender: Gender,
    #[serde(default)]
    status: OnlineStatus,
    text: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    character: String,
    status: OnlineStatus,
    #[serde(default)]
    status_message: String,
}

fn channel_line(
    content: Value,
    names: &NameInterner,
    message_type: LogMessageType,
) -> Result<IncomingMessage, ParleyError> {
    let raw: RawChannelMessage = serde_json::from_value(content)?;
    Ok(IncomingMessage::Channel(ChannelMessage {
        channel: raw.channel,
        channel_title: raw.channel_title,
        character: names.intern(&raw.character),
        gender: raw.gender,
        status: raw.status,
        message_type,
        text: raw.text,
        timestamp: raw.timestamp,
    }))
}

fn decode_channel_chat(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    channel_line(content, names, LogMessageType::Chat)
}

fn decode_channel_ad(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    channel_line(content, names, LogMessageType::Ad)
}

fn decode_channel_roll(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    channel_line(content, names, LogMessageType::Roll)
}

fn decode_channel_spin(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    channel_line(content, names, LogMessageType::Spin)
}

fn decode_private(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    let raw: RawPrivateMessage = serde_json::from_value(content)?;
    Ok(IncomingMessage::Private(PrivateMessage {
        sender: names.intern(&raw.character),
        recipient: names.intern(&raw.recipient),
        gender: raw.gender,
        status: raw.status,
        message_type: LogMessageType::Chat,
        text: raw.text,
        timestamp: raw.timestamp,
    }))
}

fn decode_status(content: Value, names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    let raw: RawStatus = serde_json::from_value(content)?;
    Ok(IncomingMessage::Status(CharacterStatus {
        character: names.intern(&raw.character),
        status: raw.status,
        status_message: raw.status_message,
    }))
}

fn decode_pong(_content: Value, _names: &NameInterner) -> Result<IncomingMessage, ParleyError> {
    Ok(IncomingMessage::Pong)
}

// ---------------------------------------------------------------------------
// Registration table
// ---------------------------------------------------------------------------

type DecodeFn = fn(Value, &NameInterner) -> Result<IncomingMessage, ParleyError>;

struct Registration {
    target: &'static str,
    kind: &'static str,
    decode: DecodeFn,
}

static REGISTRATIONS: &[Registration] = &[
    Registration { target: "chat", kind: "channelMessage", decode: decode_channel_chat },
    Registration { target: "chat", kind: "ad", decode: decode_channel_ad },
    Registration { target: "chat", kind: "roll", decode: decode_channel_roll },
    Registration { target: "chat", kind: "spin", decode: decode_channel_spin },
    Registration { target: "chat", kind: "privateMessage", decode: decode_private },
    Registration { target: "presence", kind: "status", decode: decode_status },
    Registration { target: "system", kind: "pong", decode: decode_pong },
];

fn registry_key(target: &str, kind: &str) -> String {
    format!("{target}/{kind}")
}

/// Result of decoding one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(IncomingMessage),
    Unrecognized(Envelope),
}

/// Lookup table from `(target, type)` to decoder, built once at startup.
pub struct MessageRegistry {
    handlers: HashMap<String, DecodeFn>,
    names: Arc<NameInterner>,
}

impl MessageRegistry {
    pub fn new(names: Arc<NameInterner>) -> Self {
        let handlers = REGISTRATIONS
            .iter()
            .map(|r| (registry_key(r.target, r.kind), r.decode))
            .collect();
        Self { handlers, names }
    }

    pub fn decode(&self, envelope: Envelope) -> Result<Decoded, ParleyError> {
        match self.handlers.get(&registry_key(&envelope.target, &envelope.kind)) {
            Some(decode) => Ok(Decoded::Message(decode(envelope.content, &self.names)?)),
            None => Ok(Decoded::Unrecognized(envelope)),
        }
    }

    /// Parse a MESSAGE body and decode it.
    pub fn decode_bytes(&self, body: &[u8]) -> Result<Decoded, ParleyError> {
        self.decode(Envelope::from_bytes(body)?)
    }

    pub fn names(&self) -> &Arc<NameInterner> {
        &self.names
    }
}

// ---------------------------------------------------------------------------
// Outgoing messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    /// Application-level liveness probe, answered by `system/pong`.
    Ping,
    ChannelMessage { channel: String, text: String },
    PrivateMessage { recipient: CharacterName, text: String },
}

impl OutgoingMessage {
    pub fn to_envelope(&self) -> Envelope {
        match self {
            Self::Ping => Envelope::new("system", "ping", Value::Object(Default::default())),
            Self::ChannelMessage { channel, text } => Envelope::new(
                "chat",
                "sendChannelMessage",
                serde_json::json!({ "channel": channel, "text": text }),
            ),
            Self::PrivateMessage { recipient, text } => Envelope::new(
                "chat",
                "sendPrivateMessage",
                serde_json::json!({ "recipient": recipient, "text": text }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> MessageRegistry {
        MessageRegistry::new(Arc::new(NameInterner::new()))
    }

    #[test]
    fn test_decode_channel_ad() {
        let env = Envelope::new(
            "chat",
            "ad",
            json!({
                "channel": "Frontpage",
                "character": "Alice",
                "gender": "Female",
                "status": "looking",
                "text": "hello",
                "timestamp": 1_700_000_000_000i64,
            }),
        );
        let Decoded::Message(IncomingMessage::Channel(msg)) = registry().decode(env).unwrap() else {
            panic!("expected channel message");
        };
        assert_eq!(msg.message_type, LogMessageType::Ad);
        assert_eq!(msg.character.as_str(), "Alice");
        assert_eq!(msg.status, OnlineStatus::Looking);
        assert_eq!(msg.timestamp.unwrap().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_private_message_names_are_interned() {
        let reg = registry();
        let body = br#"{"target":"chat","type":"privateMessage","content":{"character":"Bob","recipient":"Alice","text":"hi"}}"#;
        let first = reg.decode_bytes(body).unwrap();
        let second = reg.decode_bytes(body).unwrap();
        match (first, second) {
            (
                Decoded::Message(IncomingMessage::Private(a)),
                Decoded::Message(IncomingMessage::Private(b)),
            ) => assert!(a.sender.ptr_eq(&b.sender)),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_pair_is_unrecognized() {
        let env = Envelope::new("chat", "typing", json!({}));
        assert_eq!(
            registry().decode(env.clone()).unwrap(),
            Decoded::Unrecognized(env)
        );
    }

    #[test]
    fn test_malformed_content_is_an_error() {
        let env = Envelope::new("presence", "status", json!({ "character": 5 }));
        assert!(registry().decode(env).is_err());
    }

    #[test]
    fn test_outgoing_envelope_shape() {
        let env = OutgoingMessage::PrivateMessage {
            recipient: CharacterName::new("Alice"),
            text: "yo".into(),
        }
        .to_envelope();
        let value: Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "sendPrivateMessage");
        assert_eq!(value["content"]["recipient"], "Alice");
    }
}
