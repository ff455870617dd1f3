use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParleyError;

// ---------------------------------------------------------------------------
// Character names
// ---------------------------------------------------------------------------

pub(crate) struct NameData {
    canonical: Box<str>,
    folded: Box<str>,
}

impl NameData {
    pub(crate) fn new(name: &str) -> Self {
        let canonical = name.trim();
        Self {
            canonical: canonical.into(),
            folded: canonical.to_lowercase().into(),
        }
    }
}

/// A character name: canonical display casing plus a lower-cased comparison
/// key. Two names are equal when their comparison keys are equal.
#[derive(Clone)]
pub struct CharacterName(Arc<NameData>);

impl CharacterName {
    /// Build a standalone name. Prefer [`crate::NameInterner::intern`] on hot
    /// paths so repeated names share one allocation.
    pub fn new(name: &str) -> Self {
        Self(Arc::new(NameData::new(name)))
    }

    pub(crate) fn from_shared(data: Arc<NameData>) -> Self {
        Self(data)
    }

    pub(crate) fn downgrade(&self) -> Weak<NameData> {
        Arc::downgrade(&self.0)
    }

    /// Display form, as the server spelled it.
    pub fn as_str(&self) -> &str {
        &self.0.canonical
    }

    /// Lower-cased comparison key.
    pub fn folded(&self) -> &str {
        &self.0.folded
    }

    pub fn is_empty(&self) -> bool {
        self.0.canonical.is_empty()
    }

    /// Whether both handles point at the same interned allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for CharacterName {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for CharacterName {}

impl Hash for CharacterName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for CharacterName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CharacterName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl fmt::Display for CharacterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CharacterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharacterName({:?})", self.as_str())
    }
}

impl From<&str> for CharacterName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for CharacterName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CharacterName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}

// ---------------------------------------------------------------------------
// Snapshot enums (stored with every logged message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Gender {
    #[default]
    None,
    Male,
    Female,
    Transgender,
    Herm,
    #[serde(rename = "Male-Herm")]
    MaleHerm,
    #[serde(rename = "Cunt-boy")]
    Cuntboy,
    Shemale,
}

impl Gender {
    /// Stable integer stored in the log database.
    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Male => 1,
            Self::Female => 2,
            Self::Transgender => 3,
            Self::Herm => 4,
            Self::MaleHerm => 5,
            Self::Cuntboy => 6,
            Self::Shemale => 7,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ParleyError> {
        Ok(match code {
            0 => Self::None,
            1 => Self::Male,
            2 => Self::Female,
            3 => Self::Transgender,
            4 => Self::Herm,
            5 => Self::MaleHerm,
            6 => Self::Cuntboy,
            7 => Self::Shemale,
            other => {
                return Err(ParleyError::UnknownValue {
                    kind: "gender",
                    value: other.to_string(),
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    #[default]
    Offline,
    Online,
    Looking,
    Busy,
    Away,
    Dnd,
    Idle,
    Crown,
}

impl OnlineStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Offline => 0,
            Self::Online => 1,
            Self::Looking => 2,
            Self::Busy => 3,
            Self::Away => 4,
            Self::Dnd => 5,
            Self::Idle => 6,
            Self::Crown => 7,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ParleyError> {
        Ok(match code {
            0 => Self::Offline,
            1 => Self::Online,
            2 => Self::Looking,
            3 => Self::Busy,
            4 => Self::Away,
            5 => Self::Dnd,
            6 => Self::Idle,
            7 => Self::Crown,
            other => {
                return Err(ParleyError::UnknownValue {
                    kind: "online status",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// Kind of a logged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogMessageType {
    #[default]
    Chat,
    Ad,
    Roll,
    Spin,
}

impl LogMessageType {
    pub fn code(self) -> i64 {
        match self {
            Self::Chat => 0,
            Self::Ad => 1,
            Self::Roll => 2,
            Self::Spin => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ParleyError> {
        Ok(match code {
            0 => Self::Chat,
            1 => Self::Ad,
            2 => Self::Roll,
            3 => Self::Spin,
            other => {
                return Err(ParleyError::UnknownValue {
                    kind: "message type",
                    value: other.to_string(),
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Firehose connectivity as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionStatus {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionStatus {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Identity of a log stream: a public channel or a private conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChannelDescriptor {
    Public {
        name: String,
        title: String,
    },
    PrivateConvo {
        me: CharacterName,
        interlocutor: CharacterName,
    },
}
