//! Room records as they are stored under `rooms/{roomId}`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Identity;

/// Key of the server-value placeholder object.
pub const SERVER_VALUE_KEY: &str = ".sv";
/// Placeholder value asking the store to substitute its clock.
pub const SERVER_VALUE_TIMESTAMP: &str = "timestamp";

/// Display name used for synthesized room notices.
pub const SYSTEM_DISPLAY_NAME: &str = "Room";

/// A store-assigned timestamp.
///
/// Clients write [`ServerTime::Pending`], which serializes to the
/// `{".sv": "timestamp"}` placeholder; the store resolves it to epoch
/// milliseconds and readers get [`ServerTime::At`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerTime {
    #[default]
    Pending,
    At(i64),
}

impl ServerTime {
    /// The raw placeholder value.
    pub fn sentinel() -> Value {
        let mut placeholder = serde_json::Map::new();
        placeholder.insert(
            SERVER_VALUE_KEY.to_string(),
            Value::from(SERVER_VALUE_TIMESTAMP),
        );
        Value::Object(placeholder)
    }

    /// Whether `value` is the timestamp placeholder.
    pub fn is_sentinel(value: &Value) -> bool {
        value.as_object().is_some_and(|obj| {
            obj.len() == 1
                && obj.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some(SERVER_VALUE_TIMESTAMP)
        })
    }

    pub fn millis(self) -> Option<i64> {
        match self {
            ServerTime::Pending => None,
            ServerTime::At(ms) => Some(ms),
        }
    }

    /// Ordering key; unresolved timestamps sort first.
    pub fn sort_key(self) -> i64 {
        self.millis().unwrap_or(0)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        self.millis()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

impl Serialize for ServerTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerTime::Pending => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(SERVER_VALUE_KEY, SERVER_VALUE_TIMESTAMP)?;
                map.end()
            }
            ServerTime::At(ms) => serializer.serialize_i64(*ms),
        }
    }
}

impl<'de> Deserialize<'de> for ServerTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(i64),
            Float(f64),
            Placeholder(serde_json::Map<String, Value>),
        }

        #[allow(clippy::cast_possible_truncation)]
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Millis(ms) => ServerTime::At(ms),
            Repr::Float(ms) => ServerTime::At(ms as i64),
            Repr::Placeholder(_) => ServerTime::Pending,
        })
    }
}

/// Replicated playback state. Each snapshot replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playing: bool,
    /// Absent in hand-edited or partially written records; only the seek is skipped then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub last_updated: ServerTime,
    /// Author of the write; used only to drop our own echo.
    pub updated_by: Identity,
}

impl PlaybackState {
    /// A state about to be written by `author`, stamped by the store.
    pub fn authored(is_playing: bool, current_time: f64, author: Identity) -> Self {
        Self {
            is_playing,
            current_time: Some(current_time),
            last_updated: ServerTime::Pending,
            updated_by: author,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub can_control: bool,
}

/// One participant of a room. Created on join and never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Identity,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Permissions,
}

impl UserRecord {
    pub fn host(id: Identity, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role: Role::Host,
            permissions: Permissions { can_control: true },
        }
    }

    pub fn viewer(id: Identity, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role: Role::Viewer,
            permissions: Permissions { can_control: false },
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

/// A chat log entry. `id` is the push key and is not stored in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub user_id: Identity,
    pub display_name: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: ServerTime,
}

impl Message {
    pub fn user(user_id: Identity, display_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            user_id,
            display_name: display_name.into(),
            text: text.into(),
            timestamp: ServerTime::Pending,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::user(Identity::system(), SYSTEM_DISPLAY_NAME, text)
    }

    pub fn is_system(&self) -> bool {
        self.user_id.is_system()
    }
}

/// A fire-and-forget reaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emote {
    pub user_id: Identity,
    pub symbol: String,
    #[serde(default)]
    pub timestamp: ServerTime,
}

impl Emote {
    pub fn new(user_id: Identity, symbol: impl Into<String>) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            timestamp: ServerTime::Pending,
        }
    }
}

/// Full room record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub media_id: String,
    pub host_id: Identity,
    pub state: PlaybackState,
    #[serde(default)]
    pub users: BTreeMap<Identity, UserRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, Message>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub emotes: BTreeMap<String, Emote>,
}

impl RoomRecord {
    /// Initial record written by the creating host.
    pub fn new_hosted(
        media_id: impl Into<String>,
        host: UserRecord,
        is_playing: bool,
        current_time: f64,
    ) -> Self {
        let host_id = host.id.clone();
        let mut users = BTreeMap::new();
        users.insert(host_id.clone(), host);
        Self {
            media_id: media_id.into(),
            state: PlaybackState::authored(is_playing, current_time, host_id.clone()),
            host_id,
            users,
            messages: BTreeMap::new(),
            emotes: BTreeMap::new(),
        }
    }
}

/// What a shared link points at, without joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub media_id: String,
    pub host_id: Identity,
    pub watcher_count: usize,
}
