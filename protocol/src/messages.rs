//! Messages exchanged between client and server.
//!
//! On the wire every message is a JSON object with a single key naming its
//! kind, e.g. `{"Hello": {...}}`. Serde's externally tagged enum layout
//! produces exactly that shape.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::files::FileInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Hello(HelloMessage),
    Set(SetMessage),
    /// `None` is the client's request, `Some` the server's directory.
    List(Option<UserListing>),
    State(StateMessage),
    Error(ErrorMessage),
}

impl Message {
    pub const KINDS: [&'static str; 5] = ["Hello", "Set", "List", "State", "Error"];

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "Hello",
            Message::Set(_) => "Set",
            Message::List(_) => "List",
            Message::State(_) => "State",
            Message::Error(_) => "Error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// MD5 hex digest of the server password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
}

impl HelloMessage {
    /// Trimmed, non-empty username.
    pub fn username(&self) -> Option<&str> {
        non_empty(self.username.as_deref())
    }

    pub fn room_name(&self) -> Option<&str> {
        non_empty(self.room.as_ref().map(|room| room.name.as_str()))
    }

    pub fn version(&self) -> Option<&str> {
        non_empty(self.version.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl RoomRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<BTreeMap<String, UserSetting>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
}

impl SetMessage {
    pub fn room(name: impl Into<String>) -> Self {
        Self {
            room: Some(RoomRef::named(name)),
            ..Self::default()
        }
    }

    pub fn file(file: FileInfo) -> Self {
        Self {
            file: Some(file),
            ..Self::default()
        }
    }

    pub fn user(
        username: impl Into<String>,
        room: impl Into<String>,
        file: Option<FileInfo>,
        event: Option<UserEvent>,
    ) -> Self {
        let setting = UserSetting {
            room: Some(RoomRef::named(room)),
            file,
            event,
        };
        Self {
            user: Some(BTreeMap::from([(username.into(), setting)])),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<UserEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
}

impl UserEvent {
    pub fn joined() -> Self {
        Self {
            joined: Some(true),
            left: None,
        }
    }

    pub fn left() -> Self {
        Self {
            joined: None,
            left: Some(true),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined.is_some()
    }

    pub fn is_left(&self) -> bool {
        self.left.is_some()
    }
}

/// `{room: {username: {position, file}}}`
pub type UserListing = BTreeMap<String, BTreeMap<String, ListedUser>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListedUser {
    #[serde(default)]
    pub position: f64,
    /// Serialized as `{}` when the user has no file.
    #[serde(default, with = "empty_object")]
    pub file: Option<FileInfo>,
}

mod empty_object {
    use super::*;
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(file: &Option<FileInfo>, serializer: S) -> Result<S::Ok, S::Error> {
        match file {
            Some(file) => file.serialize(serializer),
            None => Map::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<FileInfo>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playstate: Option<PlayState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<PingInfo>,
    #[serde(
        rename = "ignoringOnTheFly",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ignoring_on_the_fly: Option<IgnoringInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayState {
    #[serde(default)]
    pub position: f64,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_seek: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
}

impl PlayState {
    pub fn do_seek(&self) -> bool {
        self.do_seek.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingInfo {
    /// Timestamp of the server's outgoing message, echoed by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_calculation: Option<f64>,
    /// Timestamp of the client's outgoing message, echoed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_latency_calculation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_rtt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_rtt: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoringInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<u32>,
}

impl IgnoringInfo {
    /// `None` when both counters are zero, so the field is left out.
    pub fn from_counters(server: u32, client: u32) -> Option<Self> {
        if server == 0 && client == 0 {
            return None;
        }
        Some(Self {
            server: (server != 0).then_some(server),
            client: (client != 0).then_some(client),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}
