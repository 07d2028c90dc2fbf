//! Wire protocol definitions
//!
//! Every frame is a JSON object `{"type": <string>, "payload": <object>}`.
//! Outbound frames are a Serde adjacently-tagged enum so the shape falls
//! out of the type. Inbound frames decode in two stages: the raw envelope
//! first, so an unknown kind or a bad payload stays a recoverable
//! protocol error, then the per-kind payload once the hub has dispatched
//! on `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{RoomId, UserId};

/// Raw inbound frame: self-describing kind plus an opaque payload
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// `register` and `login` payload
#[derive(Debug, Deserialize)]
pub struct CredentialsPayload {
    pub nickname: String,
    pub password: String,
}

/// `send_direct_message` payload
#[derive(Debug, Deserialize)]
pub struct SendDirectMessagePayload {
    pub recipient_nickname: String,
    pub content: String,
}

/// `create_room` payload
#[derive(Debug, Deserialize)]
pub struct CreateRoomPayload {
    pub name: String,
    pub password: String,
}

/// `join_room` payload
#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    pub room_name: String,
    pub password: String,
}

/// `leave_room` payload
#[derive(Debug, Deserialize)]
pub struct LeaveRoomPayload {
    pub room_name: String,
}

/// `send_room_message` payload
#[derive(Debug, Deserialize)]
pub struct SendRoomMessagePayload {
    pub room_name: String,
    pub content: String,
}

/// `list_members` payload
#[derive(Debug, Deserialize)]
pub struct ListMembersPayload {
    pub room_name: String,
}

/// One row of a `room_list` frame
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
}

/// Server → client frame
///
/// Serializes to `{"type": ..., "payload": {...}}` with snake_case kinds.
/// Timestamps go out as RFC 3339 UTC strings.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication succeeded (register or login)
    LoginSuccess { user_id: UserId, nickname: String },
    /// Incoming direct message
    NewDirectMessage {
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Incoming room message (the sender receives this echo too)
    RoomMessage {
        room_name: String,
        sender_nickname: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Room created or joined
    JoinSuccess { room_id: RoomId, room_name: String },
    /// Room left
    LeaveSuccess { room_id: RoomId },
    /// Every room in the store
    RoomList { rooms: Vec<RoomInfo> },
    /// Member nicknames of one room
    RoomMembers {
        room_name: String,
        members: Vec<String>,
    },
    /// Informational notice from the server
    SystemMessage {
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Error addressed to this client
    ErrorMessage {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    /// Error frame stamped with the current time
    pub fn error(content: impl Into<String>) -> Self {
        Self::ErrorMessage {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// System notice stamped with the current time
    pub fn system(content: impl Into<String>) -> Self {
        Self::SystemMessage {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
