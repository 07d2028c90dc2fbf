//! Repository contracts for users, rooms, and chat messages
//!
//! The hub and services only ever see these traits. `memory` provides the
//! in-process implementations the binary and the tests run on; a real
//! database adapter slots in behind the same contracts.

use async_trait::async_trait;

use crate::domain::{ChatMessage, Room, User};
use crate::error::StoreError;
use crate::types::{RoomId, UserId};

/// User account persistence
///
/// Lookups return `None` for unknown users rather than an error.
/// Nickname uniqueness is enforced by `create_user`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user_by_nickname(&self, nickname: &str) -> Result<Option<User>, StoreError>;
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Room and membership persistence
///
/// Membership mutation is idempotent: adding an existing member or
/// removing a non-member is a no-op. Room name uniqueness is enforced by
/// `create_room`.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, room: &Room) -> Result<(), StoreError>;
    async fn get_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError>;
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn add_user_to_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), StoreError>;
    async fn remove_user_from_room(&self, room_id: RoomId, user_id: UserId)
        -> Result<(), StoreError>;
    async fn is_room_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, StoreError>;
    /// Member nicknames, for display
    async fn get_room_members(&self, room_id: RoomId) -> Result<Vec<String>, StoreError>;
    /// Member user ids, for fan-out
    async fn get_room_member_ids(&self, room_id: RoomId) -> Result<Vec<UserId>, StoreError>;
}

/// Append-only chat message persistence
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;
    /// The most recent `limit` messages of a conversation, oldest first
    async fn get_messages_by_conversation_id(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}
