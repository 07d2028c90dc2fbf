//! In-memory repository implementations
//!
//! Process-local stores behind `tokio::sync::RwLock`. These back the
//! server binary and every test; durability across restarts comes from
//! swapping in a database-backed implementation of the same traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{ChatMessage, Room, User};
use crate::error::StoreError;
use crate::store::{MessageStore, RoomStore, UserStore};
use crate::types::{RoomId, UserId};

/// User accounts held in process memory
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.nickname == user.nickname) {
            return Err(StoreError::Conflict(format!(
                "nickname '{}' is already taken",
                user.nickname
            )));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_nickname(&self, nickname: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.nickname == nickname).cloned())
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
struct RoomsInner {
    rooms: HashMap<RoomId, Room>,
    members: HashMap<RoomId, HashSet<UserId>>,
}

/// Rooms and memberships held in process memory
///
/// Member nicknames are resolved through the user store, the way a SQL
/// adapter would join against the users table.
pub struct MemoryRoomStore {
    users: Arc<dyn UserStore>,
    inner: RwLock<RoomsInner>,
}

impl MemoryRoomStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            inner: RwLock::new(RoomsInner::default()),
        }
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.rooms.values().any(|r| r.name == room.name) {
            return Err(StoreError::Conflict(format!(
                "room name '{}' is already taken",
                room.name
            )));
        }
        inner.rooms.insert(room.id, room.clone());
        inner.members.insert(room.id, HashSet::new());
        Ok(())
    }

    async fn get_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.rooms.values().find(|r| r.name == name).cloned())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.inner.read().await.rooms.values().cloned().collect())
    }

    async fn add_user_to_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.rooms.contains_key(&room_id) {
            return Err(StoreError::Backend(format!("no such room: {room_id}")));
        }
        inner.members.entry(room_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_user_from_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.members.get_mut(&room_id) {
            members.remove(&user_id);
        }
        Ok(())
    }

    async fn is_room_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .members
            .get(&room_id)
            .is_some_and(|m| m.contains(&user_id)))
    }

    async fn get_room_members(&self, room_id: RoomId) -> Result<Vec<String>, StoreError> {
        let member_ids = {
            let inner = self.inner.read().await;
            inner
                .members
                .get(&room_id)
                .map(|m| m.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        let mut nicknames = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if let Some(user) = self.users.get_user_by_id(id).await? {
                nicknames.push(user.nickname);
            }
        }
        Ok(nicknames)
    }

    async fn get_room_member_ids(&self, room_id: RoomId) -> Result<Vec<UserId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .members
            .get(&room_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }
}

/// Chat messages held in process memory, keyed by conversation
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_messages_by_conversation_id(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        let Some(conversation) = messages.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = conversation.len().saturating_sub(limit);
        Ok(conversation[start..].to_vec())
    }
}
