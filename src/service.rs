//! User and room business logic over the repository contracts
//!
//! Services own the rules the hub should not care about: uniqueness
//! pre-checks, credential verification, and membership bookkeeping. Every
//! method is a short, bounded round-trip against the stores; handlers
//! await them inline on the hub's decision loop.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Room, User};
use crate::error::{AppError, StoreError};
use crate::store::{RoomStore, UserStore};
use crate::types::UserId;

/// Account operation failures
///
/// `InvalidCredentials` deliberately covers both unknown nicknames and
/// wrong passwords so a caller cannot probe for registered names.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("nickname must not be empty")]
    EmptyNickname,

    #[error("nickname is already taken")]
    NicknameTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Internal(#[from] AppError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Room operation failures
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room name must not be empty")]
    EmptyName,

    #[error("room name is already taken")]
    NameTaken,

    #[error("room not found")]
    NotFound,

    #[error("invalid password")]
    InvalidPassword,

    #[error(transparent)]
    Internal(#[from] AppError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Account registration and authentication
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Create a new account
    pub async fn register(&self, nickname: &str, password: &str) -> Result<User, AuthError> {
        if nickname.trim().is_empty() {
            return Err(AuthError::EmptyNickname);
        }
        if self.users.get_user_by_nickname(nickname).await?.is_some() {
            return Err(AuthError::NicknameTaken);
        }
        let user = User::new(nickname, password)?;
        self.users.create_user(&user).await?;
        Ok(user)
    }

    /// Authenticate an existing account
    pub async fn login(&self, nickname: &str, password: &str) -> Result<User, AuthError> {
        let Some(user) = self.users.get_user_by_nickname(nickname).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !user.verify_password(password) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn get_by_nickname(&self, nickname: &str) -> Result<Option<User>, StoreError> {
        self.users.get_user_by_nickname(nickname).await
    }
}

/// Room lifecycle and membership
#[derive(Clone)]
pub struct RoomService {
    rooms: Arc<dyn RoomStore>,
}

impl RoomService {
    pub fn new(rooms: Arc<dyn RoomStore>) -> Self {
        Self { rooms }
    }

    /// Create a room; the creator becomes its first member
    pub async fn create_room(
        &self,
        name: &str,
        password: &str,
        owner_id: UserId,
    ) -> Result<Room, RoomError> {
        if name.trim().is_empty() {
            return Err(RoomError::EmptyName);
        }
        if self.rooms.get_room_by_name(name).await?.is_some() {
            return Err(RoomError::NameTaken);
        }
        let room = Room::new(name, password, owner_id)?;
        self.rooms.create_room(&room).await?;
        self.rooms.add_user_to_room(room.id, owner_id).await?;
        Ok(room)
    }

    /// Join a room; joining again is a no-op
    pub async fn join_room(
        &self,
        name: &str,
        password: &str,
        user_id: UserId,
    ) -> Result<Room, RoomError> {
        let Some(room) = self.rooms.get_room_by_name(name).await? else {
            return Err(RoomError::NotFound);
        };
        if !room.verify_password(password) {
            return Err(RoomError::InvalidPassword);
        }
        self.rooms.add_user_to_room(room.id, user_id).await?;
        Ok(room)
    }

    /// Leave a room; leaving without a membership is a no-op
    pub async fn leave_room(&self, name: &str, user_id: UserId) -> Result<Room, RoomError> {
        let Some(room) = self.rooms.get_room_by_name(name).await? else {
            return Err(RoomError::NotFound);
        };
        self.rooms.remove_user_from_room(room.id, user_id).await?;
        Ok(room)
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.rooms.list_rooms().await
    }

    pub async fn get_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        self.rooms.get_room_by_name(name).await
    }

    /// Member nicknames of a room
    pub async fn members(&self, name: &str) -> Result<Vec<String>, RoomError> {
        let Some(room) = self.rooms.get_room_by_name(name).await? else {
            return Err(RoomError::NotFound);
        };
        Ok(self.rooms.get_room_members(room.id).await?)
    }

    /// Member user ids of a room
    pub async fn member_ids(&self, name: &str) -> Result<Vec<UserId>, RoomError> {
        let Some(room) = self.rooms.get_room_by_name(name).await? else {
            return Err(RoomError::NotFound);
        };
        Ok(self.rooms.get_room_member_ids(room.id).await?)
    }

    pub async fn is_member(&self, name: &str, user_id: UserId) -> Result<bool, RoomError> {
        let Some(room) = self.rooms.get_room_by_name(name).await? else {
            return Err(RoomError::NotFound);
        };
        Ok(self.rooms.is_room_member(room.id, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRoomStore, MemoryUserStore};

    fn user_service() -> UserService {
        UserService::new(Arc::new(MemoryUserStore::new()))
    }

    fn room_service() -> RoomService {
        let users = Arc::new(MemoryUserStore::new());
        RoomService::new(Arc::new(MemoryRoomStore::new(users)))
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let service = user_service();
        let registered = service.register("alice", "pw").await.unwrap();
        let logged_in = service.login("alice", "pw").await.unwrap();
        assert_eq!(registered.id, logged_in.id);
    }

    #[tokio::test]
    async fn test_register_rejects_taken_nickname() {
        let service = user_service();
        service.register("alice", "pw").await.unwrap();
        let err = service.register("alice", "other").await.unwrap_err();
        assert!(matches!(err, AuthError::NicknameTaken));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_nickname() {
        let service = user_service();
        let err = service.register("  ", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyNickname));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let service = user_service();
        service.register("alice", "pw").await.unwrap();

        let wrong_password = service.login("alice", "nope").await.unwrap_err();
        let unknown_user = service.login("ghost", "pw").await.unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_create_room_makes_creator_a_member() {
        let service = room_service();
        let owner = UserId::new();
        let room = service.create_room("gophers", "1234", owner).await.unwrap();
        assert!(service.is_member("gophers", owner).await.unwrap());
        assert_eq!(service.member_ids("gophers").await.unwrap(), vec![owner]);
        assert_eq!(room.owner_id, owner);
    }

    #[tokio::test]
    async fn test_create_room_rejects_taken_name() {
        let service = room_service();
        service
            .create_room("gophers", "1234", UserId::new())
            .await
            .unwrap();
        let err = service
            .create_room("gophers", "1234", UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NameTaken));
        // The failed create must not have touched the store
        assert_eq!(service.list_rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_room_verifies_password() {
        let service = room_service();
        service
            .create_room("gophers", "1234", UserId::new())
            .await
            .unwrap();

        let joiner = UserId::new();
        let err = service.join_room("gophers", "wrong", joiner).await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidPassword));
        assert!(!service.is_member("gophers", joiner).await.unwrap());

        service.join_room("gophers", "1234", joiner).await.unwrap();
        assert!(service.is_member("gophers", joiner).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let service = room_service();
        let err = service
            .join_room("nowhere", "pw", UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NotFound));
    }

    #[tokio::test]
    async fn test_join_and_leave_are_idempotent() {
        let service = room_service();
        let owner = UserId::new();
        let joiner = UserId::new();
        service.create_room("gophers", "1234", owner).await.unwrap();

        service.join_room("gophers", "1234", joiner).await.unwrap();
        service.join_room("gophers", "1234", joiner).await.unwrap();
        assert_eq!(service.member_ids("gophers").await.unwrap().len(), 2);

        service.leave_room("gophers", joiner).await.unwrap();
        // Leaving again still succeeds
        service.leave_room("gophers", joiner).await.unwrap();
        assert_eq!(service.member_ids("gophers").await.unwrap(), vec![owner]);
    }
}
