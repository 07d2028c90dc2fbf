//! Domain records: users, rooms, and chat messages
//!
//! Users and rooms carry argon2 password hashes; hashing and verification
//! stay behind the constructors so callers only ever see plaintext at the
//! boundary.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::Serialize;

use crate::error::AppError;
use crate::types::{RoomId, UserId};

/// A registered user account
///
/// Created by register, never mutated. Nicknames are globally unique,
/// enforced by the user store.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with a hashed password
    pub fn new(nickname: impl Into<String>, password: &str) -> Result<Self, AppError> {
        Ok(Self {
            id: UserId::new(),
            nickname: nickname.into(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        })
    }

    /// Compare a plaintext password with the stored hash
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }
}

/// A chat room
///
/// Created by create-room, never mutated. Room names are globally unique,
/// enforced by the room store. Membership lives in the room store, not
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Create a new room with a hashed password
    pub fn new(name: impl Into<String>, password: &str, owner_id: UserId) -> Result<Self, AppError> {
        Ok(Self {
            id: RoomId::new(),
            name: name.into(),
            owner_id,
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        })
    }

    /// Compare a plaintext password with the stored hash
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }
}

/// One message in a conversation, append-only
///
/// The conversation id is the room id for room messages and the ordered
/// pair id of the two users for DMs.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub conversation_id: String,
    pub sender_id: UserId,
    pub sender_nickname: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message stamped with the current time
    pub fn new(
        conversation_id: String,
        sender_id: UserId,
        sender_nickname: String,
        content: String,
    ) -> Self {
        Self {
            conversation_id,
            sender_id,
            sender_nickname,
            content,
            timestamp: Utc::now(),
        }
    }
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(hash)
}

fn verify_password(stored_hash: &str, supplied_password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(supplied_password.as_bytes(), &parsed)
        .is_ok()
}
