//! Multi-User WebSocket Chat Server Library
//!
//! A real-time chat server built with tokio-tungstenite using the Actor
//! pattern for state management. Clients hold one long-lived WebSocket,
//! authenticate with a nickname and password, then exchange direct
//! messages and talk in password-protected rooms. Users, rooms, and
//! messages persist through repository traits.
//!
//! # Features
//! - WebSocket connection handling on `/ws`
//! - Nickname/password registration and login
//! - Single-session-per-identity with graceful displacement
//! - Direct messages between users
//! - Password-protected, persistent rooms
//! - Room broadcast with a bounded per-session outbound queue
//! - Disconnection handling
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning every live session; its decision
//!   loop consumes register/unregister/inbound events one at a time, so
//!   hub state needs no locks
//! - Each connection runs a read pump and a write pump communicating with
//!   the hub through channels
//! - Domain services sit behind `async_trait` repository contracts;
//!   in-memory implementations back the binary and the tests
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//!
//! use tokio::net::TcpListener;
//! use shelltalk_server::handler::handle_connection;
//! use shelltalk_server::hub::Hub;
//! use shelltalk_server::memory::{MemoryMessageStore, MemoryRoomStore, MemoryUserStore};
//! use shelltalk_server::service::{RoomService, UserService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let users = Arc::new(MemoryUserStore::new());
//!     let rooms = Arc::new(MemoryRoomStore::new(users.clone()));
//!     let messages = Arc::new(MemoryMessageStore::new());
//!
//!     let (hub, handle) = Hub::new(
//!         UserService::new(users),
//!         RoomService::new(rooms),
//!         messages,
//!     );
//!     tokio::spawn(hub.run());
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, handle.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod hub;
pub mod memory;
pub mod message;
pub mod service;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use error::{AppError, SendError, StoreError};
pub use handler::handle_connection;
pub use hub::{Hub, HubHandle, InboundRequest};
pub use message::{Envelope, ServerFrame};
pub use service::{RoomService, UserService};
pub use session::{Auth, Session, OUTBOUND_QUEUE_CAPACITY};
pub use types::{RoomId, SessionId, UserId};
