//! Hub actor: the single owner of every live session
//!
//! The decision loop consumes one event per iteration from a three-way
//! select over the register, unregister, and inbound request channels, so
//! no lock guards `connections` or `authenticated`. Handlers run inline
//! on the loop and never block on another session's queue: every delivery
//! is a non-blocking enqueue, and a full queue costs that one recipient
//! the frame (slow-consumer policy).

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{ChatMessage, User};
use crate::error::SendError;
use crate::message::{
    CreateRoomPayload, CredentialsPayload, Envelope, JoinRoomPayload, LeaveRoomPayload,
    ListMembersPayload, RoomInfo, SendDirectMessagePayload, SendRoomMessagePayload, ServerFrame,
};
use crate::service::{RoomService, UserService};
use crate::session::{Auth, Session};
use crate::store::MessageStore;
use crate::types::{dm_conversation_id, SessionId, UserId};

/// Buffer size for the hub's inbound request channel
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Buffer size for the register/unregister channels
const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// An inbound frame bundled with the session that produced it
#[derive(Debug)]
pub struct InboundRequest {
    pub session_id: SessionId,
    pub envelope: Envelope,
}

/// Cloneable handle the accept path and the pumps use to reach the hub
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Session>,
    unregister_tx: mpsc::Sender<SessionId>,
    inbound_tx: mpsc::Sender<InboundRequest>,
}

impl HubHandle {
    /// Hand a freshly accepted session to the hub
    pub async fn register(&self, session: Session) -> Result<(), SendError> {
        self.register_tx
            .send(session)
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Ask the hub to tear a session down
    pub async fn unregister(&self, session_id: SessionId) {
        let _ = self.unregister_tx.send(session_id).await;
    }

    /// Forward one decoded frame to the decision loop
    ///
    /// Awaits if the hub is saturated; that backpressure lands on the
    /// producing connection only.
    pub async fn submit(&self, request: InboundRequest) -> Result<(), SendError> {
        self.inbound_tx
            .send(request)
            .await
            .map_err(|_| SendError::Closed)
    }
}

/// The hub actor
///
/// Owns the connection set and the authenticated-identity index. The
/// decision loop is the sole mutator of both.
pub struct Hub {
    /// All live sessions, authenticated or not
    connections: HashMap<SessionId, Session>,
    /// The single authoritative session per authenticated user
    authenticated: HashMap<UserId, SessionId>,
    register_rx: mpsc::Receiver<Session>,
    unregister_rx: mpsc::Receiver<SessionId>,
    inbound_rx: mpsc::Receiver<InboundRequest>,
    users: UserService,
    rooms: RoomService,
    messages: Arc<dyn MessageStore>,
}

impl Hub {
    /// Create a hub and the handle that feeds it
    pub fn new(
        users: UserService,
        rooms: RoomService,
        messages: Arc<dyn MessageStore>,
    ) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (
            Self {
                connections: HashMap::new(),
                authenticated: HashMap::new(),
                register_rx,
                unregister_rx,
                inbound_rx,
                users,
                rooms,
                messages,
            },
            HubHandle {
                register_tx,
                unregister_tx,
                inbound_tx,
            },
        )
    }

    /// Run the decision loop until every handle is dropped
    pub async fn run(mut self) {
        info!("hub started");

        loop {
            tokio::select! {
                // Lifecycle events win over chat traffic so a session is
                // always registered before its first frame is dispatched.
                biased;
                Some(session) = self.register_rx.recv() => self.handle_register(session),
                Some(session_id) = self.unregister_rx.recv() => self.handle_unregister(session_id),
                Some(request) = self.inbound_rx.recv() => self.handle_request(request).await,
                else => break,
            }
        }

        info!("hub shutting down");
    }

    fn handle_register(&mut self, session: Session) {
        debug!(session = %session.id(), "session registered");
        self.connections.insert(session.id(), session);
    }

    fn handle_unregister(&mut self, session_id: SessionId) {
        let Some(mut session) = self.connections.remove(&session_id) else {
            return;
        };
        if let Some(auth) = session.auth() {
            // A displacement may already have pointed the identity at a
            // newer session; only drop the entry if it is still ours.
            if self.authenticated.get(&auth.user_id) == Some(&session_id) {
                self.authenticated.remove(&auth.user_id);
            }
        }
        session.close();
        debug!(
            session = %session_id,
            connections = self.connections.len(),
            "session unregistered"
        );
    }

    /// Dispatch one inbound frame by kind
    async fn handle_request(&mut self, request: InboundRequest) {
        let InboundRequest {
            session_id,
            envelope,
        } = request;

        if !self.connections.contains_key(&session_id) {
            // The frame raced with unregister; nothing to reply to.
            return;
        }

        match envelope.kind.as_str() {
            "register" => {
                self.handle_register_user(session_id, envelope.payload).await;
                return;
            }
            "login" => {
                self.handle_login(session_id, envelope.payload).await;
                return;
            }
            _ => {}
        }

        // Everything below requires an authenticated session. The read
        // pump already gates this; frames injected between displacement
        // and unregister land here too.
        if self.session_auth(session_id).is_none() {
            self.reply(session_id, ServerFrame::error("Authentication required."));
            return;
        }

        match envelope.kind.as_str() {
            "send_direct_message" => {
                self.handle_send_direct_message(session_id, envelope.payload)
                    .await
            }
            "create_room" => self.handle_create_room(session_id, envelope.payload).await,
            "join_room" => self.handle_join_room(session_id, envelope.payload).await,
            "leave_room" => self.handle_leave_room(session_id, envelope.payload).await,
            "send_room_message" => {
                self.handle_send_room_message(session_id, envelope.payload)
                    .await
            }
            "list_rooms" => self.handle_list_rooms(session_id).await,
            "list_members" => self.handle_list_members(session_id, envelope.payload).await,
            kind => self.reply(
                session_id,
                ServerFrame::error(format!("Unknown message type: {kind}")),
            ),
        }
    }

    // --- Auth handlers ---

    async fn handle_register_user(&mut self, session_id: SessionId, payload: Value) {
        let Some(creds) = self.parse_payload::<CredentialsPayload>(session_id, "register", payload)
        else {
            return;
        };
        match self.users.register(&creds.nickname, &creds.password).await {
            Ok(user) => self.authenticate(session_id, &user),
            Err(err) => {
                debug!(session = %session_id, %err, "registration rejected");
                self.reply(
                    session_id,
                    ServerFrame::error(format!("Registration failed: {err}")),
                );
            }
        }
    }

    async fn handle_login(&mut self, session_id: SessionId, payload: Value) {
        let Some(creds) = self.parse_payload::<CredentialsPayload>(session_id, "login", payload)
        else {
            return;
        };
        match self.users.login(&creds.nickname, &creds.password).await {
            Ok(user) => self.authenticate(session_id, &user),
            Err(err) => {
                debug!(session = %session_id, %err, "login rejected");
                self.reply(
                    session_id,
                    ServerFrame::error(format!("Login failed: {err}")),
                );
            }
        }
    }

    /// Bind `user` to `session_id`, displacing any prior session holding
    /// the same identity
    ///
    /// Re-authenticating the same session as the same user is a no-op
    /// upsert. The displaced session keeps its place in `connections`;
    /// its read pump observes the closed transport and unregisters.
    fn authenticate(&mut self, session_id: SessionId, user: &User) {
        if !self.connections.contains_key(&session_id) {
            // The session vanished during the store round-trip; leave the
            // index untouched.
            return;
        }

        if let Some(&prior_id) = self.authenticated.get(&user.id) {
            if prior_id != session_id {
                if let Some(prior) = self.connections.get_mut(&prior_id) {
                    let _ = prior.enqueue(ServerFrame::error(
                        "You have been logged in from another location.",
                    ));
                    prior.close();
                    info!(displaced = %prior_id, user = %user.nickname, "prior session displaced");
                }
            }
        }

        let Some(session) = self.connections.get_mut(&session_id) else {
            return;
        };
        // Re-login as a different identity must not leave a stale index
        // entry behind.
        if let Some(old) = session.auth() {
            let old_id = old.user_id;
            if old_id != user.id && self.authenticated.get(&old_id) == Some(&session_id) {
                self.authenticated.remove(&old_id);
            }
        }
        session.set_auth(Auth {
            user_id: user.id,
            nickname: user.nickname.clone(),
        });
        self.authenticated.insert(user.id, session_id);
        if session
            .enqueue(ServerFrame::LoginSuccess {
                user_id: user.id,
                nickname: user.nickname.clone(),
            })
            .is_err()
        {
            warn!(session = %session_id, "failed to deliver login_success");
        }
        info!(session = %session_id, user = %user.nickname, "session authenticated");
    }

    // --- Chat handlers ---

    async fn handle_send_direct_message(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) = self.parse_payload::<SendDirectMessagePayload>(
            session_id,
            "send_direct_message",
            payload,
        ) else {
            return;
        };
        let Some(auth) = self.session_auth(session_id) else {
            return;
        };

        let recipient = match self.users.get_by_nickname(&payload.recipient_nickname).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.reply(
                    session_id,
                    ServerFrame::error(format!(
                        "User '{}' not found.",
                        payload.recipient_nickname
                    )),
                );
                return;
            }
            Err(err) => {
                error!(%err, "recipient lookup failed");
                self.reply(
                    session_id,
                    ServerFrame::error(format!(
                        "User '{}' not found.",
                        payload.recipient_nickname
                    )),
                );
                return;
            }
        };

        let message = ChatMessage::new(
            dm_conversation_id(auth.user_id, recipient.id),
            auth.user_id,
            auth.nickname.clone(),
            payload.content,
        );

        // Best-effort durability: a failed save is logged and delivery
        // proceeds.
        if let Err(err) = self.messages.save_message(&message).await {
            error!(%err, conversation = %message.conversation_id, "failed to persist direct message");
        }

        // No echo to the sender; the client records its own outgoing
        // messages locally.
        if let Some(&recipient_session) = self.authenticated.get(&recipient.id) {
            self.reply(
                recipient_session,
                ServerFrame::NewDirectMessage {
                    sender: auth.nickname,
                    content: message.content.clone(),
                    timestamp: message.timestamp,
                },
            );
        }
    }

    async fn handle_create_room(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) =
            self.parse_payload::<CreateRoomPayload>(session_id, "create_room", payload)
        else {
            return;
        };
        let Some(auth) = self.session_auth(session_id) else {
            return;
        };

        match self
            .rooms
            .create_room(&payload.name, &payload.password, auth.user_id)
            .await
        {
            Ok(room) => {
                info!(room = %room.name, owner = %auth.nickname, "room created");
                self.reply(
                    session_id,
                    ServerFrame::JoinSuccess {
                        room_id: room.id,
                        room_name: room.name,
                    },
                );
            }
            Err(err) => self.reply(
                session_id,
                ServerFrame::error(format!("Failed to create room: {err}.")),
            ),
        }
    }

    async fn handle_join_room(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) = self.parse_payload::<JoinRoomPayload>(session_id, "join_room", payload)
        else {
            return;
        };
        let Some(auth) = self.session_auth(session_id) else {
            return;
        };

        match self
            .rooms
            .join_room(&payload.room_name, &payload.password, auth.user_id)
            .await
        {
            Ok(room) => {
                info!(room = %room.name, user = %auth.nickname, "user joined room");
                self.reply(
                    session_id,
                    ServerFrame::JoinSuccess {
                        room_id: room.id,
                        room_name: room.name,
                    },
                );
            }
            Err(err) => self.reply(
                session_id,
                ServerFrame::error(format!("Failed to join room: {err}.")),
            ),
        }
    }

    async fn handle_leave_room(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) =
            self.parse_payload::<LeaveRoomPayload>(session_id, "leave_room", payload)
        else {
            return;
        };
        let Some(auth) = self.session_auth(session_id) else {
            return;
        };

        match self.rooms.leave_room(&payload.room_name, auth.user_id).await {
            Ok(room) => {
                info!(room = %room.name, user = %auth.nickname, "user left room");
                self.reply(session_id, ServerFrame::LeaveSuccess { room_id: room.id });
            }
            Err(err) => self.reply(
                session_id,
                ServerFrame::error(format!("Failed to leave room: {err}.")),
            ),
        }
    }

    async fn handle_send_room_message(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) =
            self.parse_payload::<SendRoomMessagePayload>(session_id, "send_room_message", payload)
        else {
            return;
        };
        let Some(auth) = self.session_auth(session_id) else {
            return;
        };

        match self.rooms.is_member(&payload.room_name, auth.user_id).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                self.reply(
                    session_id,
                    ServerFrame::error(format!(
                        "You are not a member of room '{}'.",
                        payload.room_name
                    )),
                );
                return;
            }
        }

        let room = match self.rooms.get_room_by_name(&payload.room_name).await {
            Ok(Some(room)) => room,
            _ => {
                self.reply(session_id, ServerFrame::error("Room not found."));
                return;
            }
        };

        let message = ChatMessage::new(
            room.id.to_string(),
            auth.user_id,
            auth.nickname.clone(),
            payload.content,
        );
        if let Err(err) = self.messages.save_message(&message).await {
            error!(%err, room = %room.name, "failed to persist room message");
        }

        let member_ids = match self.rooms.member_ids(&room.name).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(%err, room = %room.name, "failed to load room members");
                return;
            }
        };

        let frame = ServerFrame::RoomMessage {
            room_name: room.name.clone(),
            sender_nickname: auth.nickname,
            content: message.content.clone(),
            timestamp: message.timestamp,
        };

        // Fan out to every online member, the sender included. A full
        // queue costs only that recipient this frame.
        for member_id in member_ids {
            if let Some(&member_session) = self.authenticated.get(&member_id) {
                self.reply(member_session, frame.clone());
            }
        }
    }

    async fn handle_list_rooms(&mut self, session_id: SessionId) {
        match self.rooms.list_rooms().await {
            Ok(rooms) => {
                let rooms = rooms
                    .into_iter()
                    .map(|r| RoomInfo {
                        id: r.id,
                        name: r.name,
                    })
                    .collect();
                self.reply(session_id, ServerFrame::RoomList { rooms });
            }
            Err(err) => {
                error!(%err, "room listing failed");
                self.reply(
                    session_id,
                    ServerFrame::error("Failed to retrieve room list."),
                );
            }
        }
    }

    async fn handle_list_members(&mut self, session_id: SessionId, payload: Value) {
        let Some(payload) =
            self.parse_payload::<ListMembersPayload>(session_id, "list_members", payload)
        else {
            return;
        };

        match self.rooms.members(&payload.room_name).await {
            Ok(members) => self.reply(
                session_id,
                ServerFrame::RoomMembers {
                    room_name: payload.room_name,
                    members,
                },
            ),
            Err(err) => self.reply(
                session_id,
                ServerFrame::error(format!(
                    "Failed to get members for room '{}': {err}",
                    payload.room_name
                )),
            ),
        }
    }

    // --- Helpers ---

    /// Non-blocking reply to a single session
    fn reply(&self, session_id: SessionId, frame: ServerFrame) {
        let Some(session) = self.connections.get(&session_id) else {
            return;
        };
        match session.enqueue(frame) {
            Ok(()) => {}
            Err(SendError::Full) => {
                warn!(session = %session_id, "outbound queue full, dropping frame")
            }
            Err(SendError::Closed) => {
                debug!(session = %session_id, "outbound queue closed, dropping frame")
            }
        }
    }

    fn session_auth(&self, session_id: SessionId) -> Option<Auth> {
        self.connections
            .get(&session_id)
            .and_then(|s| s.auth().cloned())
    }

    /// Decode a per-kind payload, replying with a protocol error on
    /// failure
    fn parse_payload<T: DeserializeOwned>(
        &self,
        session_id: SessionId,
        kind: &str,
        payload: Value,
    ) -> Option<T> {
        match serde_json::from_value(payload) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(session = %session_id, kind, %err, "malformed payload");
                self.reply(
                    session_id,
                    ServerFrame::error(format!("Invalid {kind} payload.")),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::memory::{MemoryMessageStore, MemoryRoomStore, MemoryUserStore};
    use crate::session::OUTBOUND_QUEUE_CAPACITY;

    fn spawn_hub() -> HubHandle {
        let users = Arc::new(MemoryUserStore::new());
        let rooms = Arc::new(MemoryRoomStore::new(users.clone()));
        let messages = Arc::new(MemoryMessageStore::new());
        let (hub, handle) = Hub::new(
            UserService::new(users),
            RoomService::new(rooms),
            messages,
        );
        tokio::spawn(hub.run());
        handle
    }

    async fn connect(handle: &HubHandle) -> (SessionId, mpsc::Receiver<ServerFrame>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        handle.register(Session::new(id, tx)).await.unwrap();
        (id, rx)
    }

    async fn send(handle: &HubHandle, session_id: SessionId, kind: &str, payload: Value) {
        handle
            .submit(InboundRequest {
                session_id,
                envelope: Envelope {
                    kind: kind.to_string(),
                    payload,
                },
            })
            .await
            .unwrap();
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed")
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<ServerFrame>) {
        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "expected no frame"
        );
    }

    fn error_content(frame: ServerFrame) -> String {
        match frame {
            ServerFrame::ErrorMessage { content, .. } => content,
            other => panic!("expected error_message, got {other:?}"),
        }
    }

    /// Register a nickname on a fresh session and drain the login_success
    async fn register_user(
        handle: &HubHandle,
        nickname: &str,
    ) -> (SessionId, mpsc::Receiver<ServerFrame>, UserId) {
        let (id, mut rx) = connect(handle).await;
        send(
            handle,
            id,
            "register",
            json!({"nickname": nickname, "password": "pw"}),
        )
        .await;
        match recv(&mut rx).await {
            ServerFrame::LoginSuccess { user_id, nickname: n } => {
                assert_eq!(n, nickname);
                (id, rx, user_id)
            }
            other => panic!("expected login_success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let handle = spawn_hub();
        let (s1, _rx1, user_id) = register_user(&handle, "alice").await;
        handle.unregister(s1).await;

        let (s2, mut rx2) = connect(&handle).await;
        send(
            &handle,
            s2,
            "login",
            json!({"nickname": "alice", "password": "pw"}),
        )
        .await;
        match recv(&mut rx2).await {
            ServerFrame::LoginSuccess {
                user_id: logged_in, ..
            } => assert_eq!(logged_in, user_id),
            other => panic!("expected login_success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_taken_nickname() {
        let handle = spawn_hub();
        let _alice = register_user(&handle, "alice").await;

        let (s2, mut rx2) = connect(&handle).await;
        send(
            &handle,
            s2,
            "register",
            json!({"nickname": "alice", "password": "pw"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx2).await),
            "Registration failed: nickname is already taken"
        );
    }

    #[tokio::test]
    async fn test_login_wrong_password_leaves_session_unauthenticated() {
        let handle = spawn_hub();
        let _alice = register_user(&handle, "alice").await;

        let (s2, mut rx2) = connect(&handle).await;
        send(
            &handle,
            s2,
            "login",
            json!({"nickname": "alice", "password": "wrong"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx2).await),
            "Login failed: invalid credentials"
        );

        // Still unauthenticated: the hub gate rejects chat traffic
        send(&handle, s2, "list_rooms", Value::Null).await;
        assert_eq!(
            error_content(recv(&mut rx2).await),
            "Authentication required."
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_recoverable_error() {
        let handle = spawn_hub();
        let (s1, mut rx1) = connect(&handle).await;
        send(&handle, s1, "register", json!({"nickname": "alice"})).await;
        assert_eq!(
            error_content(recv(&mut rx1).await),
            "Invalid register payload."
        );

        // The session survives and can register properly
        send(
            &handle,
            s1,
            "register",
            json!({"nickname": "alice", "password": "pw"}),
        )
        .await;
        assert!(matches!(
            recv(&mut rx1).await,
            ServerFrame::LoginSuccess { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let handle = spawn_hub();
        let (s1, mut rx1, _) = register_user(&handle, "alice").await;
        send(&handle, s1, "dance", Value::Null).await;
        assert_eq!(
            error_content(recv(&mut rx1).await),
            "Unknown message type: dance"
        );
    }

    #[tokio::test]
    async fn test_direct_message_reaches_recipient_only() {
        let handle = spawn_hub();
        let (s1, mut rx1, _) = register_user(&handle, "alice").await;
        let (_s2, mut rx2, _) = register_user(&handle, "bob").await;

        send(
            &handle,
            s1,
            "send_direct_message",
            json!({"recipient_nickname": "bob", "content": "hi"}),
        )
        .await;

        match recv(&mut rx2).await {
            ServerFrame::NewDirectMessage {
                sender, content, ..
            } => {
                assert_eq!(sender, "alice");
                assert_eq!(content, "hi");
            }
            other => panic!("expected new_direct_message, got {other:?}"),
        }
        // No echo to the sender
        assert_silent(&mut rx1).await;
    }

    #[tokio::test]
    async fn test_direct_message_to_unknown_user() {
        let handle = spawn_hub();
        let (s1, mut rx1, _) = register_user(&handle, "alice").await;
        send(
            &handle,
            s1,
            "send_direct_message",
            json!({"recipient_nickname": "ghost", "content": "hi"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx1).await),
            "User 'ghost' not found."
        );
    }

    #[tokio::test]
    async fn test_direct_message_to_offline_user_is_persisted_not_delivered() {
        let handle = spawn_hub();
        let (s_bob, _rx_bob, _) = register_user(&handle, "bob").await;
        handle.unregister(s_bob).await;

        let (s1, mut rx1, _) = register_user(&handle, "alice").await;
        send(
            &handle,
            s1,
            "send_direct_message",
            json!({"recipient_nickname": "bob", "content": "hi"}),
        )
        .await;
        // No error and no echo: the message went to the store only
        assert_silent(&mut rx1).await;
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let handle = spawn_hub();
        let (s_alice, mut rx_alice, _) = register_user(&handle, "alice").await;
        let (s_bob, mut rx_bob, _) = register_user(&handle, "bob").await;

        // alice creates the room and auto-joins
        send(
            &handle,
            s_alice,
            "create_room",
            json!({"name": "gophers", "password": "1234"}),
        )
        .await;
        let room_id = match recv(&mut rx_alice).await {
            ServerFrame::JoinSuccess { room_id, room_name } => {
                assert_eq!(room_name, "gophers");
                room_id
            }
            other => panic!("expected join_success, got {other:?}"),
        };

        // wrong password
        send(
            &handle,
            s_bob,
            "join_room",
            json!({"room_name": "gophers", "password": "wrong"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx_bob).await),
            "Failed to join room: invalid password."
        );

        // right password
        send(
            &handle,
            s_bob,
            "join_room",
            json!({"room_name": "gophers", "password": "1234"}),
        )
        .await;
        assert!(matches!(
            recv(&mut rx_bob).await,
            ServerFrame::JoinSuccess { .. }
        ));

        // bob's message fans out to both members, himself included
        send(
            &handle,
            s_bob,
            "send_room_message",
            json!({"room_name": "gophers", "content": "hello"}),
        )
        .await;
        for rx in [&mut rx_alice, &mut rx_bob] {
            match recv(rx).await {
                ServerFrame::RoomMessage {
                    room_name,
                    sender_nickname,
                    content,
                    ..
                } => {
                    assert_eq!(room_name, "gophers");
                    assert_eq!(sender_nickname, "bob");
                    assert_eq!(content, "hello");
                }
                other => panic!("expected room_message, got {other:?}"),
            }
        }

        // members list
        send(
            &handle,
            s_alice,
            "list_members",
            json!({"room_name": "gophers"}),
        )
        .await;
        match recv(&mut rx_alice).await {
            ServerFrame::RoomMembers { room_name, mut members } => {
                assert_eq!(room_name, "gophers");
                members.sort();
                assert_eq!(members, vec!["alice", "bob"]);
            }
            other => panic!("expected room_members, got {other:?}"),
        }

        // room list
        send(&handle, s_alice, "list_rooms", Value::Null).await;
        match recv(&mut rx_alice).await {
            ServerFrame::RoomList { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].name, "gophers");
                assert_eq!(rooms[0].id, room_id);
            }
            other => panic!("expected room_list, got {other:?}"),
        }

        // bob leaves; leaving twice still succeeds
        for _ in 0..2 {
            send(
                &handle,
                s_bob,
                "leave_room",
                json!({"room_name": "gophers"}),
            )
            .await;
            match recv(&mut rx_bob).await {
                ServerFrame::LeaveSuccess { room_id: left } => assert_eq!(left, room_id),
                other => panic!("expected leave_success, got {other:?}"),
            }
        }

        // after leaving, bob is no longer in the fan-out
        send(
            &handle,
            s_alice,
            "send_room_message",
            json!({"room_name": "gophers", "content": "bye"}),
        )
        .await;
        assert!(matches!(
            recv(&mut rx_alice).await,
            ServerFrame::RoomMessage { .. }
        ));
        assert_silent(&mut rx_bob).await;
    }

    #[tokio::test]
    async fn test_non_member_cannot_send_to_room() {
        let handle = spawn_hub();
        let (s_alice, mut rx_alice, _) = register_user(&handle, "alice").await;
        let (s_carol, mut rx_carol, _) = register_user(&handle, "carol").await;

        send(
            &handle,
            s_alice,
            "create_room",
            json!({"name": "gophers", "password": "1234"}),
        )
        .await;
        recv(&mut rx_alice).await;

        send(
            &handle,
            s_carol,
            "send_room_message",
            json!({"room_name": "gophers", "content": "hey"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx_carol).await),
            "You are not a member of room 'gophers'."
        );
        // No broadcast happened
        assert_silent(&mut rx_alice).await;
    }

    #[tokio::test]
    async fn test_create_room_rejects_taken_name() {
        let handle = spawn_hub();
        let (s_alice, mut rx_alice, _) = register_user(&handle, "alice").await;
        send(
            &handle,
            s_alice,
            "create_room",
            json!({"name": "gophers", "password": "1234"}),
        )
        .await;
        recv(&mut rx_alice).await;

        send(
            &handle,
            s_alice,
            "create_room",
            json!({"name": "gophers", "password": "other"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx_alice).await),
            "Failed to create room: room name is already taken."
        );
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let handle = spawn_hub();
        let (s1, mut rx1, _) = register_user(&handle, "alice").await;
        send(
            &handle,
            s1,
            "join_room",
            json!({"room_name": "nowhere", "password": "pw"}),
        )
        .await;
        assert_eq!(
            error_content(recv(&mut rx1).await),
            "Failed to join room: room not found."
        );
    }

    #[tokio::test]
    async fn test_displacement() {
        let handle = spawn_hub();
        let (s1, mut rx1, user_id) = register_user(&handle, "alice").await;

        // alice logs in again from a second connection
        let (s2, mut rx2) = connect(&handle).await;
        send(
            &handle,
            s2,
            "login",
            json!({"nickname": "alice", "password": "pw"}),
        )
        .await;
        match recv(&mut rx2).await {
            ServerFrame::LoginSuccess {
                user_id: logged_in, ..
            } => assert_eq!(logged_in, user_id),
            other => panic!("expected login_success, got {other:?}"),
        }

        // The displaced session gets a final error, then its queue closes
        assert_eq!(
            error_content(recv(&mut rx1).await),
            "You have been logged in from another location."
        );
        assert!(rx1.recv().await.is_none());

        // The displaced session's eventual unregister must not evict s2
        handle.unregister(s1).await;

        // A DM to alice now reaches only the new session
        let (s_bob, _rx_bob, _) = register_user(&handle, "bob").await;
        send(
            &handle,
            s_bob,
            "send_direct_message",
            json!({"recipient_nickname": "alice", "content": "still there?"}),
        )
        .await;
        match recv(&mut rx2).await {
            ServerFrame::NewDirectMessage { sender, .. } => assert_eq!(sender, "bob"),
            other => panic!("expected new_direct_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relogin_same_session_is_upsert() {
        let handle = spawn_hub();
        let (s1, mut rx1, user_id) = register_user(&handle, "alice").await;

        send(
            &handle,
            s1,
            "login",
            json!({"nickname": "alice", "password": "pw"}),
        )
        .await;
        // No displacement error, just a fresh login_success
        match recv(&mut rx1).await {
            ServerFrame::LoginSuccess {
                user_id: logged_in, ..
            } => assert_eq!(logged_in, user_id),
            other => panic!("expected login_success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_frames_drop_without_stalling_hub() {
        let handle = spawn_hub();
        let (s_alice, mut rx_alice, _) = register_user(&handle, "alice").await;
        let (_s_bob, mut rx_bob, _) = register_user(&handle, "bob").await;

        // bob's write pump is frozen: nothing drains rx_bob
        for i in 0..300 {
            send(
                &handle,
                s_alice,
                "send_direct_message",
                json!({"recipient_nickname": "bob", "content": format!("m{i}")}),
            )
            .await;
        }

        // The hub is still responsive for alice
        send(&handle, s_alice, "list_rooms", Value::Null).await;
        assert!(matches!(recv(&mut rx_alice).await, ServerFrame::RoomList { .. }));

        // bob holds at most a full queue; the surplus was dropped
        let mut buffered = 0;
        while rx_bob.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, OUTBOUND_QUEUE_CAPACITY);
    }
}
