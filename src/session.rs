//! Hub-owned session state for one client connection
//!
//! The hub owns each `Session` for its whole lifetime. The connection's
//! I/O pumps never touch it directly; they hold a weak sender for
//! self-addressed errors and the shared authenticated flag for the
//! pre-auth gate. Closing the outbound queue is the write pump's shutdown
//! signal and happens at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerFrame;
use crate::types::{SessionId, UserId};

/// Outbound queue capacity per session
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Authenticated identity bound to a session
#[derive(Debug, Clone)]
pub struct Auth {
    pub user_id: UserId,
    pub nickname: String,
}

/// One client connection as the hub sees it
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    /// Sender half of the outbound queue; `None` once closed
    outbound: Option<mpsc::Sender<ServerFrame>>,
    auth: Option<Auth>,
    /// Mirror of `auth.is_some()` shared with the read pump
    authenticated: Arc<AtomicBool>,
}

impl Session {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id,
            outbound: Some(outbound),
            auth: None,
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Bind an authenticated identity to this session
    pub fn set_auth(&mut self, auth: Auth) {
        self.auth = Some(auth);
        self.authenticated.store(true, Ordering::Relaxed);
    }

    /// Shared flag the read pump checks for its pre-auth gate
    pub fn auth_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.authenticated)
    }

    /// Non-blocking enqueue onto the outbound queue
    ///
    /// Either error means the frame was dropped for this one recipient:
    /// `Full` is the slow-consumer policy, `Closed` means the hub already
    /// shut the queue.
    pub fn enqueue(&self, frame: ServerFrame) -> Result<(), SendError> {
        let Some(tx) = &self.outbound else {
            return Err(SendError::Closed);
        };
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Close the outbound queue
    ///
    /// The first call drops the sender, which ends the write pump once it
    /// drains; later calls are no-ops.
    pub fn close(&mut self) {
        self.outbound.take();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }
}
