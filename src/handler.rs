//! WebSocket accept path and per-connection I/O pumps
//!
//! Each accepted connection gets exactly two tasks. The read pump is the
//! sole reader of the socket: it decodes envelopes, applies the pre-auth
//! gate, forwards frames to the hub, and drives unregister on the way
//! out. The write pump is the sole writer: it drains the session's
//! outbound queue and treats the queue closing as its shutdown signal.
//! No write ever happens outside the write pump.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::hub::{HubHandle, InboundRequest};
use crate::message::{Envelope, ServerFrame};
use crate::session::{Session, OUTBOUND_QUEUE_CAPACITY};
use crate::types::SessionId;

/// Handle one inbound TCP connection for its whole lifetime
///
/// Performs the WebSocket handshake (GET `/ws` only), registers a session
/// with the hub, spawns the write pump, and runs the read pump in place.
pub async fn handle_connection(stream: TcpStream, hub: HubHandle) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, require_ws_path).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session_id = SessionId::new();
    info!(session = %session_id, peer = %peer_addr, "client connected");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE_CAPACITY);
    // The pumps keep only a weak handle; the hub-owned session holds the
    // one strong sender, so closing the queue stays the hub's call.
    let self_tx = outbound_tx.downgrade();
    let session = Session::new(session_id, outbound_tx);
    let auth_flag = session.auth_flag();

    if hub.register(session).await.is_err() {
        error!(session = %session_id, "hub unavailable, dropping connection");
        return Err(AppError::ChannelSend);
    }

    // Write pump: ends when the hub closes the outbound queue, or on the
    // first transport write error (the queue stays open; unregister will
    // close it).
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("socket write failed, ending write pump");
                        return;
                    }
                }
                Err(err) => error!(%err, "failed to serialize outbound frame"),
            }
        }
        // Queue closed by the hub: final shutdown
        let _ = ws_sender.close().await;
    });

    // Read pump, in place
    while let Some(incoming) = ws_receiver.next().await {
        match incoming {
            Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => {
                    if gate_unauthenticated(&auth_flag, &envelope, &self_tx) {
                        continue;
                    }
                    if hub
                        .submit(InboundRequest {
                            session_id,
                            envelope,
                        })
                        .await
                        .is_err()
                    {
                        debug!(session = %session_id, "hub gone, ending read pump");
                        break;
                    }
                }
                Err(err) => {
                    warn!(session = %session_id, %err, "undecodable frame");
                    send_self(
                        &self_tx,
                        ServerFrame::error(format!("Invalid message format: {err}")),
                    );
                }
            },
            Ok(Message::Close(_)) => {
                debug!(session = %session_id, "close frame received");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong replies are handled by tungstenite itself
            }
            Ok(_) => {
                // Binary and fragmented frames are ignored
            }
            Err(err) => {
                debug!(session = %session_id, %err, "socket read failed");
                break;
            }
        }
    }

    hub.unregister(session_id).await;
    let _ = write_task.await;
    info!(session = %session_id, "client disconnected");

    Ok(())
}

/// Pre-auth gate: unauthenticated sessions may only register or log in
///
/// Returns true when the frame was short-circuited with a self-addressed
/// error instead of being forwarded to the hub.
fn gate_unauthenticated(
    auth_flag: &AtomicBool,
    envelope: &Envelope,
    self_tx: &mpsc::WeakSender<ServerFrame>,
) -> bool {
    if auth_flag.load(Ordering::Relaxed) {
        return false;
    }
    if envelope.kind == "login" || envelope.kind == "register" {
        return false;
    }
    send_self(self_tx, ServerFrame::error("Authentication required."));
    true
}

/// Best-effort frame onto this session's own queue
fn send_self(self_tx: &mpsc::WeakSender<ServerFrame>, frame: ServerFrame) {
    if let Some(tx) = self_tx.upgrade() {
        let _ = tx.try_send(frame);
    }
}

/// Reject upgrade requests for any path other than `/ws`
fn require_ws_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == "/ws" {
        Ok(response)
    } else {
        let mut not_found = ErrorResponse::new(Some("not found".to_string()));
        *not_found.status_mut() = StatusCode::NOT_FOUND;
        Err(not_found)
    }
}
