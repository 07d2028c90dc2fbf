//! ShellTalk Server - Entry Point
//!
//! Wires the stores, services, and hub actor together, then accepts
//! connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shelltalk_server::config::Config;
use shelltalk_server::handler::handle_connection;
use shelltalk_server::hub::Hub;
use shelltalk_server::memory::{MemoryMessageStore, MemoryRoomStore, MemoryUserStore};
use shelltalk_server::service::{RoomService, UserService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=shelltalk_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shelltalk_server=info")),
        )
        .init();

    let config = Config::from_env();

    let users = Arc::new(MemoryUserStore::new());
    let rooms = Arc::new(MemoryRoomStore::new(users.clone()));
    let messages = Arc::new(MemoryMessageStore::new());

    let (hub, handle) = Hub::new(
        UserService::new(users),
        RoomService::new(rooms),
        messages,
    );
    tokio::spawn(hub.run());
    info!("hub actor started");

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("WebSocket chat server listening on {}", config.bind_addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle).await {
                        error!(peer = %addr, "connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
