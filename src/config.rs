//! Server configuration
//!
//! Resolved once at startup; nothing here is reloaded at runtime.

use std::env;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the TCP listener binds to
    pub bind_addr: String,
}

impl Config {
    /// Resolve configuration from the command line and environment
    ///
    /// Precedence: first CLI argument, then `SHELLTALK_ADDR`, then the
    /// default.
    pub fn from_env() -> Self {
        let bind_addr = env::args()
            .nth(1)
            .or_else(|| env::var("SHELLTALK_ADDR").ok())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        Self { bind_addr }
    }
}
