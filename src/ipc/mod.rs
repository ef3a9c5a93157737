//! IPC (Inter-Process Communication) Module
//!
//! Unix socket boundary between the extension's native host and the daemon.
//! Protocol: one newline-delimited JSON request per connection, one reply.

pub mod client;
pub mod messages;
pub mod server;

pub use client::IpcClient;
pub use messages::*;
pub use server::IpcServer;

use std::path::PathBuf;

/// Get the Unix socket path for IPC
pub fn socket_path() -> PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "lucid".to_string());
    let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    dir.join(format!("lucid-{}.sock", user))
}
