//! OnlyCat Gateway Client Core Library
//!
//! This crate provides the core functionality for the OnlyCat Rust SDK:
//! the connection state machine, request/response correlation over the
//! gateway's event channel, authentication plumbing, and the default
//! WebSocket transport.

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod request;
pub mod transport;

pub fn version() -> &'static str {
    "0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
