//! # chatsync testkit
//!
//! Test utilities for the chatsync engine.
//!
//! This crate provides:
//! - Fixtures for timestamps, channels, messages and users
//! - An in-memory chat server implementing [`chatsync_engine::HttpClient`]
//! - A scripted push socket implementing [`chatsync_engine::SocketConnector`]
//! - Property-based test generators using proptest
//! - Waiting helpers for spawned engines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chatsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_with_server() {
//!     let server = FakeChatServer::new();
//!     let general = server.add_channel("general");
//!     // ... run an engine against `server.clone()`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_server;
pub mod fake_socket;
pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_server::*;
    pub use crate::fake_socket::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fake_server::*;
pub use fake_socket::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
