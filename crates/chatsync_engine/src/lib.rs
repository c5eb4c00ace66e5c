//! # chatsync engine
//!
//! Incremental sync engine for a multi-channel chat client.
//!
//! This crate provides:
//! - Timestamp cursors (one per stream, monotonic, resettable)
//! - Polling and push transports producing entity batches and events
//! - A reconciler that owns the view and emits view mutations
//! - An action dispatcher with local validation
//! - A single-owner driver with timers, subscriptions and cancellation
//!
//! ## Architecture
//!
//! User action → dispatcher → server; server change → transport → batch →
//! reconciler → view mutations → cursor advance.
//!
//! ## Key Invariants
//!
//! - Applying a batch twice changes nothing
//! - Deletions win over creations within a batch
//! - Cursors never move backwards while their stream is active
//! - Results for a channel that is no longer selected are discarded
//! - A 401 anywhere suspends the session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod dispatcher;
mod engine;
mod error;
mod http;
mod polling;
mod push;
mod reconciler;
mod session;
mod state;

pub use config::{RetryConfig, SyncConfig, TransportMode};
pub use cursor::{Cursors, TimestampCursor, AFTER_PARAM};
pub use dispatcher::{ActionDispatcher, PostOutcome};
pub use engine::{EngineEvent, EngineHandle, SyncEngine, SyncSignal};
pub use error::{SyncError, SyncResult};
pub use http::{ChatApi, HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
pub use polling::{PollOutcome, PollingAdapter};
pub use push::{
    PushAdapter, PushEmitter, PushInput, PushOutput, PushSignal, SocketConnection,
    SocketConnector, WsConnection, WsConnector,
};
pub use reconciler::{reaction_intent, Origin, ReactionIntent, Reconciler, ViewMutation, ViewState};
pub use session::{MessageTag, SyncSession};
pub use state::{SyncState, SyncStats};
