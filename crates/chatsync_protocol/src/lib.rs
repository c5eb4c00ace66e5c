//! # chatsync protocol
//!
//! Wire types shared by the chatsync engine and its tooling.
//!
//! This crate provides:
//! - `Channel`, `Message` and `Reaction` as served by the chat API
//! - `Timestamp`, the server-assigned ordering key used by sync cursors
//! - `Batch` and `RemoteEvent`, the tagged changes fed to the reconciler
//! - REST request/response bodies and list-body decoding
//! - Push frames (`PushEvent`, `PushCommand`) carried over the socket
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod error;
mod events;
mod models;
mod push;
mod timestamp;

pub use api::{
    decode_batch, split_list_body, CreateChannelRequest, CreatedChannel, CreatedMessage,
    DecodedBatch, ErrorBody, PostMessageRequest, RawList, ReactionRequest, ReactionState,
    RenameChannelRequest,
};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{Batch, Entity, EntityKind, RemoteEvent};
pub use models::{
    Channel, ChannelId, CurrentUser, Message, MessageId, Reaction, ReactionMap, UserId,
};
pub use push::{PushCommand, PushEvent};
pub use timestamp::Timestamp;
