//! Tagged remote changes fed to the reconciler.

use crate::models::{Channel, ChannelId, Message, MessageId};
use crate::timestamp::Timestamp;
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Kind of synced entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A channel in the global channel list.
    Channel,
    /// A message in one channel.
    Message,
}

/// An entity that can be reconciled by id.
pub trait Entity: Clone + Debug + DeserializeOwned {
    /// Identifier type.
    type Id: Copy + Eq + Hash + Ord + Debug + Display + DeserializeOwned;

    /// The kind of entity.
    const KIND: EntityKind;

    /// Returns the entity's id.
    fn id(&self) -> Self::Id;

    /// Returns the cursor key, if the server sent one.
    fn created_at(&self) -> Option<&Timestamp>;
}

impl Entity for Channel {
    type Id = ChannelId;
    const KIND: EntityKind = EntityKind::Channel;

    fn id(&self) -> ChannelId {
        self.id
    }

    fn created_at(&self) -> Option<&Timestamp> {
        self.created_at.as_ref()
    }
}

impl Entity for Message {
    type Id = MessageId;
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> MessageId {
        self.id
    }

    fn created_at(&self) -> Option<&Timestamp> {
        Some(&self.created_at)
    }
}

/// One sync cycle's worth of changes to a single stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<E: Entity> {
    /// Entities created since the cursor.
    pub created: Vec<E>,
    /// Entities whose mutable fields changed.
    pub updated: Vec<E>,
    /// Tombstoned ids.
    pub deleted_ids: Vec<E::Id>,
}

impl<E: Entity> Batch<E> {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted_ids: Vec::new(),
        }
    }

    /// Creates a batch of created entities only.
    pub fn created(created: Vec<E>) -> Self {
        Self {
            created,
            ..Self::new()
        }
    }

    /// Creates a batch carrying one updated entity.
    pub fn updated(entity: E) -> Self {
        Self {
            updated: vec![entity],
            ..Self::new()
        }
    }

    /// Creates a batch carrying one tombstone.
    pub fn deleted(id: E::Id) -> Self {
        Self {
            deleted_ids: vec![id],
            ..Self::new()
        }
    }

    /// Adds tombstones to the batch.
    pub fn with_deleted(mut self, ids: impl IntoIterator<Item = E::Id>) -> Self {
        self.deleted_ids.extend(ids);
        self
    }

    /// Returns true if the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted_ids.is_empty()
    }

    /// Total number of changes in the batch.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted_ids.len()
    }
}

impl<E: Entity> Default for Batch<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validated change observed on the push transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// A channel was created.
    ChannelCreated(Channel),
    /// A channel's mutable fields changed.
    ChannelUpdated(Channel),
    /// A channel was deleted.
    ChannelDeleted(ChannelId),
    /// A message was posted.
    MessageCreated(Message),
    /// A message's reactions changed.
    MessageUpdated(Message),
    /// A message was deleted.
    MessageDeleted {
        /// Parent channel.
        channel_id: ChannelId,
        /// Deleted message.
        message_id: MessageId,
    },
}

impl RemoteEvent {
    /// Returns the kind of entity this event concerns.
    pub fn kind(&self) -> EntityKind {
        match self {
            RemoteEvent::ChannelCreated(_)
            | RemoteEvent::ChannelUpdated(_)
            | RemoteEvent::ChannelDeleted(_) => EntityKind::Channel,
            RemoteEvent::MessageCreated(_)
            | RemoteEvent::MessageUpdated(_)
            | RemoteEvent::MessageDeleted { .. } => EntityKind::Message,
        }
    }

    /// Returns the channel whose message stream this event belongs to.
    ///
    /// Channel-list events return `None`; they belong to the global stream.
    pub fn message_channel(&self) -> Option<ChannelId> {
        match self {
            RemoteEvent::MessageCreated(m) | RemoteEvent::MessageUpdated(m) => Some(m.channel_id),
            RemoteEvent::MessageDeleted { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    fn message(id: i64, channel: i64) -> Message {
        Message {
            id: MessageId(id),
            channel_id: ChannelId(channel),
            user_id: UserId(1),
            email: None,
            content: "hello".into(),
            created_at: Timestamp::parse("2024-05-01T12:00:00").unwrap(),
            reactions: Default::default(),
        }
    }

    #[test]
    fn batch_len_and_empty() {
        let batch: Batch<Message> = Batch::new();
        assert!(batch.is_empty());

        let batch = Batch::created(vec![message(1, 1)]).with_deleted([MessageId(2)]);
        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn event_scoping() {
        let created = RemoteEvent::MessageCreated(message(1, 9));
        assert_eq!(created.kind(), EntityKind::Message);
        assert_eq!(created.message_channel(), Some(ChannelId(9)));

        let deleted = RemoteEvent::ChannelDeleted(ChannelId(9));
        assert_eq!(deleted.kind(), EntityKind::Channel);
        assert_eq!(deleted.message_channel(), None);
    }

    #[test]
    fn message_entity_always_has_cursor_key() {
        let m = message(3, 1);
        assert_eq!(m.id(), MessageId(3));
        assert!(Entity::created_at(&m).is_some());
    }
}
