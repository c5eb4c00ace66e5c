//! Property-based test generators using proptest.
//!
//! Batches use unique ids within each list, as a server listing would;
//! tombstones are drawn from the same id range so they collide with
//! creations often.

use crate::fixtures::{ts, user_email};
use chatsync_protocol::{
    Batch, Channel, ChannelId, Message, MessageId, Reaction, ReactionMap, Timestamp, UserId,
};
use proptest::prelude::*;

/// Emoji used by generated reactions.
pub const EMOJI: [&str; 5] = ["👍", "🎉", "❤️", "😂", "👀"];

/// Strategy for server timestamps within a day of the fixture epoch.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..86_400).prop_map(ts)
}

/// Strategy for small user ids, so reactions overlap.
pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    (1i64..6).prop_map(UserId)
}

/// Strategy for one of [`EMOJI`].
pub fn emoji_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(EMOJI.to_vec()).prop_map(str::to_string)
}

/// Strategy for reaction maps. Every generated reaction has at least one user.
pub fn reaction_map_strategy() -> impl Strategy<Value = ReactionMap> {
    prop::collection::btree_map(
        emoji_strategy(),
        prop::collection::btree_set(1i64..6, 1..4),
        0..3,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .map(|(emoji, users)| (emoji, Reaction::from_users(users.into_iter().map(UserId))))
            .collect()
    })
}

/// Strategy for a channel with the given id.
pub fn channel_strategy(id: i64) -> impl Strategy<Value = Channel> {
    (
        prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex"),
        prop::option::of(1i64..6),
        any::<bool>(),
        prop::option::of(0i64..86_400),
    )
        .prop_map(move |(name, creator, is_dm, seconds)| Channel {
            id: ChannelId(id),
            name: Some(name),
            creator_id: creator.map(UserId),
            is_dm,
            created_at: seconds.map(ts),
        })
}

/// Strategy for a message with the given id in `channel_id`.
pub fn message_strategy(id: i64, channel_id: ChannelId) -> impl Strategy<Value = Message> {
    (
        1i64..6,
        prop::string::string_regex("[a-zA-Z ]{1,40}").expect("Invalid regex"),
        0i64..86_400,
        reaction_map_strategy(),
    )
        .prop_map(move |(user, content, seconds, reactions)| Message {
            id: MessageId(id),
            channel_id,
            user_id: UserId(user),
            email: Some(user_email(user)),
            content,
            created_at: ts(seconds),
            reactions,
        })
}

/// Strategy for channel-list batches.
pub fn channel_batch_strategy() -> impl Strategy<Value = Batch<Channel>> {
    (
        prop::collection::btree_set(1i64..20, 0..8),
        prop::collection::vec(1i64..20, 0..4),
    )
        .prop_flat_map(|(ids, deleted)| {
            let channels: Vec<_> = ids.into_iter().map(channel_strategy).collect();
            (channels, Just(deleted))
        })
        .prop_map(|(created, deleted)| {
            Batch::created(created).with_deleted(deleted.into_iter().map(ChannelId))
        })
}

/// Strategy for message batches of one channel.
pub fn message_batch_strategy(channel_id: ChannelId) -> impl Strategy<Value = Batch<Message>> {
    (
        prop::collection::btree_set(1i64..40, 0..10),
        prop::collection::vec(1i64..40, 0..4),
    )
        .prop_flat_map(move |(ids, deleted)| {
            let messages: Vec<_> = ids
                .into_iter()
                .map(|id| message_strategy(id, channel_id))
                .collect();
            (messages, Just(deleted))
        })
        .prop_map(|(created, deleted)| {
            Batch::created(created).with_deleted(deleted.into_iter().map(MessageId))
        })
}
