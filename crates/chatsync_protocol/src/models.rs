//! Chat entities as served by the remote API.

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Server-assigned channel identifier.
    ChannelId
);
id_type!(
    /// Server-assigned message identifier.
    MessageId
);
id_type!(
    /// Server-assigned user identifier.
    UserId
);

/// A chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel ID.
    pub id: ChannelId,
    /// Display name, if the creator gave one.
    #[serde(default)]
    pub name: Option<String>,
    /// User who created the channel.
    #[serde(default)]
    pub creator_id: Option<UserId>,
    /// Whether this is a direct-message channel.
    #[serde(default)]
    pub is_dm: bool,
    /// Creation time. Older servers omit it from channel listings.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl Channel {
    /// Returns the name to show for this channel.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Channel #{}", self.id),
        }
    }
}

/// Reactions on a message keyed by emoji.
pub type ReactionMap = BTreeMap<String, Reaction>;

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Parent channel.
    pub channel_id: ChannelId,
    /// Author.
    pub user_id: UserId,
    /// Author email, when the server includes it.
    #[serde(default)]
    pub email: Option<String>,
    /// Text content.
    pub content: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Reaction state.
    #[serde(default)]
    pub reactions: ReactionMap,
}

impl Message {
    /// Returns the reaction for `emoji`, if any user holds it.
    pub fn reaction(&self, emoji: &str) -> Option<&Reaction> {
        self.reactions.get(emoji).filter(|r| !r.is_empty())
    }

    /// Returns true if `user` currently reacts with `emoji`.
    pub fn has_reacted(&self, emoji: &str, user: UserId) -> bool {
        self.reaction(emoji).is_some_and(|r| r.contains(user))
    }
}

/// Users holding one emoji on one message.
///
/// The count is always the size of the user set; a `count` received on the
/// wire is ignored in favour of `user_ids`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ReactionWire", into = "ReactionWire")]
pub struct Reaction {
    user_ids: BTreeSet<UserId>,
}

impl Reaction {
    /// Creates a reaction held by the given users.
    pub fn from_users(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            user_ids: users.into_iter().collect(),
        }
    }

    /// Number of users holding this reaction.
    pub fn count(&self) -> usize {
        self.user_ids.len()
    }

    /// Returns true if `user` holds this reaction.
    pub fn contains(&self, user: UserId) -> bool {
        self.user_ids.contains(&user)
    }

    /// Returns true if nobody holds this reaction.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Iterates the users holding this reaction in id order.
    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.user_ids.iter().copied()
    }

    /// Adds `user`. Returns false if they already held it.
    pub fn insert(&mut self, user: UserId) -> bool {
        self.user_ids.insert(user)
    }

    /// Removes `user`. Returns false if they did not hold it.
    pub fn remove(&mut self, user: UserId) -> bool {
        self.user_ids.remove(&user)
    }
}

#[derive(Serialize, Deserialize)]
struct ReactionWire {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    user_ids: Vec<UserId>,
}

impl From<ReactionWire> for Reaction {
    fn from(wire: ReactionWire) -> Self {
        Self::from_users(wire.user_ids)
    }
}

impl From<Reaction> for ReactionWire {
    fn from(reaction: Reaction) -> Self {
        Self {
            count: reaction.count(),
            user_ids: reaction.user_ids.into_iter().collect(),
        }
    }
}

/// The signed-in user as reported by `/api/auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User ID, absent when not authenticated.
    #[serde(default)]
    pub id: Option<UserId>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the session is authenticated.
    #[serde(default)]
    pub is_authenticated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_name_falls_back_to_id() {
        let mut channel: Channel = serde_json::from_value(json!({"id": 7})).unwrap();
        assert_eq!(channel.display_name(), "Channel #7");

        channel.name = Some("   ".into());
        assert_eq!(channel.display_name(), "Channel #7");

        channel.name = Some("general".into());
        assert_eq!(channel.display_name(), "general");
    }

    #[test]
    fn channel_listing_without_timestamp() {
        let channel: Channel = serde_json::from_value(json!({
            "id": 1, "name": "general", "creator_id": 3, "is_dm": false
        }))
        .unwrap();
        assert_eq!(channel.creator_id, Some(UserId(3)));
        assert!(channel.created_at.is_none());
    }

    #[test]
    fn reaction_count_follows_user_set() {
        let reaction: Reaction =
            serde_json::from_value(json!({"count": 9, "user_ids": [1, 2, 2]})).unwrap();
        assert_eq!(reaction.count(), 2);

        let wire = serde_json::to_value(&reaction).unwrap();
        assert_eq!(wire, json!({"count": 2, "user_ids": [1, 2]}));
    }

    #[test]
    fn message_reaction_lookup() {
        let message: Message = serde_json::from_value(json!({
            "id": 10,
            "channel_id": 1,
            "user_id": 4,
            "content": "hi",
            "created_at": "2024-05-01T12:00:00",
            "reactions": {
                "👍": {"count": 1, "user_ids": [4]},
                "🎉": {"count": 0, "user_ids": []}
            }
        }))
        .unwrap();

        assert!(message.has_reacted("👍", UserId(4)));
        assert!(!message.has_reacted("👍", UserId(5)));
        assert!(message.reaction("🎉").is_none());
    }
}
