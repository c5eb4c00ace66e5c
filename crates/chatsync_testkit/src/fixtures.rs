//! Builders for protocol values used across tests.

use chatsync_protocol::{
    Channel, ChannelId, CurrentUser, Message, MessageId, Reaction, ReactionMap, Timestamp, UserId,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// The instant every fixture timestamp is measured from.
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .expect("valid fixture epoch")
}

/// Returns a naive ISO timestamp `seconds` after [`epoch`], formatted the
/// way the server formats `created_at`.
pub fn ts(seconds: i64) -> Timestamp {
    let at = epoch() + Duration::seconds(seconds);
    Timestamp::parse(&at.format("%Y-%m-%dT%H:%M:%S").to_string())
        .expect("fixture timestamps are well formed")
}

/// Creates a channel created `seconds` after the epoch.
pub fn channel(id: i64, name: &str, seconds: i64) -> Channel {
    Channel {
        id: ChannelId(id),
        name: Some(name.to_string()),
        creator_id: None,
        is_dm: false,
        created_at: Some(ts(seconds)),
    }
}

/// Creates a channel owned by `creator`.
pub fn owned_channel(id: i64, name: &str, creator: i64, seconds: i64) -> Channel {
    Channel {
        creator_id: Some(UserId(creator)),
        ..channel(id, name, seconds)
    }
}

/// Creates a message without reactions.
pub fn message(id: i64, channel_id: i64, user: i64, content: &str, seconds: i64) -> Message {
    Message {
        id: MessageId(id),
        channel_id: ChannelId(channel_id),
        user_id: UserId(user),
        email: Some(user_email(user)),
        content: content.to_string(),
        created_at: ts(seconds),
        reactions: ReactionMap::new(),
    }
}

/// Builds a reaction map from `(emoji, users)` pairs.
pub fn reactions<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [i64])>) -> ReactionMap {
    entries
        .into_iter()
        .map(|(emoji, users)| {
            (
                emoji.to_string(),
                Reaction::from_users(users.iter().copied().map(UserId)),
            )
        })
        .collect()
}

/// The email address fixtures use for `user`.
pub fn user_email(user: i64) -> String {
    format!("user{user}@example.com")
}

/// An authenticated user.
pub fn signed_in(user: i64) -> CurrentUser {
    CurrentUser {
        id: Some(UserId(user)),
        email: Some(user_email(user)),
        is_authenticated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_offset() {
        assert!(ts(1) > ts(0));
        assert_eq!(ts(61).as_str(), "2024-05-01T12:01:01");
    }

    #[test]
    fn reaction_builder() {
        let map = reactions([("👍", &[1, 2][..]), ("🎉", &[3][..])]);
        assert_eq!(map["👍"].count(), 2);
        assert!(map["🎉"].contains(UserId(3)));
    }
}
