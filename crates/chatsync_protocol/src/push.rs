//! Frames carried over the push socket.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::events::RemoteEvent;
use crate::models::{Channel, ChannelId, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// The server accepted a `join_channel`.
    JoinedChannelOk {
        /// Joined channel.
        channel_id: ChannelId,
    },
    /// The server rejected the last command.
    Error {
        /// Reason.
        message: String,
    },
    /// Another user joined the active channel.
    UserJoined {
        /// Joining user.
        user_id: UserId,
    },
    /// A message was posted.
    NewMessage(Message),
    /// A message's reactions changed.
    MessageUpdated(Message),
    /// A message was deleted.
    MessageDeleted {
        /// Parent channel.
        channel_id: ChannelId,
        /// Deleted message.
        message_id: MessageId,
    },
    /// A channel was created.
    NewChannel(Channel),
    /// A channel was deleted.
    ChannelDeleted {
        /// Deleted channel.
        channel_id: ChannelId,
    },
    /// The session was signed out from another tab or device.
    LogoutBroadcast {
        /// User who signed out, when the server names one.
        #[serde(default)]
        user_id: Option<UserId>,
    },
}

impl PushEvent {
    /// Decodes a text frame.
    ///
    /// A frame without `data` is treated as carrying an empty object.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let mut frame: Value = serde_json::from_str(text)?;
        let Value::Object(map) = &mut frame else {
            return Err(ProtocolError::invalid_structure("frame is not an object"));
        };
        if !map.get("data").is_some_and(|d| !d.is_null()) {
            map.insert("data".into(), Value::Object(Default::default()));
        }
        Ok(serde_json::from_value(frame)?)
    }

    /// Converts entity-bearing events into a reconciler event.
    ///
    /// Control events (acks, errors, presence, logout) return `None`.
    pub fn into_remote(self) -> Option<RemoteEvent> {
        match self {
            PushEvent::NewMessage(m) => Some(RemoteEvent::MessageCreated(m)),
            PushEvent::MessageUpdated(m) => Some(RemoteEvent::MessageUpdated(m)),
            PushEvent::MessageDeleted {
                channel_id,
                message_id,
            } => Some(RemoteEvent::MessageDeleted {
                channel_id,
                message_id,
            }),
            PushEvent::NewChannel(c) => Some(RemoteEvent::ChannelCreated(c)),
            PushEvent::ChannelDeleted { channel_id } => {
                Some(RemoteEvent::ChannelDeleted(channel_id))
            }
            PushEvent::JoinedChannelOk { .. }
            | PushEvent::Error { .. }
            | PushEvent::UserJoined { .. }
            | PushEvent::LogoutBroadcast { .. } => None,
        }
    }
}

/// Commands sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushCommand {
    /// Subscribe to a channel's message stream.
    JoinChannel {
        /// Channel to join.
        channel_id: ChannelId,
        /// Joining user.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    /// Unsubscribe from a channel's message stream.
    LeaveChannel {
        /// Channel to leave.
        channel_id: ChannelId,
    },
    /// Post a message over the socket.
    SendMessage {
        /// Target channel.
        channel_id: ChannelId,
        /// Author.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Text content.
        content: String,
    },
}

impl PushCommand {
    /// Encodes the command as a text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_new_message() {
        let text = json!({
            "event": "new_message",
            "data": {
                "id": 5, "channel_id": 2, "user_id": 1,
                "content": "hello", "created_at": "2024-05-01T12:00:00"
            }
        })
        .to_string();

        let event = PushEvent::decode(&text).unwrap();
        let remote = event.into_remote().unwrap();
        assert_eq!(remote.message_channel(), Some(ChannelId(2)));
    }

    #[test]
    fn decodes_frame_without_data() {
        let event = PushEvent::decode(r#"{"event": "logout_broadcast"}"#).unwrap();
        assert_eq!(event, PushEvent::LogoutBroadcast { user_id: None });
        assert!(event.into_remote().is_none());
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert!(PushEvent::decode(r#"{"event": "typing", "data": {}}"#).is_err());
        assert!(PushEvent::decode(r#"{"event": "new_message", "data": {"id": 1}}"#).is_err());
        assert!(PushEvent::decode("[]").is_err());
        assert!(PushEvent::decode("not json").is_err());
    }

    #[test]
    fn encodes_join_channel() {
        let cmd = PushCommand::JoinChannel {
            channel_id: ChannelId(3),
            user_id: Some(UserId(1)),
        };
        let frame: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"event": "join_channel", "data": {"channel_id": 3, "user_id": 1}})
        );
    }

    #[test]
    fn encodes_leave_without_user() {
        let cmd = PushCommand::LeaveChannel {
            channel_id: ChannelId(3),
        };
        let frame: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(frame, json!({"event": "leave_channel", "data": {"channel_id": 3}}));
    }
}
