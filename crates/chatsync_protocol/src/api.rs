//! REST request and response bodies.

use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{Batch, Entity};
use crate::models::{Channel, ChannelId, Message, MessageId, ReactionMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/channels`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateChannelRequest {
    /// Channel name.
    pub name: String,
    /// Whether this is a direct-message channel.
    pub is_dm: bool,
}

/// Body of `PATCH /api/channels/:id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenameChannelRequest {
    /// New channel name.
    pub name: String,
}

/// Body of `POST /api/channels/:id/messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostMessageRequest {
    /// Message text.
    pub content: String,
}

/// Body of `POST /api/messages/:id/reactions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionRequest {
    /// Emoji to react with.
    pub emoji: String,
}

/// Response to a channel creation.
///
/// Servers either echo the full channel or acknowledge with its id only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CreatedChannel {
    /// The full channel.
    Channel(Channel),
    /// Acknowledgement carrying the new id.
    Ack {
        /// New channel ID.
        channel_id: ChannelId,
    },
}

/// Response to posting a message.
#[derive(Debug, Clone, PartialEq)]
pub enum CreatedMessage {
    /// The full message.
    Message(Message),
    /// Acknowledgement carrying the new id.
    Ack {
        /// New message ID.
        message_id: MessageId,
    },
}

impl CreatedMessage {
    /// Decodes a creation response for a message posted to `channel_id`.
    pub fn decode(mut body: Value, channel_id: ChannelId) -> ProtocolResult<Self> {
        if body.get("id").is_some() {
            fill_channel_id(&mut body, channel_id);
            return Ok(Self::Message(serde_json::from_value(body)?));
        }

        let message_id = body
            .get("message_id")
            .cloned()
            .ok_or_else(|| ProtocolError::invalid_structure("missing message id"))?;
        Ok(Self::Ack {
            message_id: serde_json::from_value(message_id)?,
        })
    }
}

/// Server-confirmed reaction state of one message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReactionState {
    /// Message the reactions belong to.
    #[serde(alias = "id")]
    pub message_id: MessageId,
    /// Full reaction map after the change.
    pub reactions: ReactionMap,
}

/// Error body returned by the API (`{"error": ...}` or `{"message": ...}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    /// Error text.
    #[serde(default)]
    pub error: Option<String>,
    /// Alternative error text.
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Extracts a human-readable reason from a response body.
    pub fn reason(bytes: &[u8]) -> Option<String> {
        let body: ErrorBody = serde_json::from_slice(bytes).ok()?;
        body.error.or(body.message)
    }
}

/// A list response split into undecoded parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawList {
    /// Entities created since the cursor.
    pub created: Vec<Value>,
    /// Entities reported as updated.
    pub updated: Vec<Value>,
    /// Tombstoned ids.
    pub deleted_ids: Vec<Value>,
}

/// Splits a list body into its parts.
///
/// Accepts a bare array, or an object holding the array under `key` with
/// optional `updated` and `deleted_ids` arrays.
pub fn split_list_body(body: Value, key: &str) -> ProtocolResult<RawList> {
    match body {
        Value::Array(created) => Ok(RawList {
            created,
            ..RawList::default()
        }),
        Value::Object(mut map) => {
            let created = match map.remove(key) {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(ProtocolError::invalid_structure(format!(
                        "`{key}` is not an array"
                    )))
                }
                None => {
                    return Err(ProtocolError::invalid_structure(format!("missing `{key}`")))
                }
            };
            let mut take = |field: &str| match map.remove(field) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let updated = take("updated");
            let mut deleted_ids = take("deleted_ids");
            deleted_ids.extend(take("deletedIds"));

            Ok(RawList {
                created,
                updated,
                deleted_ids,
            })
        }
        _ => Err(ProtocolError::invalid_structure(
            "expected an array or an object",
        )),
    }
}

/// A decoded batch plus the entries that failed to decode.
#[derive(Debug, Clone)]
pub struct DecodedBatch<E: Entity> {
    /// Valid changes.
    pub batch: Batch<E>,
    /// One description per skipped entry.
    pub skipped: Vec<String>,
}

/// Decodes each entry independently; malformed entries are skipped.
///
/// `prepare` runs on every entity object before decoding and may fill in
/// fields the server left implicit.
pub fn decode_batch<E: Entity>(raw: RawList, prepare: impl Fn(&mut Value)) -> DecodedBatch<E> {
    let mut skipped = Vec::new();

    let mut decode_all = |items: Vec<Value>| -> Vec<E> {
        items
            .into_iter()
            .filter_map(|mut item| {
                prepare(&mut item);
                match serde_json::from_value::<E>(item) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        skipped.push(format!("{:?}: {e}", E::KIND));
                        None
                    }
                }
            })
            .collect()
    };
    let created = decode_all(raw.created);
    let updated = decode_all(raw.updated);

    let deleted_ids = raw
        .deleted_ids
        .into_iter()
        .filter_map(|id| match serde_json::from_value::<E::Id>(id) {
            Ok(id) => Some(id),
            Err(e) => {
                skipped.push(format!("{:?} tombstone: {e}", E::KIND));
                None
            }
        })
        .collect();

    DecodedBatch {
        batch: Batch {
            created,
            updated,
            deleted_ids,
        },
        skipped,
    }
}

/// Inserts `channel_id` into a message object that lacks it.
pub(crate) fn fill_channel_id(item: &mut Value, channel_id: ChannelId) {
    if let Value::Object(map) = item {
        map.entry("channel_id")
            .or_insert_with(|| Value::from(channel_id.0));
    }
}

impl Message {
    /// Fills a missing `channel_id` before decoding a listing entry.
    pub fn prepare_for(channel_id: ChannelId) -> impl Fn(&mut Value) {
        move |item: &mut Value| fill_channel_id(item, channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_body() {
        let raw = split_list_body(json!([{"id": 1}]), "channels").unwrap();
        assert_eq!(raw.created.len(), 1);
        assert!(raw.deleted_ids.is_empty());
    }

    #[test]
    fn wrapped_body_with_tombstones() {
        let raw = split_list_body(
            json!({"channels": [{"id": 1}], "deleted_ids": [4, 5], "updated": [{"id": 2}]}),
            "channels",
        )
        .unwrap();
        assert_eq!(raw.created.len(), 1);
        assert_eq!(raw.updated.len(), 1);
        assert_eq!(raw.deleted_ids, vec![json!(4), json!(5)]);
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        assert!(split_list_body(json!({"messages": []}), "channels").is_err());
        assert!(split_list_body(json!({"channels": 3}), "channels").is_err());
        assert!(split_list_body(json!("nope"), "channels").is_err());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let raw = split_list_body(
            json!([
                {"id": 1, "name": "general"},
                {"name": "no id"},
                {"id": 2, "created_at": "not a time"},
            ]),
            "channels",
        )
        .unwrap();
        let decoded = decode_batch::<Channel>(raw, |_| {});
        assert_eq!(decoded.batch.created.len(), 1);
        assert_eq!(decoded.skipped.len(), 2);
    }

    #[test]
    fn message_listing_gets_channel_from_path() {
        let raw = split_list_body(
            json!({"messages": [
                {"id": 3, "user_id": 1, "content": "hi", "created_at": "2024-05-01T12:00:00"}
            ]}),
            "messages",
        )
        .unwrap();
        let decoded = decode_batch::<Message>(raw, Message::prepare_for(ChannelId(8)));
        assert!(decoded.skipped.is_empty());
        assert_eq!(decoded.batch.created[0].channel_id, ChannelId(8));
    }

    #[test]
    fn created_channel_variants() {
        let full: CreatedChannel = serde_json::from_value(json!({"id": 4, "name": "dev"})).unwrap();
        assert!(matches!(full, CreatedChannel::Channel(c) if c.id == ChannelId(4)));

        let ack: CreatedChannel =
            serde_json::from_value(json!({"message": "Channel created", "channel_id": 5})).unwrap();
        assert_eq!(ack, CreatedChannel::Ack { channel_id: ChannelId(5) });
    }

    #[test]
    fn created_message_variants() {
        let full = CreatedMessage::decode(
            json!({"id": 9, "user_id": 1, "content": "yo", "created_at": "2024-05-01T12:00:00"}),
            ChannelId(2),
        )
        .unwrap();
        assert!(matches!(full, CreatedMessage::Message(m) if m.channel_id == ChannelId(2)));

        let body = json!({"message": "Message created", "message_id": 9});
        let ack = CreatedMessage::decode(body, ChannelId(2)).unwrap();
        assert_eq!(ack, CreatedMessage::Ack { message_id: MessageId(9) });

        assert!(CreatedMessage::decode(json!({}), ChannelId(2)).is_err());
    }

    #[test]
    fn error_reason_prefers_error_field() {
        assert_eq!(
            ErrorBody::reason(br#"{"error": "Creator not found"}"#).as_deref(),
            Some("Creator not found")
        );
        assert_eq!(
            ErrorBody::reason(br#"{"message": "gone"}"#).as_deref(),
            Some("gone")
        );
        assert_eq!(ErrorBody::reason(b"<html>"), None);
    }
}
