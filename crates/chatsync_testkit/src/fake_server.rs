//! An in-memory chat server.
//!
//! [`FakeChatServer`] implements [`HttpClient`] by routing requests against
//! its own state, so an engine under test talks to it exactly as it would
//! to the real API. Tests seed and mutate the state directly to simulate
//! other users, and can inject failures and per-channel latency.

use crate::fixtures::{ts, user_email};
use chatsync_engine::{HttpClient, HttpRequest, HttpResponse, Method, AFTER_PARAM};
use chatsync_protocol::{
    Channel, ChannelId, Message, MessageId, Reaction, ReactionMap, Timestamp, UserId,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// The user that seeded channels and messages belong to.
pub const OTHER_USER: UserId = UserId(99);

/// A failure returned instead of the next response.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Respond with this status and an error body.
    Status(u16),
    /// Fail without a response, as if the connection was refused.
    Unreachable,
}

/// Cloneable handle to a shared in-memory server.
#[derive(Clone, Default)]
pub struct FakeChatServer {
    inner: Arc<Mutex<ServerState>>,
}

struct ServerState {
    user: UserId,
    authenticated: bool,
    ack_only: bool,
    report_tombstones: bool,
    clock: i64,
    next_id: i64,
    channels: Vec<Channel>,
    messages: BTreeMap<ChannelId, Vec<Message>>,
    malformed: BTreeMap<ChannelId, Vec<Value>>,
    channel_tombstones: Vec<ChannelId>,
    message_tombstones: BTreeMap<ChannelId, Vec<MessageId>>,
    failures: VecDeque<Failure>,
    targeted_failures: Vec<(Method, String, Failure)>,
    latency: HashMap<ChannelId, Duration>,
    requests: Vec<HttpRequest>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            user: UserId(1),
            authenticated: true,
            ack_only: false,
            report_tombstones: false,
            clock: 0,
            next_id: 1,
            channels: Vec::new(),
            messages: BTreeMap::new(),
            malformed: BTreeMap::new(),
            channel_tombstones: Vec::new(),
            message_tombstones: BTreeMap::new(),
            failures: VecDeque::new(),
            targeted_failures: Vec::new(),
            latency: HashMap::new(),
            requests: Vec::new(),
        }
    }
}

impl FakeChatServer {
    /// Creates a server with user 1 signed in and no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server with `user` signed in.
    pub fn signed_in_as(user: i64) -> Self {
        let server = Self::new();
        server.inner.lock().user = UserId(user);
        server
    }

    /// The signed-in user.
    pub fn user_id(&self) -> UserId {
        self.inner.lock().user
    }

    /// Expires or restores the session. Every request answers 401 while
    /// the session is expired.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner.lock().authenticated = authenticated;
    }

    /// Returns true while the session is valid.
    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().authenticated
    }

    /// Answers creations with `{message, <kind>_id}` instead of the entity.
    pub fn set_ack_only(&self, ack_only: bool) {
        self.inner.lock().ack_only = ack_only;
    }

    /// Wraps listings in an object carrying `deleted_ids`.
    pub fn set_report_tombstones(&self, report: bool) {
        self.inner.lock().report_tombstones = report;
    }

    /// Fails the next request.
    pub fn fail_next(&self, failure: Failure) {
        self.inner.lock().failures.push_back(failure);
    }

    /// Fails the next request to `path` (e.g. `/api/auth/me`) with `failure`.
    pub fn fail_next_to(&self, method: Method, path: &str, failure: Failure) {
        self.inner
            .lock()
            .targeted_failures
            .push((method, path.to_string(), failure));
    }

    /// Delays every request that targets `channel_id`.
    pub fn set_latency(&self, channel_id: ChannelId, latency: Duration) {
        self.inner.lock().latency.insert(channel_id, latency);
    }

    /// Adds a channel created by [`OTHER_USER`].
    pub fn add_channel(&self, name: &str) -> Channel {
        self.inner.lock().insert_channel(name, OTHER_USER)
    }

    /// Adds a channel created by the signed-in user.
    pub fn add_own_channel(&self, name: &str) -> Channel {
        let mut state = self.inner.lock();
        let user = state.user;
        state.insert_channel(name, user)
    }

    /// Adds a message authored by `user`.
    ///
    /// # Panics
    ///
    /// Panics if the channel does not exist.
    pub fn add_message(&self, channel_id: ChannelId, user: UserId, content: &str) -> Message {
        let mut state = self.inner.lock();
        assert!(state.has_channel(channel_id), "no channel {channel_id}");
        state.insert_message(channel_id, user, content)
    }

    /// Appends a raw entry to the channel's message listing.
    pub fn add_malformed_message(&self, channel_id: ChannelId, raw: Value) {
        self.inner
            .lock()
            .malformed
            .entry(channel_id)
            .or_default()
            .push(raw);
    }

    /// Removes a channel as another client would.
    pub fn remove_channel(&self, channel_id: ChannelId) {
        self.inner.lock().remove_channel(channel_id);
    }

    /// Removes a message as another client would.
    pub fn remove_message(&self, channel_id: ChannelId, message_id: MessageId) {
        self.inner.lock().remove_message(channel_id, message_id);
    }

    /// Adds `user`'s reaction to a message.
    pub fn react_as(&self, message_id: MessageId, emoji: &str, user: UserId) {
        if let Some(message) = self.inner.lock().message_mut(message_id) {
            message.reactions.entry(emoji.to_string()).or_default().insert(user);
        }
    }

    /// Returns the stored channels.
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.lock().channels.clone()
    }

    /// Returns the stored messages of a channel.
    pub fn messages(&self, channel_id: ChannelId) -> Vec<Message> {
        self.inner
            .lock()
            .messages
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a stored message.
    pub fn message(&self, message_id: MessageId) -> Option<Message> {
        self.inner.lock().message_mut(message_id).map(|m| m.clone())
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.lock().requests.clone()
    }

    /// Returns how many requests were received.
    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Returns the requests with this method and path.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .cloned()
            .collect()
    }

    /// Forgets the request log.
    pub fn clear_requests(&self) {
        self.inner.lock().requests.clear();
    }
}

impl HttpClient for FakeChatServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let delay = self.inner.lock().latency_for(&request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock();
        state.requests.push(request.clone());
        let path = request.path();
        let targeted = state
            .targeted_failures
            .iter()
            .position(|(method, target, _)| *method == request.method && *target == path)
            .map(|index| state.targeted_failures.remove(index).2);
        match targeted.or_else(|| state.failures.pop_front()) {
            Some(Failure::Unreachable) => Err("connection refused".to_string()),
            Some(Failure::Status(status)) => {
                Ok(error(status, "injected failure"))
            }
            None => Ok(state.route(&request)),
        }
    }
}

fn error(status: u16, reason: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "error": reason }))
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn parse_id(segment: &str) -> Option<i64> {
    segment.parse().ok()
}

impl ServerState {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        ts(self.clock)
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.iter().any(|c| c.id == channel_id)
    }

    fn insert_channel(&mut self, name: &str, creator: UserId) -> Channel {
        let channel = Channel {
            id: ChannelId(self.next_id()),
            name: Some(name.to_string()),
            creator_id: Some(creator),
            is_dm: false,
            created_at: Some(self.tick()),
        };
        self.channels.push(channel.clone());
        self.messages.entry(channel.id).or_default();
        channel
    }

    fn insert_message(&mut self, channel_id: ChannelId, user: UserId, content: &str) -> Message {
        let message = Message {
            id: MessageId(self.next_id()),
            channel_id,
            user_id: user,
            email: Some(user_email(user.0)),
            content: content.to_string(),
            created_at: self.tick(),
            reactions: ReactionMap::new(),
        };
        self.messages
            .entry(channel_id)
            .or_default()
            .push(message.clone());
        message
    }

    fn remove_channel(&mut self, channel_id: ChannelId) {
        self.channels.retain(|c| c.id != channel_id);
        self.messages.remove(&channel_id);
        self.channel_tombstones.push(channel_id);
    }

    fn remove_message(&mut self, channel_id: ChannelId, message_id: MessageId) {
        if let Some(messages) = self.messages.get_mut(&channel_id) {
            messages.retain(|m| m.id != message_id);
        }
        self.message_tombstones
            .entry(channel_id)
            .or_default()
            .push(message_id);
    }

    fn message_mut(&mut self, message_id: MessageId) -> Option<&mut Message> {
        self.messages
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == message_id)
    }

    fn latency_for(&self, request: &HttpRequest) -> Option<Duration> {
        match request.segments.as_slice() {
            [api, channels, id, ..] if api == "api" && channels == "channels" => {
                let id = parse_id(id)?;
                self.latency.get(&ChannelId(id)).copied()
            }
            _ => None,
        }
    }

    fn route(&mut self, request: &HttpRequest) -> HttpResponse {
        if !self.authenticated {
            return error(401, "Authentication required");
        }

        let segments: Vec<&str> = request.segments.iter().map(String::as_str).collect();
        let after = request
            .query_param(AFTER_PARAM)
            .and_then(|raw| Timestamp::parse(raw).ok());

        match (request.method, segments.as_slice()) {
            (Method::Get, ["api", "auth", "me"]) => HttpResponse::json(
                200,
                &json!({
                    "id": self.user,
                    "email": user_email(self.user.0),
                    "is_authenticated": true,
                }),
            ),
            (Method::Post, ["api", "auth", "logout"]) => {
                self.authenticated = false;
                HttpResponse::json(200, &json!({ "message": "Logged out" }))
            }
            (Method::Get, ["api", "channels"]) => self.list_channels(after.as_ref()),
            (Method::Post, ["api", "channels"]) => self.create_channel(request.body.as_ref()),
            (Method::Patch, ["api", "channels", id]) => match parse_id(id) {
                Some(id) => self.rename_channel(ChannelId(id), request.body.as_ref()),
                None => error(404, "Channel not found"),
            },
            (Method::Delete, ["api", "channels", id]) => match parse_id(id) {
                Some(id) => self.delete_channel(ChannelId(id)),
                None => error(404, "Channel not found"),
            },
            (Method::Get, ["api", "channels", id, "messages"]) => match parse_id(id) {
                Some(id) => self.list_messages(ChannelId(id), after.as_ref()),
                None => error(404, "Channel not found"),
            },
            (Method::Post, ["api", "channels", id, "messages"]) => match parse_id(id) {
                Some(id) => self.post_message(ChannelId(id), request.body.as_ref()),
                None => error(404, "Channel not found"),
            },
            (Method::Delete, ["api", "channels", channel, "messages", message]) => {
                match (parse_id(channel), parse_id(message)) {
                    (Some(channel), Some(message)) => {
                        self.delete_message(ChannelId(channel), MessageId(message))
                    }
                    _ => error(404, "Message not found"),
                }
            }
            (Method::Post, ["api", "messages", id, "reactions"]) => {
                let emoji = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("emoji"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match (parse_id(id), emoji) {
                    (Some(id), Some(emoji)) => self.react(MessageId(id), &emoji),
                    (None, _) => error(404, "Message not found"),
                    (_, None) => error(400, "Emoji is required"),
                }
            }
            (Method::Delete, ["api", "messages", id, "reactions", emoji]) => match parse_id(id) {
                Some(id) => self.unreact(MessageId(id), emoji),
                None => error(404, "Message not found"),
            },
            _ => error(404, "Not found"),
        }
    }

    fn listing(&self, key: &str, items: Vec<Value>, tombstones: Vec<Value>) -> HttpResponse {
        if self.report_tombstones {
            let mut body = Map::new();
            body.insert(key.to_string(), Value::Array(items));
            body.insert("deleted_ids".to_string(), Value::Array(tombstones));
            HttpResponse::json(200, &Value::Object(body))
        } else {
            HttpResponse::json(200, &Value::Array(items))
        }
    }

    fn list_channels(&self, after: Option<&Timestamp>) -> HttpResponse {
        let items = self
            .channels
            .iter()
            .filter(|c| match (after, &c.created_at) {
                (Some(after), Some(created)) => created > after,
                _ => true,
            })
            .map(to_json)
            .collect();
        let tombstones = self.channel_tombstones.iter().map(to_json).collect();
        self.listing("channels", items, tombstones)
    }

    fn list_messages(&self, channel_id: ChannelId, after: Option<&Timestamp>) -> HttpResponse {
        let Some(messages) = self.messages.get(&channel_id) else {
            return error(404, "Channel not found");
        };
        let mut items: Vec<Value> = messages
            .iter()
            .filter(|m| after.map_or(true, |after| &m.created_at > after))
            .map(|m| {
                // Listings leave the channel implicit in the path.
                let mut item = to_json(m);
                if let Value::Object(map) = &mut item {
                    map.remove("channel_id");
                }
                item
            })
            .collect();
        if let Some(raw) = self.malformed.get(&channel_id) {
            items.extend(raw.iter().cloned());
        }
        let tombstones = self
            .message_tombstones
            .get(&channel_id)
            .map(|ids| ids.iter().map(to_json).collect())
            .unwrap_or_default();
        self.listing("messages", items, tombstones)
    }

    fn create_channel(&mut self, body: Option<&Value>) -> HttpResponse {
        let name = body
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return error(400, "Channel name is required");
        }
        let user = self.user;
        let channel = self.insert_channel(&name, user);
        if self.ack_only {
            HttpResponse::json(
                201,
                &json!({ "message": "Channel created", "channel_id": channel.id }),
            )
        } else {
            HttpResponse::json(201, &to_json(&channel))
        }
    }

    fn rename_channel(&mut self, channel_id: ChannelId, body: Option<&Value>) -> HttpResponse {
        let name = body
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return error(400, "Channel name is required");
        }
        match self.channels.iter_mut().find(|c| c.id == channel_id) {
            Some(channel) => {
                channel.name = Some(name);
                HttpResponse::json(
                    200,
                    &json!({ "message": format!("Channel {channel_id} updated.") }),
                )
            }
            None => error(404, "Channel not found"),
        }
    }

    fn delete_channel(&mut self, channel_id: ChannelId) -> HttpResponse {
        let Some(channel) = self.channels.iter().find(|c| c.id == channel_id) else {
            return error(404, "Channel not found");
        };
        if channel.creator_id != Some(self.user) {
            return error(403, "Only the creator can delete this channel");
        }
        self.remove_channel(channel_id);
        HttpResponse::json(200, &json!({ "message": "Channel deleted" }))
    }

    fn post_message(&mut self, channel_id: ChannelId, body: Option<&Value>) -> HttpResponse {
        if !self.has_channel(channel_id) {
            return error(404, "Channel not found");
        }
        let content = body
            .and_then(|b| b.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return error(400, "Message content cannot be empty");
        }
        let user = self.user;
        let message = self.insert_message(channel_id, user, &content);
        if self.ack_only {
            HttpResponse::json(
                201,
                &json!({ "message": "Message created", "message_id": message.id }),
            )
        } else {
            HttpResponse::json(201, &to_json(&message))
        }
    }

    fn delete_message(&mut self, channel_id: ChannelId, message_id: MessageId) -> HttpResponse {
        let author = self
            .messages
            .get(&channel_id)
            .and_then(|messages| messages.iter().find(|m| m.id == message_id))
            .map(|m| m.user_id);
        match author {
            None => error(404, "Message not found"),
            Some(author) if author != self.user => {
                error(403, "Only the author can delete this message")
            }
            Some(_) => {
                self.remove_message(channel_id, message_id);
                HttpResponse::json(200, &json!({ "message": "Message deleted" }))
            }
        }
    }

    fn react(&mut self, message_id: MessageId, emoji: &str) -> HttpResponse {
        let user = self.user;
        match self.message_mut(message_id) {
            Some(message) => {
                message
                    .reactions
                    .entry(emoji.to_string())
                    .or_insert_with(Reaction::default)
                    .insert(user);
                reaction_state(message)
            }
            None => error(404, "Message not found"),
        }
    }

    fn unreact(&mut self, message_id: MessageId, emoji: &str) -> HttpResponse {
        let user = self.user;
        match self.message_mut(message_id) {
            Some(message) => {
                if let Some(reaction) = message.reactions.get_mut(emoji) {
                    reaction.remove(user);
                    if reaction.is_empty() {
                        message.reactions.remove(emoji);
                    }
                }
                reaction_state(message)
            }
            None => error(404, "Message not found"),
        }
    }
}

fn reaction_state(message: &Message) -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({
            "message_id": message.id,
            "reactions": to_json(&message.reactions),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_engine::ChatApi;

    #[tokio::test]
    async fn listing_honours_the_cursor() {
        let server = FakeChatServer::new();
        let first = server.add_channel("general");
        server.add_channel("random");

        let api = ChatApi::new(server.clone());
        let all = api.list_channels(None).await.unwrap();
        assert_eq!(all.batch.created.len(), 2);

        let newer = api.list_channels(first.created_at.as_ref()).await.unwrap();
        assert_eq!(newer.batch.created.len(), 1);
        assert_eq!(newer.batch.created[0].name.as_deref(), Some("random"));
    }

    #[tokio::test]
    async fn rename_is_acknowledged_without_the_channel() {
        let server = FakeChatServer::new();
        let channel = server.add_channel("general");
        let api = ChatApi::new(server.clone());

        let request = chatsync_protocol::RenameChannelRequest {
            name: "lobby".into(),
        };
        let echoed = api.rename_channel(channel.id, &request).await.unwrap();
        assert!(echoed.is_none());
        assert_eq!(server.channels()[0].name.as_deref(), Some("lobby"));
    }

    #[tokio::test]
    async fn targeted_failures_skip_other_paths() {
        let server = FakeChatServer::new();
        server.fail_next_to(Method::Get, "/api/auth/me", Failure::Unreachable);
        let api = ChatApi::new(server.clone());

        api.list_channels(None).await.unwrap();
        assert!(api.current_user().await.is_err());
        assert!(api.current_user().await.is_ok());
    }

    #[tokio::test]
    async fn ownership_is_enforced() {
        let server = FakeChatServer::new();
        let theirs = server.add_channel("theirs");
        let api = ChatApi::new(server.clone());

        let err = api.delete_channel(theirs.id).await.unwrap_err();
        assert!(matches!(err, chatsync_engine::SyncError::Forbidden(_)));
        assert_eq!(server.channels().len(), 1);
    }

    #[tokio::test]
    async fn expired_session_answers_401() {
        let server = FakeChatServer::new();
        server.set_authenticated(false);
        let api = ChatApi::new(server.clone());
        assert_eq!(
            api.current_user().await.unwrap_err(),
            chatsync_engine::SyncError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn tombstones_are_reported() {
        let server = FakeChatServer::new();
        server.set_report_tombstones(true);
        let channel = server.add_channel("general");
        let message = server.add_message(channel.id, OTHER_USER, "bye");
        server.remove_message(channel.id, message.id);

        let api = ChatApi::new(server.clone());
        let listing = api.list_messages(channel.id, None).await.unwrap();
        assert!(listing.batch.created.is_empty());
        assert_eq!(listing.batch.deleted_ids, vec![message.id]);
    }
}
