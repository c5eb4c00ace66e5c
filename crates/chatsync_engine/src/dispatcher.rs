//! Turns user intents into server mutations.
//!
//! Input is validated locally before anything is sent. Actions are never
//! retried automatically; the caller decides what to do with a failure.

use crate::error::{SyncError, SyncResult};
use crate::http::{ChatApi, HttpClient};
use crate::push::PushEmitter;
use crate::reconciler::ReactionIntent;
use chatsync_protocol::{
    Channel, ChannelId, CreateChannelRequest, CreatedChannel, CreatedMessage, CurrentUser,
    Message, MessageId, PostMessageRequest, PushCommand, ReactionRequest, ReactionState,
    RenameChannelRequest, UserId,
};
use tracing::{debug, info};

/// Result of posting a message.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    /// The server returned the stored message.
    Message(Message),
    /// The server acknowledged the message by id only.
    Accepted(MessageId),
    /// The message was sent over the socket; it arrives as a `new_message` echo.
    Emitted,
}

impl PostOutcome {
    /// Returns the confirmed message, if the server sent it back.
    pub fn message(&self) -> Option<&Message> {
        match self {
            PostOutcome::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Issues user actions against the chat API or the push socket.
pub struct ActionDispatcher<C: HttpClient> {
    api: ChatApi<C>,
    push: Option<PushEmitter>,
    user_id: Option<UserId>,
}

impl<C: HttpClient> Clone for ActionDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            push: self.push.clone(),
            user_id: self.user_id,
        }
    }
}

impl<C: HttpClient> ActionDispatcher<C> {
    /// Creates a dispatcher that sends everything over HTTP.
    pub fn new(api: ChatApi<C>) -> Self {
        Self {
            api,
            push: None,
            user_id: None,
        }
    }

    /// Sends new messages over the push socket instead of HTTP.
    pub fn with_push(mut self, emitter: PushEmitter) -> Self {
        self.push = Some(emitter);
        self
    }

    /// Falls back to HTTP for new messages.
    pub fn clear_push(&mut self) {
        self.push = None;
    }

    /// Sets the author announced in socket commands.
    pub fn set_user(&mut self, user_id: Option<UserId>) {
        self.user_id = user_id;
    }

    /// Creates a channel. The server's answer is returned as a full channel
    /// even when it only acknowledged the id.
    pub async fn create_channel(&self, name: &str) -> SyncResult<Channel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::ValidationFailed(
                "channel name cannot be empty".into(),
            ));
        }

        let request = CreateChannelRequest {
            name: name.to_string(),
            is_dm: false,
        };
        let channel = match self.api.create_channel(&request).await? {
            CreatedChannel::Channel(channel) => channel,
            CreatedChannel::Ack { channel_id } => Channel {
                id: channel_id,
                name: Some(request.name),
                creator_id: self.user_id,
                is_dm: false,
                created_at: None,
            },
        };
        info!(channel_id = %channel.id, "channel created");
        Ok(channel)
    }

    /// Renames a channel. Returns the channel if the server echoed it.
    pub async fn rename_channel(
        &self,
        channel_id: ChannelId,
        name: &str,
    ) -> SyncResult<Option<Channel>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::ValidationFailed(
                "channel name cannot be empty".into(),
            ));
        }

        let request = RenameChannelRequest {
            name: name.to_string(),
        };
        let echoed = self.api.rename_channel(channel_id, &request).await?;
        info!(%channel_id, name, "channel renamed");
        Ok(echoed)
    }

    /// Deletes a channel. Only its creator may do so.
    pub async fn delete_channel(&self, channel_id: ChannelId) -> SyncResult<()> {
        self.api.delete_channel(channel_id).await?;
        info!(%channel_id, "channel deleted");
        Ok(())
    }

    /// Posts a message. Blank content is rejected without a round trip.
    pub async fn post_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> SyncResult<PostOutcome> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::ValidationFailed(
                "message content cannot be empty".into(),
            ));
        }

        if let Some(push) = &self.push {
            push.emit(PushCommand::SendMessage {
                channel_id,
                user_id: self.user_id,
                content: content.to_string(),
            })
            .await?;
            debug!(%channel_id, "message emitted");
            return Ok(PostOutcome::Emitted);
        }

        let request = PostMessageRequest {
            content: content.to_string(),
        };
        let outcome = match self.api.post_message(channel_id, &request).await? {
            CreatedMessage::Message(message) => PostOutcome::Message(message),
            CreatedMessage::Ack { message_id } => PostOutcome::Accepted(message_id),
        };
        debug!(%channel_id, "message posted");
        Ok(outcome)
    }

    /// Deletes a message. Only its author may do so.
    pub async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> SyncResult<()> {
        self.api.delete_message(channel_id, message_id).await?;
        debug!(%channel_id, %message_id, "message deleted");
        Ok(())
    }

    /// Adds the user's reaction.
    pub async fn react(
        &self,
        message_id: MessageId,
        emoji: &str,
    ) -> SyncResult<Option<ReactionState>> {
        let emoji = validate_emoji(emoji)?;
        self.api
            .react(
                message_id,
                &ReactionRequest {
                    emoji: emoji.to_string(),
                },
            )
            .await
    }

    /// Removes the user's reaction.
    pub async fn unreact(
        &self,
        message_id: MessageId,
        emoji: &str,
    ) -> SyncResult<Option<ReactionState>> {
        let emoji = validate_emoji(emoji)?;
        self.api.unreact(message_id, emoji).await
    }

    /// Reacts or unreacts according to `intent`.
    pub async fn apply_reaction(
        &self,
        message_id: MessageId,
        emoji: &str,
        intent: ReactionIntent,
    ) -> SyncResult<Option<ReactionState>> {
        match intent {
            ReactionIntent::React => self.react(message_id, emoji).await,
            ReactionIntent::Unreact => self.unreact(message_id, emoji).await,
        }
    }

    /// Ends the server session.
    pub async fn logout(&self) -> SyncResult<()> {
        self.api.logout().await?;
        info!("signed out");
        Ok(())
    }

    /// Fetches the signed-in user.
    pub async fn current_user(&self) -> SyncResult<CurrentUser> {
        self.api.current_user().await
    }
}

fn validate_emoji(emoji: &str) -> SyncResult<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        Err(SyncError::ValidationFailed("emoji cannot be empty".into()))
    } else {
        Ok(emoji)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, HttpResponse};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct CountingClient {
        body: Value,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl CountingClient {
        fn new(body: Value) -> Self {
            Self {
                body,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for CountingClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            Ok(HttpResponse::json(200, &self.body))
        }
    }

    #[tokio::test]
    async fn blank_input_never_reaches_the_server() {
        let dispatcher = ActionDispatcher::new(ChatApi::new(CountingClient::new(json!({}))));

        for content in ["", "   ", "\n\t"] {
            let err = dispatcher.post_message(ChannelId(1), content).await.unwrap_err();
            assert!(matches!(err, SyncError::ValidationFailed(_)));
        }
        assert!(matches!(
            dispatcher.create_channel("  ").await,
            Err(SyncError::ValidationFailed(_))
        ));
        assert!(matches!(
            dispatcher.react(MessageId(1), " ").await,
            Err(SyncError::ValidationFailed(_))
        ));

        assert!(dispatcher.api.client().requests.lock().is_empty());
    }

    #[tokio::test]
    async fn acknowledged_channel_becomes_canonical() {
        let mut dispatcher = ActionDispatcher::new(ChatApi::new(CountingClient::new(
            json!({"message": "Channel created", "channel_id": 12}),
        )));
        dispatcher.set_user(Some(UserId(3)));

        let channel = dispatcher.create_channel(" dev ").await.unwrap();
        assert_eq!(channel.id, ChannelId(12));
        assert_eq!(channel.name.as_deref(), Some("dev"));
        assert_eq!(channel.creator_id, Some(UserId(3)));

        let requests = dispatcher.api.client().requests.lock();
        assert_eq!(requests[0].body, Some(json!({"name": "dev", "is_dm": false})));
    }

    #[tokio::test]
    async fn acknowledged_message_returns_id() {
        let dispatcher = ActionDispatcher::new(ChatApi::new(CountingClient::new(
            json!({"message": "Message created", "message_id": 30}),
        )));
        let outcome = dispatcher.post_message(ChannelId(2), "hello").await.unwrap();
        assert_eq!(outcome, PostOutcome::Accepted(MessageId(30)));
        assert!(outcome.message().is_none());
    }

    #[tokio::test]
    async fn push_mode_emits_send_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatcher = ActionDispatcher::new(ChatApi::new(CountingClient::new(json!({}))))
            .with_push(PushEmitter::new(tx));
        dispatcher.set_user(Some(UserId(4)));

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(crate::push::PushInput::Emit { command, reply }) => {
                    let _ = reply.send(Ok(()));
                    Some(command)
                }
                _ => None,
            }
        });

        let outcome = dispatcher.post_message(ChannelId(2), " hi ").await.unwrap();
        assert_eq!(outcome, PostOutcome::Emitted);
        assert_eq!(
            responder.await.unwrap(),
            Some(PushCommand::SendMessage {
                channel_id: ChannelId(2),
                user_id: Some(UserId(4)),
                content: "hi".into(),
            })
        );
        assert!(dispatcher.api.client().requests.lock().is_empty());
    }
}
