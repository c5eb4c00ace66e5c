//! Polling transport: one filtered fetch per stream per tick.

use crate::error::SyncError;
use crate::http::{ChatApi, HttpClient};
use chatsync_protocol::{Channel, ChannelId, DecodedBatch, Entity, Message, Timestamp};
use tracing::{debug, warn};

/// Result of one poll.
#[derive(Debug, Clone)]
pub enum PollOutcome<E: Entity> {
    /// The server answered; malformed entries were already dropped.
    Batch(DecodedBatch<E>),
    /// The session is no longer authenticated. Polling must stop.
    Unauthenticated,
    /// Any other failure. The next tick polls again.
    Failed(SyncError),
}

impl<E: Entity> PollOutcome<E> {
    fn from_result(result: Result<DecodedBatch<E>, SyncError>) -> Self {
        match result {
            Ok(decoded) => {
                debug!(
                    kind = ?E::KIND,
                    changes = decoded.batch.len(),
                    skipped = decoded.skipped.len(),
                    "poll completed"
                );
                PollOutcome::Batch(decoded)
            }
            Err(SyncError::Unauthenticated) => {
                warn!(kind = ?E::KIND, "poll rejected: session is not authenticated");
                PollOutcome::Unauthenticated
            }
            Err(err) => {
                warn!(kind = ?E::KIND, error = %err, "poll failed");
                PollOutcome::Failed(err)
            }
        }
    }
}

/// Fetches the channel list and the selected channel's messages.
pub struct PollingAdapter<C: HttpClient> {
    api: ChatApi<C>,
}

impl<C: HttpClient> Clone for PollingAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
        }
    }
}

impl<C: HttpClient> PollingAdapter<C> {
    /// Creates a polling adapter over the given API.
    pub fn new(api: ChatApi<C>) -> Self {
        Self { api }
    }

    /// Polls the channel list for changes after `after`.
    pub async fn poll_channels(&self, after: Option<Timestamp>) -> PollOutcome<Channel> {
        PollOutcome::from_result(self.api.list_channels(after.as_ref()).await)
    }

    /// Polls one channel's messages for changes after `after`.
    pub async fn poll_messages(
        &self,
        channel_id: ChannelId,
        after: Option<Timestamp>,
    ) -> PollOutcome<Message> {
        PollOutcome::from_result(self.api.list_messages(channel_id, after.as_ref()).await)
    }
}
