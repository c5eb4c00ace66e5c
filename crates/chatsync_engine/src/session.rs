//! The explicit sync context owned by the engine driver.

use crate::cursor::Cursors;
use crate::reconciler::{Origin, ReactionIntent, Reconciler, ViewMutation, ViewState};
use chatsync_protocol::{
    Batch, Channel, ChannelId, CurrentUser, Message, MessageId, ReactionState, RemoteEvent,
    UserId,
};

/// Identifies which selection a message fetch was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTag {
    /// Channel the fetch targets.
    pub channel_id: ChannelId,
    /// Selection generation at issue time.
    pub generation: u64,
}

/// Reconciler, cursors, selection generation and identity of one session.
#[derive(Debug, Default)]
pub struct SyncSession {
    reconciler: Reconciler,
    cursors: Cursors,
    generation: u64,
    user: Option<CurrentUser>,
}

impl SyncSession {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current view.
    pub fn view(&self) -> &ViewState {
        self.reconciler.view()
    }

    /// Returns the stream cursors.
    pub fn cursors(&self) -> &Cursors {
        &self.cursors
    }

    /// Returns the selected channel.
    pub fn selected(&self) -> Option<ChannelId> {
        self.reconciler.view().selected()
    }

    /// Returns the signed-in user, once known.
    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    /// Returns the signed-in user's id, once known.
    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().and_then(|user| user.id)
    }

    /// Records the signed-in user.
    pub fn set_user(&mut self, user: CurrentUser) {
        self.user = Some(user);
    }

    /// Switches the selection. Earlier message fetches become stale.
    pub fn select_channel(&mut self, channel_id: ChannelId) -> Vec<ViewMutation> {
        self.generation += 1;
        self.reconciler.select_channel(channel_id, &mut self.cursors)
    }

    /// Returns the tag for a message fetch issued now.
    pub fn message_tag(&self) -> Option<MessageTag> {
        self.selected().map(|channel_id| MessageTag {
            channel_id,
            generation: self.generation,
        })
    }

    /// Returns true if results tagged `tag` still belong to the selection.
    pub fn is_current(&self, tag: MessageTag) -> bool {
        tag.generation == self.generation && self.selected() == Some(tag.channel_id)
    }

    /// Applies a channel-list batch.
    pub fn apply_channels(&mut self, batch: Batch<Channel>, origin: Origin) -> Vec<ViewMutation> {
        let before = self.selected();
        let mutations = self
            .reconciler
            .apply_channel_batch(batch, origin, &mut self.cursors);
        if self.selected() != before {
            self.generation += 1;
        }
        mutations
    }

    /// Applies a message batch fetched under `tag`.
    ///
    /// Returns `None` if the selection changed since the fetch was issued.
    pub fn apply_messages(
        &mut self,
        tag: MessageTag,
        batch: Batch<Message>,
        origin: Origin,
    ) -> Option<Vec<ViewMutation>> {
        if !self.is_current(tag) {
            return None;
        }
        Some(
            self.reconciler
                .apply_message_batch(tag.channel_id, batch, origin, &mut self.cursors),
        )
    }

    /// Applies a confirmed action on `channel_id`'s messages.
    pub fn apply_message_action(
        &mut self,
        channel_id: ChannelId,
        batch: Batch<Message>,
    ) -> Vec<ViewMutation> {
        self.reconciler
            .apply_message_batch(channel_id, batch, Origin::Action, &mut self.cursors)
    }

    /// Applies a pushed event.
    pub fn apply_remote(&mut self, event: RemoteEvent) -> Vec<ViewMutation> {
        let before = self.selected();
        let mutations = self.reconciler.apply_event(event, &mut self.cursors);
        if self.selected() != before {
            self.generation += 1;
        }
        mutations
    }

    /// Returns the toggle direction for the signed-in user.
    pub fn reaction_intent(&self, message_id: MessageId, emoji: &str) -> Option<ReactionIntent> {
        let user = self.user_id()?;
        self.reconciler.reaction_intent(message_id, emoji, user)
    }

    /// Applies the signed-in user's reaction change before confirmation.
    pub fn apply_optimistic_reaction(
        &mut self,
        message_id: MessageId,
        emoji: &str,
        intent: ReactionIntent,
    ) -> Option<ViewMutation> {
        let user = self.user_id()?;
        self.reconciler
            .apply_optimistic_reaction(message_id, emoji, user, intent)
    }

    /// Replaces a message's reactions with the server's map.
    pub fn apply_reactions(&mut self, state: ReactionState) -> Option<ViewMutation> {
        self.reconciler.apply_reactions(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::{ReactionMap, Timestamp};

    fn message(id: i64, channel: i64) -> Message {
        Message {
            id: MessageId(id),
            channel_id: ChannelId(channel),
            user_id: UserId(1),
            email: None,
            content: "hi".into(),
            created_at: Timestamp::parse("2024-05-01T12:00:00").unwrap(),
            reactions: ReactionMap::new(),
        }
    }

    #[test]
    fn stale_results_are_discarded() {
        let mut session = SyncSession::new();
        session.select_channel(ChannelId(1));
        let tag_a = session.message_tag().unwrap();

        session.select_channel(ChannelId(2));

        let late =
            session.apply_messages(tag_a, Batch::created(vec![message(1, 1)]), Origin::Stream);
        assert!(late.is_none());
        assert_eq!(session.view().message_count(), 0);
    }

    #[test]
    fn reselecting_invalidates_earlier_fetches() {
        let mut session = SyncSession::new();
        session.select_channel(ChannelId(1));
        let first = session.message_tag().unwrap();
        session.select_channel(ChannelId(1));

        assert!(!session.is_current(first));
        assert!(session.is_current(session.message_tag().unwrap()));
    }

    #[test]
    fn reactions_need_a_known_user() {
        let mut session = SyncSession::new();
        session.select_channel(ChannelId(1));
        let tag = session.message_tag().unwrap();
        session.apply_messages(tag, Batch::created(vec![message(1, 1)]), Origin::Stream);

        assert_eq!(session.reaction_intent(MessageId(1), "👍"), None);

        session.set_user(CurrentUser {
            id: Some(UserId(5)),
            email: None,
            is_authenticated: true,
        });
        assert_eq!(
            session.reaction_intent(MessageId(1), "👍"),
            Some(ReactionIntent::React)
        );
    }

    #[test]
    fn deleting_selected_channel_bumps_generation() {
        let mut session = SyncSession::new();
        session.select_channel(ChannelId(1));
        let tag = session.message_tag().unwrap();

        session.apply_remote(RemoteEvent::ChannelDeleted(ChannelId(1)));

        assert!(!session.is_current(tag));
        assert!(session.message_tag().is_none());
    }
}
