//! Merges remote changes into the client view.
//!
//! The reconciler is the only writer of [`ViewState`]. Every change it makes
//! is reported as a [`ViewMutation`] so a renderer can patch its output
//! without diffing.
//!
//! Batches are applied deletions first, and an id deleted in a batch is never
//! (re)inserted by the same batch. Applying a batch twice yields the same view
//! and no mutations the second time.

use crate::cursor::{Cursors, TimestampCursor};
use chatsync_protocol::{
    Batch, Channel, ChannelId, Entity, Message, MessageId, ReactionMap, ReactionState,
    RemoteEvent, UserId,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A single change to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewMutation {
    /// A channel was added to the end of the channel list.
    ChannelInserted(Channel),
    /// A channel's name changed.
    ChannelUpdated(Channel),
    /// A channel was removed.
    ChannelRemoved(ChannelId),
    /// A message was appended to the selected channel.
    MessageInserted(Message),
    /// A message's reactions changed.
    MessageUpdated(Message),
    /// A message was removed.
    MessageRemoved(MessageId),
    /// A channel was selected; the message list is now empty and the
    /// compose form visible.
    SelectionChanged(ChannelId),
    /// The selected channel went away; the message list is empty and the
    /// compose form hidden.
    SelectionCleared,
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A sync stream (poll or push). Advances the stream cursor.
    Stream,
    /// A confirmed user action. Never moves the cursor, so entities created
    /// by other users in the meantime are still fetched.
    Action,
}

/// Direction of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionIntent {
    /// Add the user's reaction.
    React,
    /// Remove the user's reaction.
    Unreact,
}

impl ReactionIntent {
    /// Returns the opposite intent.
    pub fn inverse(self) -> Self {
        match self {
            ReactionIntent::React => ReactionIntent::Unreact,
            ReactionIntent::Unreact => ReactionIntent::React,
        }
    }
}

/// Decides whether clicking `emoji` on `message` reacts or unreacts.
pub fn reaction_intent(message: &Message, emoji: &str, user: UserId) -> ReactionIntent {
    if message.has_reacted(emoji, user) {
        ReactionIntent::Unreact
    } else {
        ReactionIntent::React
    }
}

/// An id-indexed list that keeps first-materialization order.
#[derive(Debug, Clone)]
struct OrderedMap<K, V> {
    order: Vec<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + std::hash::Hash, V: PartialEq> PartialEq for OrderedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.entries == other.entries
    }
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + std::hash::Hash, V> OrderedMap<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key, value).is_none() {
            self.order.push(key);
        }
    }

    fn remove(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn iter(&self) -> impl Iterator<Item = &V> + '_ {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }
}

/// What the client currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    channels: OrderedMap<ChannelId, Channel>,
    messages: OrderedMap<MessageId, Message>,
    selected: Option<ChannelId>,
    compose_visible: bool,
}

impl ViewState {
    /// Channels in materialization order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> + '_ {
        self.channels.iter()
    }

    /// Looks up a channel.
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Number of channels in the view.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Messages of the selected channel in materialization order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.messages.iter()
    }

    /// Looks up a message of the selected channel.
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Returns true if the message is in the view.
    pub fn contains_message(&self, id: MessageId) -> bool {
        self.messages.contains(&id)
    }

    /// Number of messages in the view.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The selected channel.
    pub fn selected(&self) -> Option<ChannelId> {
        self.selected
    }

    /// Whether the compose form is shown.
    pub fn compose_visible(&self) -> bool {
        self.compose_visible
    }
}

/// Applies batches and events to a [`ViewState`].
#[derive(Debug, Default)]
pub struct Reconciler {
    view: ViewState,
}

impl Reconciler {
    /// Creates a reconciler with an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current view.
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Selects a channel: empties the message list, resets the message
    /// cursor and shows the compose form.
    ///
    /// Re-selecting the current channel performs the same full reset.
    pub fn select_channel(
        &mut self,
        channel_id: ChannelId,
        cursors: &mut Cursors,
    ) -> Vec<ViewMutation> {
        self.view.messages.clear();
        self.view.selected = Some(channel_id);
        self.view.compose_visible = true;
        cursors.messages.reset();
        vec![ViewMutation::SelectionChanged(channel_id)]
    }

    /// Clears the selection, if any.
    pub fn clear_selection(&mut self, cursors: &mut Cursors) -> Vec<ViewMutation> {
        if self.view.selected.is_none() {
            return Vec::new();
        }
        self.view.messages.clear();
        self.view.selected = None;
        self.view.compose_visible = false;
        cursors.messages.reset();
        vec![ViewMutation::SelectionCleared]
    }

    /// Applies one channel-list batch.
    pub fn apply_channel_batch(
        &mut self,
        batch: Batch<Channel>,
        origin: Origin,
        cursors: &mut Cursors,
    ) -> Vec<ViewMutation> {
        let mut mutations = Vec::new();
        let deleted: HashSet<ChannelId> = batch.deleted_ids.iter().copied().collect();

        for id in &batch.deleted_ids {
            if self.view.channels.remove(id) {
                mutations.push(ViewMutation::ChannelRemoved(*id));
            }
            if self.view.selected == Some(*id) {
                mutations.extend(self.clear_selection(cursors));
            }
        }

        for channel in batch.created.into_iter().chain(batch.updated) {
            if deleted.contains(&channel.id) {
                continue;
            }
            observe(&mut cursors.channels, &channel, origin);

            match self.view.channels.get_mut(&channel.id) {
                Some(existing) => {
                    if channel.name.is_some() && existing.name != channel.name {
                        existing.name = channel.name;
                        mutations.push(ViewMutation::ChannelUpdated(existing.clone()));
                    }
                }
                None => {
                    mutations.push(ViewMutation::ChannelInserted(channel.clone()));
                    self.view.channels.insert(channel.id, channel);
                }
            }
        }

        mutations
    }

    /// Applies one message batch for `channel_id`.
    ///
    /// Batches for a channel other than the selected one are ignored.
    pub fn apply_message_batch(
        &mut self,
        channel_id: ChannelId,
        batch: Batch<Message>,
        origin: Origin,
        cursors: &mut Cursors,
    ) -> Vec<ViewMutation> {
        if self.view.selected != Some(channel_id) {
            debug!(%channel_id, "ignoring messages for unselected channel");
            return Vec::new();
        }

        let mut mutations = Vec::new();
        let deleted: HashSet<MessageId> = batch.deleted_ids.iter().copied().collect();

        for id in &batch.deleted_ids {
            if self.view.messages.remove(id) {
                mutations.push(ViewMutation::MessageRemoved(*id));
            }
        }

        for message in batch.created.into_iter().chain(batch.updated) {
            if deleted.contains(&message.id) || message.channel_id != channel_id {
                continue;
            }
            observe(&mut cursors.messages, &message, origin);

            match self.view.messages.get_mut(&message.id) {
                Some(existing) => {
                    if existing.reactions != message.reactions {
                        existing.reactions = message.reactions;
                        mutations.push(ViewMutation::MessageUpdated(existing.clone()));
                    }
                }
                None => {
                    mutations.push(ViewMutation::MessageInserted(message.clone()));
                    self.view.messages.insert(message.id, message);
                }
            }
        }

        mutations
    }

    /// Applies a single pushed event.
    pub fn apply_event(&mut self, event: RemoteEvent, cursors: &mut Cursors) -> Vec<ViewMutation> {
        match event {
            RemoteEvent::ChannelCreated(channel) => {
                self.apply_channel_batch(Batch::created(vec![channel]), Origin::Stream, cursors)
            }
            RemoteEvent::ChannelUpdated(channel) => {
                self.apply_channel_batch(Batch::updated(channel), Origin::Stream, cursors)
            }
            RemoteEvent::ChannelDeleted(id) => {
                self.apply_channel_batch(Batch::deleted(id), Origin::Stream, cursors)
            }
            RemoteEvent::MessageCreated(message) => {
                let channel_id = message.channel_id;
                self.apply_message_batch(
                    channel_id,
                    Batch::created(vec![message]),
                    Origin::Stream,
                    cursors,
                )
            }
            RemoteEvent::MessageUpdated(message) => {
                let channel_id = message.channel_id;
                let batch = Batch::updated(message);
                self.apply_message_batch(channel_id, batch, Origin::Stream, cursors)
            }
            RemoteEvent::MessageDeleted {
                channel_id,
                message_id,
            } => self.apply_message_batch(
                channel_id,
                Batch::deleted(message_id),
                Origin::Stream,
                cursors,
            ),
        }
    }

    /// Returns the toggle direction for `emoji` on a message in the view.
    pub fn reaction_intent(
        &self,
        message_id: MessageId,
        emoji: &str,
        user: UserId,
    ) -> Option<ReactionIntent> {
        self.view
            .messages
            .get(&message_id)
            .map(|message| reaction_intent(message, emoji, user))
    }

    /// Applies a reaction change locally before the server confirms it.
    pub fn apply_optimistic_reaction(
        &mut self,
        message_id: MessageId,
        emoji: &str,
        user: UserId,
        intent: ReactionIntent,
    ) -> Option<ViewMutation> {
        let message = self.view.messages.get_mut(&message_id)?;
        let changed = match intent {
            ReactionIntent::React => message
                .reactions
                .entry(emoji.to_string())
                .or_default()
                .insert(user),
            ReactionIntent::Unreact => {
                let removed = message
                    .reactions
                    .get_mut(emoji)
                    .is_some_and(|reaction| reaction.remove(user));
                if message.reactions.get(emoji).is_some_and(|r| r.is_empty()) {
                    message.reactions.remove(emoji);
                }
                removed
            }
        };
        changed.then(|| ViewMutation::MessageUpdated(message.clone()))
    }

    /// Replaces a message's reactions with the server's map.
    pub fn apply_reactions(&mut self, state: ReactionState) -> Option<ViewMutation> {
        self.replace_reactions(state.message_id, state.reactions)
    }

    fn replace_reactions(
        &mut self,
        message_id: MessageId,
        reactions: ReactionMap,
    ) -> Option<ViewMutation> {
        let message = self.view.messages.get_mut(&message_id)?;
        if message.reactions == reactions {
            return None;
        }
        message.reactions = reactions;
        Some(ViewMutation::MessageUpdated(message.clone()))
    }
}

fn observe<E: Entity>(cursor: &mut TimestampCursor, entity: &E, origin: Origin) {
    if origin == Origin::Stream {
        if let Some(created_at) = entity.created_at() {
            cursor.advance(created_at);
        }
    }
}
