//! Property tests for cursors and reconciliation.

use chatsync_engine::{Cursors, Origin, ReactionIntent, Reconciler, TimestampCursor};
use chatsync_protocol::{Batch, ChannelId, Entity};
use chatsync_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn cursor_tracks_the_maximum(stamps in prop::collection::vec(timestamp_strategy(), 1..20)) {
        let mut cursor = TimestampCursor::new();
        let mut previous = None;
        for stamp in &stamps {
            cursor.advance(stamp);
            let current = cursor.get().cloned();
            prop_assert!(current >= previous);
            previous = current;
        }
        prop_assert_eq!(cursor.get(), stamps.iter().max());
    }

    #[test]
    fn channel_batches_are_idempotent(batch in channel_batch_strategy()) {
        let mut reconciler = Reconciler::new();
        let mut cursors = Cursors::default();

        reconciler.apply_channel_batch(batch.clone(), Origin::Stream, &mut cursors);
        let view = reconciler.view().clone();
        let cursor = cursors.channels.get().cloned();

        let again = reconciler.apply_channel_batch(batch, Origin::Stream, &mut cursors);
        prop_assert!(again.is_empty());
        prop_assert_eq!(reconciler.view(), &view);
        prop_assert_eq!(cursors.channels.get().cloned(), cursor);
    }

    #[test]
    fn deletions_win_within_a_batch(batch in channel_batch_strategy()) {
        let mut reconciler = Reconciler::new();
        let mut cursors = Cursors::default();
        let deleted = batch.deleted_ids.clone();

        reconciler.apply_channel_batch(batch, Origin::Stream, &mut cursors);
        for id in deleted {
            prop_assert!(reconciler.view().channel(id).is_none());
        }
    }

    #[test]
    fn message_streams_converge(
        first in message_batch_strategy(ChannelId(1)),
        second in message_batch_strategy(ChannelId(1)),
    ) {
        let mut reconciler = Reconciler::new();
        let mut cursors = Cursors::default();
        reconciler.select_channel(ChannelId(1), &mut cursors);

        let mut previous = None;
        for batch in [first.clone(), second.clone(), second.clone()] {
            reconciler.apply_message_batch(ChannelId(1), batch, Origin::Stream, &mut cursors);
            let current = cursors.messages.get().cloned();
            prop_assert!(current >= previous);
            previous = current;
        }

        for id in &second.deleted_ids {
            prop_assert!(!reconciler.view().contains_message(*id));
        }
        let again =
            reconciler.apply_message_batch(ChannelId(1), second, Origin::Stream, &mut cursors);
        prop_assert!(again.is_empty());
    }

    #[test]
    fn action_results_never_move_the_cursor(batch in message_batch_strategy(ChannelId(2))) {
        let mut reconciler = Reconciler::new();
        let mut cursors = Cursors::default();
        reconciler.select_channel(ChannelId(2), &mut cursors);

        reconciler.apply_message_batch(ChannelId(2), batch, Origin::Action, &mut cursors);
        prop_assert!(!cursors.messages.is_set());
    }

    #[test]
    fn toggling_twice_restores_reactions(
        message in message_strategy(1, ChannelId(1)),
        emoji in emoji_strategy(),
        user in user_id_strategy(),
    ) {
        let mut reconciler = Reconciler::new();
        let mut cursors = Cursors::default();
        reconciler.select_channel(ChannelId(1), &mut cursors);
        reconciler.apply_message_batch(
            ChannelId(1),
            Batch::created(vec![message.clone()]),
            Origin::Stream,
            &mut cursors,
        );

        let intent = reconciler.reaction_intent(message.id(), &emoji, user).unwrap();
        prop_assert!(reconciler
            .apply_optimistic_reaction(message.id(), &emoji, user, intent)
            .is_some());
        let toggled = reconciler.view().message(message.id).unwrap().has_reacted(&emoji, user);
        prop_assert_eq!(toggled, intent == ReactionIntent::React);

        reconciler.apply_optimistic_reaction(message.id(), &emoji, user, intent.inverse());
        prop_assert_eq!(
            &reconciler.view().message(message.id).unwrap().reactions,
            &message.reactions
        );
    }
}
