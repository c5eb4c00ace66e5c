//! Engine lifecycle state and statistics.

use std::time::Instant;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is syncing.
    Running,
    /// The session lost authentication; timers and subscriptions are stopped.
    Suspended,
    /// Push reconnects were exhausted. Actions still go over HTTP.
    Disconnected,
    /// Engine has shut down.
    Stopped,
}

impl SyncState {
    /// Returns true if user actions can still reach the server.
    pub fn accepts_actions(&self) -> bool {
        matches!(self, SyncState::Running | SyncState::Disconnected)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Channel-list polls completed (successfully or not).
    pub channel_polls: u64,
    /// Message polls completed (successfully or not).
    pub message_polls: u64,
    /// Polls that failed.
    pub poll_failures: u64,
    /// View mutations produced.
    pub mutations_applied: u64,
    /// Malformed entities skipped.
    pub entities_skipped: u64,
    /// Message results discarded because the selection changed.
    pub stale_discarded: u64,
    /// Events received over the push transport.
    pub push_events: u64,
    /// Successful push reconnects.
    pub reconnects: u64,
    /// Last successful sync.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(SyncState::Running.accepts_actions());
        assert!(SyncState::Disconnected.accepts_actions());
        assert!(!SyncState::Suspended.accepts_actions());
        assert!(!SyncState::Stopped.accepts_actions());
    }

    #[test]
    fn stats_start_empty() {
        let stats = SyncStats::default();
        assert_eq!(stats.channel_polls, 0);
        assert!(stats.last_sync_time.is_none());
        assert!(stats.last_error.is_none());
    }
}
