//! Last-seen creation time per sync stream.

use chatsync_protocol::Timestamp;

/// Query parameter carrying the cursor.
pub const AFTER_PARAM: &str = "after";

/// Tracks the newest creation timestamp observed on one stream.
///
/// The cursor only moves forward while its stream is active; switching
/// streams resets it to unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampCursor {
    value: Option<Timestamp>,
}

impl TimestampCursor {
    /// Creates an unset cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the cursor to `candidate` if it is unset or `candidate` is newer.
    ///
    /// Returns true if the cursor moved.
    pub fn advance(&mut self, candidate: &Timestamp) -> bool {
        match &self.value {
            Some(current) if candidate <= current => false,
            _ => {
                self.value = Some(candidate.clone());
                true
            }
        }
    }

    /// Clears the cursor.
    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Returns the current value.
    pub fn get(&self) -> Option<&Timestamp> {
        self.value.as_ref()
    }

    /// Returns true if the cursor has a value.
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the `after` filter for the next fetch, or `None` when unset.
    pub fn as_query_param(&self) -> Option<(&'static str, String)> {
        self.value
            .as_ref()
            .map(|ts| (AFTER_PARAM, ts.as_str().to_string()))
    }
}

/// The two cursors owned by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursors {
    /// Global channel-list stream.
    pub channels: TimestampCursor,
    /// Message stream of the selected channel.
    pub messages: TimestampCursor,
}
