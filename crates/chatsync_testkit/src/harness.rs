//! Helpers for driving a spawned engine in tests.
//!
//! All waits are bounded by [`WAIT_LIMIT`] of (usually paused) Tokio time,
//! so a missing event fails the test instead of hanging it.

use chatsync_engine::{EngineEvent, EngineHandle, SyncConfig, SyncSignal, ViewState};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

/// Upper bound for every wait.
pub const WAIT_LIMIT: Duration = Duration::from_secs(120);

/// Step between condition checks.
pub const POLL_STEP: Duration = Duration::from_millis(10);

/// Configuration with short poll intervals, for stream-driven tests.
pub fn fast_config() -> SyncConfig {
    SyncConfig::new("http://chat.test").with_poll_interval(Duration::from_secs(2))
}

/// Configuration whose timers only fire once at start-up, for tests that
/// need to know exactly which request comes next.
pub fn quiet_config() -> SyncConfig {
    SyncConfig::new("http://chat.test").with_poll_interval(Duration::from_secs(3600))
}

/// Receives events until one matches, dropping the rest.
///
/// # Panics
///
/// Panics if the stream ends or nothing matches within [`WAIT_LIMIT`].
pub async fn wait_for_event(
    events: &mut UnboundedReceiver<EngineEvent>,
    mut matches: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Receives events until `signal` arrives.
pub async fn wait_for_signal(events: &mut UnboundedReceiver<EngineEvent>, signal: SyncSignal) {
    wait_for_event(events, |event| *event == EngineEvent::Signal(signal.clone())).await;
}

/// Snapshots the view until `condition` holds and returns that snapshot.
///
/// # Panics
///
/// Panics if the engine stops or the condition never holds.
pub async fn wait_for_view(
    handle: &EngineHandle,
    mut condition: impl FnMut(&ViewState) -> bool,
) -> ViewState {
    timeout(WAIT_LIMIT, async {
        loop {
            let view = handle.snapshot().await.expect("engine stopped");
            if condition(&view) {
                return view;
            }
            sleep(POLL_STEP).await;
        }
    })
    .await
    .expect("timed out waiting for view")
}

/// Waits until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT_LIMIT, async {
        while !condition() {
            sleep(POLL_STEP).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Drains the stream to its end and returns the last event.
pub async fn drain(events: &mut UnboundedReceiver<EngineEvent>) -> Option<EngineEvent> {
    timeout(WAIT_LIMIT, async {
        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        last
    })
    .await
    .expect("event stream never ended")
}
