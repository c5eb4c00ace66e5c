//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::time::Duration;

/// How the engine learns about remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Periodic "after timestamp" fetches.
    #[default]
    Polling,
    /// Event subscription over a persistent socket.
    Push,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the chat API (e.g., "https://chat.example.com").
    pub base_url: String,
    /// Socket URL. Derived from `base_url` when unset.
    pub socket_url: Option<String>,
    /// Transport used for remote changes.
    pub mode: TransportMode,
    /// Interval between channel-list polls.
    pub channel_poll_interval: Duration,
    /// Interval between message polls for the selected channel.
    pub message_poll_interval: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Session cookie sent with every request, as a `Cookie` header value.
    pub session_cookie: Option<String>,
    /// Reconnect behaviour for the push transport.
    pub reconnect: RetryConfig,
}

impl SyncConfig {
    /// Creates a new configuration with polling defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            socket_url: None,
            mode: TransportMode::Polling,
            channel_poll_interval: Duration::from_millis(2000),
            message_poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            session_cookie: None,
            reconnect: RetryConfig::default(),
        }
    }

    /// Sets the transport mode.
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets both poll intervals.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.channel_poll_interval = interval;
        self.message_poll_interval = interval;
        self
    }

    /// Sets the channel-list poll interval.
    pub fn with_channel_poll_interval(mut self, interval: Duration) -> Self {
        self.channel_poll_interval = interval;
        self
    }

    /// Sets the message poll interval.
    pub fn with_message_poll_interval(mut self, interval: Duration) -> Self {
        self.message_poll_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the session cookie.
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Sets an explicit socket URL.
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Returns the socket URL, deriving `ws(s)://<host>/ws` from the base URL.
    pub fn socket_endpoint(&self) -> String {
        if let Some(url) = &self.socket_url {
            return url.clone();
        }
        let base = self.base_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/ws")
    }

    /// Checks that the configuration can drive an engine.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::ValidationFailed("base URL is empty".into()));
        }
        if self.channel_poll_interval.is_zero() || self.message_poll_interval.is_zero() {
            return Err(SyncError::ValidationFailed(
                "poll intervals must be non-zero".into(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(SyncError::ValidationFailed(
                "reconnect attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:5000")
    }
}

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before reconnect attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = rand::thread_rng().gen_range(0.0..=0.25);
            Duration::from_secs_f64(delay * (1.0 + jitter))
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://chat.example.com")
            .with_mode(TransportMode::Push)
            .with_poll_interval(Duration::from_millis(500))
            .with_message_poll_interval(Duration::from_millis(750))
            .with_timeout(Duration::from_secs(5))
            .with_session_cookie("session=abc");

        assert_eq!(config.mode, TransportMode::Push);
        assert_eq!(config.channel_poll_interval, Duration::from_millis(500));
        assert_eq!(config.message_poll_interval, Duration::from_millis(750));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.session_cookie.as_deref(), Some("session=abc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_poll_every_two_seconds() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, TransportMode::Polling);
        assert_eq!(config.channel_poll_interval, Duration::from_millis(2000));
        assert_eq!(config.message_poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn socket_endpoint_derivation() {
        assert_eq!(
            SyncConfig::new("https://chat.example.com/").socket_endpoint(),
            "wss://chat.example.com/ws"
        );
        assert_eq!(
            SyncConfig::new("http://localhost:5000").socket_endpoint(),
            "ws://localhost:5000/ws"
        );
        assert_eq!(
            SyncConfig::new("http://localhost:5000")
                .with_socket_url("ws://localhost:6000/socket")
                .socket_endpoint(),
            "ws://localhost:6000/socket"
        );
    }

    #[test]
    fn validation_rejects_zero_interval() {
        let config = SyncConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(SyncError::ValidationFailed(_))
        ));

        let config = SyncConfig::default().with_reconnect(RetryConfig::new(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay3 = config.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(400));
        assert!(delay3 <= Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .without_jitter();

        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
    }
}
