//! Push transport: a persistent socket delivering tagged events.
//!
//! The adapter owns one connection and at most one channel subscription.
//! Lost connections are re-established with bounded exponential backoff,
//! and the active subscription is re-joined after every reconnect.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use chatsync_protocol::{ChannelId, PushCommand, PushEvent, RemoteEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An open text-frame connection.
pub trait SocketConnection: Send + 'static {
    /// Sends one text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), String>> + Send;

    /// Receives the next text frame. `None` means the peer closed.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, String>>> + Send;
}

/// Opens socket connections.
pub trait SocketConnector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: SocketConnection;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, String>> + Send;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    cookie: Option<String>,
}

impl WsConnector {
    /// Creates a connector for `url`, sending `cookie` on the handshake.
    pub fn new(url: impl Into<String>, cookie: Option<String>) -> Self {
        Self {
            url: url.into(),
            cookie,
        }
    }

    /// Returns the socket URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SocketConnector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self) -> Result<WsConnection, String> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| e.to_string())?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| e.to_string())?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(WsConnection { stream })
    }
}

/// A live WebSocket connection.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketConnection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), String> {
        self.stream
            .send(WsMessage::text(text))
            .await
            .map_err(|e| e.to_string())
    }

    async fn recv(&mut self) -> Option<Result<String, String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.to_string())),
            }
        }
    }
}

/// Requests from the engine to the push task.
#[derive(Debug)]
pub enum PushInput {
    /// Replace the active channel subscription.
    Subscribe {
        /// Channel to follow, or `None` to follow no channel.
        channel_id: Option<ChannelId>,
        /// User announced in `join_channel`.
        user_id: Option<UserId>,
    },
    /// Send a command and report whether it reached the socket.
    Emit {
        /// Command to send.
        command: PushCommand,
        /// Completion.
        reply: oneshot::Sender<SyncResult<()>>,
    },
}

/// Connection-level notifications from the push task.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSignal {
    /// The first connection was established.
    Connected,
    /// A lost connection was re-established.
    Reconnected,
    /// The server acknowledged a channel join.
    Joined(ChannelId),
    /// The server rejected a command.
    ServerError(String),
    /// Another user joined the active channel.
    UserJoined(UserId),
    /// The session was signed out elsewhere.
    LoggedOut,
    /// Reconnect attempts were exhausted; the task has stopped.
    Disconnected {
        /// Attempts made.
        attempts: u32,
    },
}

/// Output of the push task.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutput {
    /// An entity change.
    Event(RemoteEvent),
    /// A connection-level notification.
    Signal(PushSignal),
}

/// Handle used to drive the push task.
#[derive(Debug, Clone)]
pub struct PushEmitter {
    inputs: mpsc::UnboundedSender<PushInput>,
}

impl PushEmitter {
    /// Wraps the input side of a push task.
    pub fn new(inputs: mpsc::UnboundedSender<PushInput>) -> Self {
        Self { inputs }
    }

    /// Replaces the active channel subscription.
    pub fn subscribe(&self, channel_id: Option<ChannelId>, user_id: Option<UserId>) {
        if self
            .inputs
            .send(PushInput::Subscribe {
                channel_id,
                user_id,
            })
            .is_err()
        {
            debug!("push task has stopped; subscription dropped");
        }
    }

    /// Sends a command over the socket.
    pub async fn emit(&self, command: PushCommand) -> SyncResult<()> {
        let (reply, done) = oneshot::channel();
        self.inputs
            .send(PushInput::Emit { command, reply })
            .map_err(|_| SyncError::transport_fatal("push connection is closed"))?;
        done.await
            .map_err(|_| SyncError::transport_fatal("push connection is closed"))?
    }
}

/// Owns the socket, the subscription and reconnection.
pub struct PushAdapter<S: SocketConnector> {
    connector: S,
    retry: RetryConfig,
    subscription: Subscription,
}

#[derive(Debug, Default)]
struct Subscription {
    channel_id: Option<ChannelId>,
    user_id: Option<UserId>,
}

impl Subscription {
    /// Records requests that arrive while no connection is open.
    fn absorb(&mut self, input: PushInput) {
        match input {
            PushInput::Subscribe {
                channel_id,
                user_id,
            } => {
                self.channel_id = channel_id;
                self.user_id = user_id;
            }
            PushInput::Emit { reply, .. } => {
                let _ = reply.send(Err(SyncError::transport_retryable(
                    "push connection unavailable",
                )));
            }
        }
    }
}

enum SessionEnd {
    /// The connection dropped. `stable` is set once it delivered a frame or
    /// stayed open for at least the longest backoff delay.
    Lost { stable: bool },
    Stopped,
}

impl<S: SocketConnector> PushAdapter<S> {
    /// Creates an adapter with the given reconnect policy.
    pub fn new(connector: S, retry: RetryConfig) -> Self {
        Self {
            connector,
            retry,
            subscription: Subscription::default(),
        }
    }

    /// Runs until cancelled, the input side closes, or reconnects are exhausted.
    pub async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<PushInput>,
        outputs: mpsc::UnboundedSender<PushOutput>,
        cancel: CancellationToken,
    ) {
        let mut attempt: u32 = 0;
        let mut connected_once = false;

        loop {
            if attempt > self.retry.max_attempts {
                let attempts = self.retry.max_attempts;
                warn!(attempts, "push reconnect attempts exhausted");
                let _ = outputs.send(PushOutput::Signal(PushSignal::Disconnected { attempts }));
                return;
            }

            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "waiting before reconnect");
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = &mut sleep => break,
                        Some(input) = inputs.recv() => self.subscription.absorb(input),
                    }
                }
            }

            let result = {
                let connect = self.connector.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = &mut connect => break result,
                        Some(input) = inputs.recv() => self.subscription.absorb(input),
                    }
                }
            };

            let mut connection = match result {
                Ok(connection) => connection,
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "push connection failed");
                    continue;
                }
            };

            let signal = if connected_once {
                info!("push connection re-established");
                PushSignal::Reconnected
            } else {
                info!("push connection established");
                PushSignal::Connected
            };
            connected_once = true;
            if outputs.send(PushOutput::Signal(signal)).is_err() {
                return;
            }

            if let Some(channel_id) = self.subscription.channel_id {
                let join = PushCommand::JoinChannel {
                    channel_id,
                    user_id: self.subscription.user_id,
                };
                if let Err(e) = send_command(&mut connection, &join).await {
                    attempt += 1;
                    warn!(attempt, error = %e, "failed to re-join channel");
                    continue;
                }
                info!(%channel_id, "joined channel");
            }

            match self
                .serve(&mut connection, &mut inputs, &outputs, &cancel)
                .await
            {
                SessionEnd::Stopped => return,
                SessionEnd::Lost { stable } => {
                    attempt = if stable { 1 } else { attempt + 1 };
                    warn!(attempt, stable, "push connection lost");
                }
            }
        }
    }

    async fn serve(
        &mut self,
        connection: &mut S::Connection,
        inputs: &mut mpsc::UnboundedReceiver<PushInput>,
        outputs: &mpsc::UnboundedSender<PushOutput>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let opened = Instant::now();
        let settle = self.retry.max_delay;
        let mut received = false;
        let stable = |received: bool| received || opened.elapsed() >= settle;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Stopped,
                input = inputs.recv() => {
                    let Some(input) = input else {
                        return SessionEnd::Stopped;
                    };
                    if let Err(e) = self.handle_online(connection, input).await {
                        warn!(error = %e, "push send failed");
                        return SessionEnd::Lost { stable: stable(received) };
                    }
                }
                frame = connection.recv() => match frame {
                    None => return SessionEnd::Lost { stable: stable(received) },
                    Some(Err(e)) => {
                        warn!(error = %e, "push receive failed");
                        return SessionEnd::Lost { stable: stable(received) };
                    }
                    Some(Ok(text)) => {
                        received = true;
                        if !self.handle_frame(&text, outputs) {
                            return SessionEnd::Stopped;
                        }
                    }
                },
            }
        }
    }

    async fn handle_online(
        &mut self,
        connection: &mut S::Connection,
        input: PushInput,
    ) -> SyncResult<()> {
        match input {
            PushInput::Subscribe {
                channel_id,
                user_id,
            } => {
                // Recorded before sending so a reconnect re-joins it.
                let previous = std::mem::replace(
                    &mut self.subscription,
                    Subscription {
                        channel_id,
                        user_id,
                    },
                );
                if channel_id == previous.channel_id && user_id == previous.user_id {
                    return Ok(());
                }
                if let Some(old) = previous.channel_id.filter(|old| Some(*old) != channel_id) {
                    send_command(connection, &PushCommand::LeaveChannel { channel_id: old })
                        .await?;
                    info!(channel_id = %old, "left channel");
                }
                if let Some(new) = channel_id {
                    let join = PushCommand::JoinChannel {
                        channel_id: new,
                        user_id,
                    };
                    send_command(connection, &join).await?;
                    info!(channel_id = %new, "joined channel");
                }
                Ok(())
            }
            PushInput::Emit { command, reply } => {
                let result = send_command(connection, &command).await;
                let _ = reply.send(result.clone());
                result
            }
        }
    }

    /// Returns false once nobody is listening.
    fn handle_frame(&self, text: &str, outputs: &mpsc::UnboundedSender<PushOutput>) -> bool {
        let event = match PushEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping push frame");
                return true;
            }
        };

        let output = match event {
            PushEvent::JoinedChannelOk { channel_id } => {
                PushOutput::Signal(PushSignal::Joined(channel_id))
            }
            PushEvent::Error { message } => PushOutput::Signal(PushSignal::ServerError(message)),
            PushEvent::UserJoined { user_id } => {
                PushOutput::Signal(PushSignal::UserJoined(user_id))
            }
            PushEvent::LogoutBroadcast { user_id } => {
                let own = self.subscription.user_id;
                if user_id.is_some() && own.is_some() && user_id != own {
                    debug!("ignoring logout of another user");
                    return true;
                }
                PushOutput::Signal(PushSignal::LoggedOut)
            }
            other => match other.into_remote() {
                Some(event) => PushOutput::Event(event),
                None => return true,
            },
        };
        outputs.send(output).is_ok()
    }
}

async fn send_command<C: SocketConnection>(
    connection: &mut C,
    command: &PushCommand,
) -> SyncResult<()> {
    let text = command.encode()?;
    connection
        .send(text)
        .await
        .map_err(SyncError::transport_retryable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedConnection {
        frames: VecDeque<String>,
        sent: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl SocketConnection for ScriptedConnection {
        async fn send(&mut self, text: String) -> Result<(), String> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, String>> {
            match self.frames.pop_front() {
                Some(frame) => Some(Ok(frame)),
                None => std::future::pending().await,
            }
        }
    }

    struct ScriptedConnector {
        frames: Vec<String>,
        sent: Arc<parking_lot::Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl SocketConnector for ScriptedConnector {
        type Connection = ScriptedConnection;

        async fn connect(&self) -> Result<ScriptedConnection, String> {
            if self.refuse {
                return Err("connection refused".into());
            }
            Ok(ScriptedConnection {
                frames: self.frames.iter().cloned().collect(),
                sent: Arc::clone(&self.sent),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_emit_disconnected() {
        let connector = ScriptedConnector {
            frames: Vec::new(),
            sent: Arc::default(),
            refuse: true,
        };
        let adapter = PushAdapter::new(connector, RetryConfig::new(3).without_jitter());
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();

        adapter
            .run(input_rx, output_tx, CancellationToken::new())
            .await;

        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Signal(PushSignal::Disconnected { attempts: 3 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn frames_become_events_and_bad_frames_are_dropped() {
        let frames = vec![
            r#"{"event": "typing", "data": {}}"#.to_string(),
            r#"{"event": "channel_deleted", "data": {"channel_id": 4}}"#.to_string(),
            r#"{"event": "joined_channel_ok", "data": {"channel_id": 2}}"#.to_string(),
        ];
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let connector = ScriptedConnector {
            frames,
            sent: Arc::clone(&sent),
            refuse: false,
        };
        let adapter = PushAdapter::new(connector, RetryConfig::default());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(adapter.run(input_rx, output_tx, cancel.clone()));

        let emitter = PushEmitter::new(input_tx);
        emitter.subscribe(Some(ChannelId(2)), Some(UserId(1)));

        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Signal(PushSignal::Connected))
        );
        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Event(RemoteEvent::ChannelDeleted(ChannelId(4))))
        );
        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Signal(PushSignal::Joined(ChannelId(2))))
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sent.lock().iter().any(|frame| frame.contains("join_channel")));

        cancel.cancel();
        task.await.unwrap();
    }

    /// Connections are numbered from 1. `fail_send` makes the first
    /// connection fail on that send. `close` ends every connection as soon as
    /// it opens; `greet` ends it after one frame.
    #[derive(Default)]
    struct FlakyConnector {
        connects: Arc<parking_lot::Mutex<usize>>,
        sent: Arc<parking_lot::Mutex<Vec<(usize, String)>>>,
        fail_send: Option<usize>,
        close: bool,
        greet: bool,
    }

    struct FlakyConnection {
        number: usize,
        sends: usize,
        fail_send: Option<usize>,
        close: bool,
        greet: bool,
        sent: Arc<parking_lot::Mutex<Vec<(usize, String)>>>,
    }

    impl SocketConnection for FlakyConnection {
        async fn send(&mut self, text: String) -> Result<(), String> {
            self.sends += 1;
            if self.number == 1 && self.fail_send == Some(self.sends) {
                return Err("broken pipe".into());
            }
            self.sent.lock().push((self.number, text));
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, String>> {
            if self.greet {
                self.greet = false;
                self.close = true;
                let frame = r#"{"event": "user_joined", "data": {"user_id": 7}}"#;
                return Some(Ok(frame.to_string()));
            }
            if self.close {
                return None;
            }
            std::future::pending().await
        }
    }

    impl SocketConnector for FlakyConnector {
        type Connection = FlakyConnection;

        async fn connect(&self) -> Result<FlakyConnection, String> {
            let mut connects = self.connects.lock();
            *connects += 1;
            Ok(FlakyConnection {
                number: *connects,
                sends: 0,
                fail_send: self.fail_send,
                close: self.close,
                greet: self.greet,
                sent: Arc::clone(&self.sent),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_rejoins_new_channel_after_reconnect() {
        let connector = FlakyConnector {
            fail_send: Some(2),
            ..FlakyConnector::default()
        };
        let sent = Arc::clone(&connector.sent);
        let adapter = PushAdapter::new(connector, RetryConfig::new(3).without_jitter());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(adapter.run(input_rx, output_tx, cancel.clone()));
        let emitter = PushEmitter::new(input_tx);

        emitter.subscribe(Some(ChannelId(1)), Some(UserId(1)));
        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Signal(PushSignal::Connected))
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.lock().len(), 1);

        // The leave for channel 1 fails and drops the connection.
        emitter.subscribe(Some(ChannelId(2)), Some(UserId(1)));
        assert_eq!(
            output_rx.recv().await,
            Some(PushOutput::Signal(PushSignal::Reconnected))
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let rejoined: Vec<PushCommand> = sent
            .lock()
            .iter()
            .filter(|(number, _)| *number == 2)
            .map(|(_, frame)| serde_json::from_str(frame).unwrap())
            .collect();
        assert_eq!(
            rejoined,
            vec![PushCommand::JoinChannel {
                channel_id: ChannelId(2),
                user_id: Some(UserId(1)),
            }]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connections_that_close_at_once_exhaust_retries() {
        let connector = FlakyConnector {
            close: true,
            ..FlakyConnector::default()
        };
        let connects = Arc::clone(&connector.connects);
        let adapter = PushAdapter::new(connector, RetryConfig::new(3).without_jitter());
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();

        adapter
            .run(input_rx, output_tx, CancellationToken::new())
            .await;

        let mut signals = Vec::new();
        while let Ok(PushOutput::Signal(signal)) = output_rx.try_recv() {
            signals.push(signal);
        }
        assert_eq!(signals.first(), Some(&PushSignal::Connected));
        assert_eq!(
            signals.last(),
            Some(&PushSignal::Disconnected { attempts: 3 })
        );
        assert_eq!(*connects.lock(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_connections_keep_retrying() {
        let connector = FlakyConnector {
            greet: true,
            ..FlakyConnector::default()
        };
        let connects = Arc::clone(&connector.connects);
        let adapter = PushAdapter::new(connector, RetryConfig::new(1).without_jitter());
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(adapter.run(input_rx, output_tx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(*connects.lock() >= 3);
        while let Ok(output) = output_rx.try_recv() {
            assert!(!matches!(
                output,
                PushOutput::Signal(PushSignal::Disconnected { .. })
            ));
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn emit_fails_when_task_is_gone() {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        drop(input_rx);
        let emitter = PushEmitter::new(input_tx);
        let result = emitter
            .emit(PushCommand::LeaveChannel {
                channel_id: ChannelId(1),
            })
            .await;
        assert!(matches!(result, Err(SyncError::Transport { .. })));
    }
}
