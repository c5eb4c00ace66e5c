//! The sync driver.
//!
//! One task owns the [`SyncSession`] and applies every result, so sync logic
//! never runs in parallel. Polls and actions run as spawned futures whose
//! completions are fed back into the driver loop; the only shared state is
//! the lifecycle state and statistics read by [`EngineHandle`].

use crate::config::{SyncConfig, TransportMode};
use crate::dispatcher::{ActionDispatcher, PostOutcome};
use crate::error::{SyncError, SyncResult};
use crate::http::{ChatApi, HttpClient, ReqwestClient};
use crate::polling::{PollOutcome, PollingAdapter};
use crate::push::{PushAdapter, PushEmitter, PushOutput, PushSignal, SocketConnector, WsConnector};
use crate::reconciler::{Origin, ReactionIntent, ViewMutation, ViewState};
use crate::session::{MessageTag, SyncSession};
use crate::state::{SyncState, SyncStats};
use chatsync_protocol::{
    Batch, Channel, ChannelId, CurrentUser, Entity, Message, MessageId, ReactionState, UserId,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notifications about the sync lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    /// The signed-in user is known.
    Identified(CurrentUser),
    /// The session is not authenticated; syncing is suspended.
    Unauthenticated,
    /// A non-fatal sync failure. Syncing continues.
    Error(SyncError),
    /// The push socket connected.
    Connected,
    /// The push socket reconnected; missed changes are being fetched.
    Reconnected,
    /// The server confirmed the channel subscription.
    Joined(ChannelId),
    /// The server rejected a socket command.
    ServerMessage(String),
    /// Another user joined the selected channel.
    UserJoined(UserId),
    /// Push reconnects were exhausted.
    Disconnected {
        /// Attempts made.
        attempts: u32,
    },
    /// The engine stopped. No further events follow.
    Stopped,
}

/// Output of a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// View changes, in application order.
    View(Vec<ViewMutation>),
    /// A lifecycle notification.
    Signal(SyncSignal),
}

type Reply<T> = oneshot::Sender<SyncResult<T>>;

enum Command {
    Select(ChannelId, Reply<()>),
    CreateChannel(String, Reply<Channel>),
    RenameChannel(ChannelId, String, Reply<()>),
    DeleteChannel(ChannelId, Reply<()>),
    PostMessage(ChannelId, String, Reply<PostOutcome>),
    DeleteMessage(ChannelId, MessageId, Reply<()>),
    Reaction {
        message_id: MessageId,
        emoji: String,
        intent: Option<ReactionIntent>,
        reply: Reply<ReactionIntent>,
    },
    SignOut(Reply<()>),
    Snapshot(oneshot::Sender<ViewState>),
}

enum Completion {
    ChannelPoll(PollOutcome<Channel>),
    MessagePoll(MessageTag, PollOutcome<Message>),
    Identity(SyncResult<CurrentUser>),
    ChannelCreated(SyncResult<Channel>, Reply<Channel>),
    ChannelRenamed(ChannelId, String, SyncResult<Option<Channel>>, Reply<()>),
    ChannelDeleted(ChannelId, SyncResult<()>, Reply<()>),
    MessagePosted(ChannelId, SyncResult<PostOutcome>, Reply<PostOutcome>),
    MessageDeleted(ChannelId, MessageId, SyncResult<()>, Reply<()>),
    Reacted {
        message_id: MessageId,
        emoji: String,
        intent: ReactionIntent,
        optimistic: bool,
        result: SyncResult<Option<ReactionState>>,
        reply: Reply<ReactionIntent>,
    },
    SignedOut(SyncResult<()>, Reply<()>),
}

/// A configured engine, ready to be spawned.
pub struct SyncEngine<C: HttpClient, S: SocketConnector = WsConnector> {
    config: SyncConfig,
    client: C,
    connector: Option<S>,
}

impl SyncEngine<ReqwestClient, WsConnector> {
    /// Builds an engine talking to a real server, in the configured mode.
    pub fn connect(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let client = ReqwestClient::new(&config)?;
        let connector = match config.mode {
            TransportMode::Polling => None,
            TransportMode::Push => Some(WsConnector::new(
                config.socket_endpoint(),
                config.session_cookie.clone(),
            )),
        };
        Ok(Self {
            config,
            client,
            connector,
        })
    }
}

impl<C: HttpClient> SyncEngine<C, WsConnector> {
    /// Builds a polling engine.
    pub fn polling(config: SyncConfig, client: C) -> SyncResult<Self> {
        let config = config.with_mode(TransportMode::Polling);
        config.validate()?;
        Ok(Self {
            config,
            client,
            connector: None,
        })
    }
}

impl<C: HttpClient, S: SocketConnector> SyncEngine<C, S> {
    /// Builds a push engine.
    pub fn push(config: SyncConfig, client: C, connector: S) -> SyncResult<Self> {
        let config = config.with_mode(TransportMode::Push);
        config.validate()?;
        Ok(Self {
            config,
            client,
            connector: Some(connector),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Starts the driver on the current Tokio runtime.
    ///
    /// Returns a handle for actions and the stream of view mutations and
    /// signals. The stream ends after [`SyncSignal::Stopped`].
    pub fn spawn(self) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let state = Arc::new(RwLock::new(SyncState::Running));
        let stats = Arc::new(RwLock::new(SyncStats::default()));

        let api = ChatApi::new(self.client);
        let mut dispatcher = ActionDispatcher::new(api.clone());

        let push = match self.connector {
            Some(connector) => {
                let (input_tx, input_rx) = mpsc::unbounded_channel();
                let (output_tx, output_rx) = mpsc::unbounded_channel();
                let push_cancel = cancel.child_token();
                let adapter = PushAdapter::new(connector, self.config.reconnect.clone());
                tokio::spawn(adapter.run(input_rx, output_tx, push_cancel.clone()));

                let emitter = PushEmitter::new(input_tx);
                dispatcher = dispatcher.with_push(emitter.clone());
                Some(PushLink {
                    emitter,
                    outputs: output_rx,
                    cancel: push_cancel,
                    subscribed: None,
                    subscribed_as: None,
                })
            }
            None => None,
        };

        let driver = Driver {
            polling: PollingAdapter::new(api),
            dispatcher,
            session: SyncSession::new(),
            tasks: JoinSet::new(),
            events: event_tx,
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
            channel_in_flight: false,
            message_in_flight: None,
            identity_in_flight: false,
            push,
        };

        let channel_timer = ticker(self.config.channel_poll_interval);
        let message_timer = ticker(self.config.message_poll_interval);
        let stopped_signal = stopped.clone();
        tokio::spawn(async move {
            driver.run(command_rx, channel_timer, message_timer).await;
            stopped_signal.cancel();
        });

        info!(mode = ?self.config.mode, base_url = %self.config.base_url, "sync engine started");

        let handle = EngineHandle {
            commands: command_tx,
            cancel,
            stopped,
            state,
            stats,
        };
        (handle, event_rx)
    }
}

fn ticker(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SyncError::Cancelled)?;
        response.await.map_err(|_| SyncError::Cancelled)?
    }

    /// Selects a channel and starts its message stream.
    pub async fn select_channel(&self, channel_id: ChannelId) -> SyncResult<()> {
        self.request(|reply| Command::Select(channel_id, reply))
            .await
    }

    /// Creates a channel.
    pub async fn create_channel(&self, name: impl Into<String>) -> SyncResult<Channel> {
        let name = name.into();
        self.request(|reply| Command::CreateChannel(name, reply))
            .await
    }

    /// Renames a channel.
    pub async fn rename_channel(
        &self,
        channel_id: ChannelId,
        name: impl Into<String>,
    ) -> SyncResult<()> {
        let name = name.into();
        self.request(|reply| Command::RenameChannel(channel_id, name, reply))
            .await
    }

    /// Deletes a channel.
    pub async fn delete_channel(&self, channel_id: ChannelId) -> SyncResult<()> {
        self.request(|reply| Command::DeleteChannel(channel_id, reply))
            .await
    }

    /// Posts a message to a channel.
    pub async fn post_message(
        &self,
        channel_id: ChannelId,
        content: impl Into<String>,
    ) -> SyncResult<PostOutcome> {
        let content = content.into();
        self.request(|reply| Command::PostMessage(channel_id, content, reply))
            .await
    }

    /// Deletes a message.
    pub async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> SyncResult<()> {
        self.request(|reply| Command::DeleteMessage(channel_id, message_id, reply))
            .await
    }

    /// Reacts if the signed-in user has not reacted with `emoji`, otherwise
    /// unreacts. Returns what was done.
    pub async fn toggle_reaction(
        &self,
        message_id: MessageId,
        emoji: impl Into<String>,
    ) -> SyncResult<ReactionIntent> {
        self.reaction(message_id, emoji.into(), None).await
    }

    /// Adds the signed-in user's reaction.
    pub async fn react(&self, message_id: MessageId, emoji: impl Into<String>) -> SyncResult<()> {
        self.reaction(message_id, emoji.into(), Some(ReactionIntent::React))
            .await
            .map(drop)
    }

    /// Removes the signed-in user's reaction.
    pub async fn unreact(&self, message_id: MessageId, emoji: impl Into<String>) -> SyncResult<()> {
        self.reaction(message_id, emoji.into(), Some(ReactionIntent::Unreact))
            .await
            .map(drop)
    }

    async fn reaction(
        &self,
        message_id: MessageId,
        emoji: String,
        intent: Option<ReactionIntent>,
    ) -> SyncResult<ReactionIntent> {
        self.request(|reply| Command::Reaction {
            message_id,
            emoji,
            intent,
            reply,
        })
        .await
    }

    /// Signs out on the server, then stops the engine.
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.request(Command::SignOut).await
    }

    /// Returns a copy of the current view.
    pub async fn snapshot(&self) -> SyncResult<ViewState> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .map_err(|_| SyncError::Cancelled)?;
        response.await.map_err(|_| SyncError::Cancelled)
    }

    /// Stops the engine. In-flight work is abandoned.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits until the driver has exited.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }
}

struct PushLink {
    emitter: PushEmitter,
    outputs: mpsc::UnboundedReceiver<PushOutput>,
    cancel: CancellationToken,
    subscribed: Option<ChannelId>,
    subscribed_as: Option<UserId>,
}

struct Driver<C: HttpClient> {
    polling: PollingAdapter<C>,
    dispatcher: ActionDispatcher<C>,
    session: SyncSession,
    tasks: JoinSet<Completion>,
    events: mpsc::UnboundedSender<EngineEvent>,
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
    cancel: CancellationToken,
    channel_in_flight: bool,
    message_in_flight: Option<MessageTag>,
    identity_in_flight: bool,
    push: Option<PushLink>,
}

impl<C: HttpClient> Driver<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut channel_timer: Interval,
        mut message_timer: Interval,
    ) {
        let polling = self.push.is_none();
        self.spawn_identity();
        if !polling {
            self.spawn_channel_poll();
        }

        loop {
            let live = self.is_live();
            let identity_pending = self.session.user_id().is_none();
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut message_timer),
                    None => break,
                },

                Some(joined) = self.tasks.join_next() => match joined {
                    Ok(completion) => self.handle_completion(completion),
                    Err(e) => warn!(error = %e, "sync task failed"),
                },

                Some(output) = next_push(&mut self.push) => self.handle_push(output),

                _ = channel_timer.tick(), if live && (polling || identity_pending) => {
                    if polling {
                        self.spawn_channel_poll();
                    } else {
                        self.spawn_identity();
                    }
                }

                _ = message_timer.tick(), if polling && live => {
                    self.spawn_message_poll();
                }
            }
        }

        self.tasks.abort_all();
        self.cancel.cancel();
        self.set_state(SyncState::Stopped);
        info!("sync engine stopped");
        self.emit(EngineEvent::Signal(SyncSignal::Stopped));
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn emit_view(&self, mutations: Vec<ViewMutation>) {
        if mutations.is_empty() {
            return;
        }
        self.stats.write().mutations_applied += mutations.len() as u64;
        self.emit(EngineEvent::View(mutations));
    }

    fn signal(&self, signal: SyncSignal) {
        self.emit(EngineEvent::Signal(signal));
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn is_live(&self) -> bool {
        self.state.read().accepts_actions()
    }

    fn record_error(&self, err: &SyncError) {
        self.stats.write().last_error = Some(err.to_string());
    }

    fn spawn_task(&mut self, task: impl Future<Output = Completion> + Send + 'static) {
        self.tasks.spawn(task);
    }

    /// Fetches the signed-in user unless it is known or being fetched.
    fn spawn_identity(&mut self) {
        if self.identity_in_flight || self.session.user_id().is_some() {
            return;
        }
        self.identity_in_flight = true;
        let dispatcher = self.dispatcher.clone();
        self.spawn_task(async move { Completion::Identity(dispatcher.current_user().await) });
    }

    fn spawn_channel_poll(&mut self) {
        self.spawn_identity();
        if self.channel_in_flight {
            debug!("channel poll still in flight");
            return;
        }
        self.channel_in_flight = true;
        let polling = self.polling.clone();
        let after = self.session.cursors().channels.get().cloned();
        self.spawn_task(async move { Completion::ChannelPoll(polling.poll_channels(after).await) });
    }

    fn spawn_message_poll(&mut self) {
        let Some(tag) = self.session.message_tag() else {
            return;
        };
        if self.message_in_flight == Some(tag) {
            debug!(channel_id = %tag.channel_id, "message poll still in flight");
            return;
        }
        self.message_in_flight = Some(tag);
        let polling = self.polling.clone();
        let after = self.session.cursors().messages.get().cloned();
        self.spawn_task(async move {
            Completion::MessagePoll(tag, polling.poll_messages(tag.channel_id, after).await)
        });
    }

    /// Stops timers and the push subscription after losing authentication.
    fn suspend(&mut self) {
        if *self.state.read() == SyncState::Suspended {
            return;
        }
        warn!("session is not authenticated; suspending sync");
        self.set_state(SyncState::Suspended);
        self.record_error(&SyncError::Unauthenticated);
        if let Some(push) = self.push.take() {
            push.cancel.cancel();
            self.dispatcher.clear_push();
        }
        self.signal(SyncSignal::Unauthenticated);
    }

    /// Keeps the push subscription in line with the selection.
    fn sync_subscription(&mut self) {
        let selected = self.session.selected();
        let user_id = self.session.user_id();
        if let Some(push) = &mut self.push {
            if push.subscribed != selected || push.subscribed_as != user_id {
                push.subscribed = selected;
                push.subscribed_as = user_id;
                push.emitter.subscribe(selected, user_id);
            }
        }
    }

    fn handle_command(&mut self, command: Command, message_timer: &mut Interval) {
        if let Command::Snapshot(reply) = command {
            let _ = reply.send(self.session.view().clone());
            return;
        }
        if !self.is_live() {
            if let Command::SignOut(reply) = command {
                let _ = reply.send(Ok(()));
                self.cancel.cancel();
                return;
            }
            reject(command, SyncError::Unauthenticated);
            return;
        }

        match command {
            Command::Select(channel_id, reply) => {
                info!(%channel_id, "switching channel");
                let mutations = self.session.select_channel(channel_id);
                self.emit_view(mutations);
                if let Some(push) = &mut self.push {
                    let user_id = self.session.user_id();
                    push.subscribed = Some(channel_id);
                    push.subscribed_as = user_id;
                    push.emitter.subscribe(Some(channel_id), user_id);
                }
                self.spawn_message_poll();
                message_timer.reset();
                let _ = reply.send(Ok(()));
            }
            Command::CreateChannel(name, reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    let result = dispatcher.create_channel(&name).await;
                    Completion::ChannelCreated(result, reply)
                });
            }
            Command::RenameChannel(channel_id, name, reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    let result = dispatcher.rename_channel(channel_id, &name).await;
                    Completion::ChannelRenamed(channel_id, name, result, reply)
                });
            }
            Command::DeleteChannel(channel_id, reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    let result = dispatcher.delete_channel(channel_id).await;
                    Completion::ChannelDeleted(channel_id, result, reply)
                });
            }
            Command::PostMessage(channel_id, content, reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    let result = dispatcher.post_message(channel_id, &content).await;
                    Completion::MessagePosted(channel_id, result, reply)
                });
            }
            Command::DeleteMessage(channel_id, message_id, reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    let result = dispatcher.delete_message(channel_id, message_id).await;
                    Completion::MessageDeleted(channel_id, message_id, result, reply)
                });
            }
            Command::Reaction {
                message_id,
                emoji,
                intent,
                reply,
            } => self.start_reaction(message_id, emoji, intent, reply),
            Command::SignOut(reply) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn_task(async move {
                    Completion::SignedOut(dispatcher.logout().await, reply)
                });
            }
            Command::Snapshot(_) => {}
        }
    }

    fn start_reaction(
        &mut self,
        message_id: MessageId,
        emoji: String,
        intent: Option<ReactionIntent>,
        reply: Reply<ReactionIntent>,
    ) {
        let intent = match intent {
            Some(intent) => intent,
            None => match self.session.reaction_intent(message_id, &emoji) {
                Some(intent) => intent,
                None if self.session.user_id().is_none() => {
                    let _ = reply.send(Err(SyncError::ValidationFailed(
                        "the signed-in user is not known yet".into(),
                    )));
                    return;
                }
                None => {
                    let _ = reply.send(Err(SyncError::NotFound(format!(
                        "message {message_id} is not in the view"
                    ))));
                    return;
                }
            },
        };

        let optimistic = match self
            .session
            .apply_optimistic_reaction(message_id, &emoji, intent)
        {
            Some(mutation) => {
                self.emit_view(vec![mutation]);
                true
            }
            None => false,
        };

        let dispatcher = self.dispatcher.clone();
        self.spawn_task(async move {
            let result = dispatcher.apply_reaction(message_id, &emoji, intent).await;
            Completion::Reacted {
                message_id,
                emoji,
                intent,
                optimistic,
                result,
                reply,
            }
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ChannelPoll(outcome) => {
                self.channel_in_flight = false;
                self.stats.write().channel_polls += 1;
                if let Some(batch) = self.accept_poll(outcome) {
                    let mutations = self.session.apply_channels(batch, Origin::Stream);
                    self.emit_view(mutations);
                    self.sync_subscription();
                }
            }
            Completion::MessagePoll(tag, outcome) => {
                if self.message_in_flight == Some(tag) {
                    self.message_in_flight = None;
                }
                self.stats.write().message_polls += 1;
                if !self.session.is_current(tag) {
                    debug!(channel_id = %tag.channel_id, "discarding stale message poll");
                    self.stats.write().stale_discarded += 1;
                    return;
                }
                if let Some(batch) = self.accept_poll(outcome) {
                    if let Some(mutations) = self.session.apply_messages(tag, batch, Origin::Stream)
                    {
                        self.emit_view(mutations);
                    }
                }
            }
            Completion::Identity(result) => match result {
                Ok(user) if user.is_authenticated => {
                    self.identity_in_flight = false;
                    info!(user_id = ?user.id, "signed in");
                    self.dispatcher.set_user(user.id);
                    self.session.set_user(user.clone());
                    self.sync_subscription();
                    self.signal(SyncSignal::Identified(user));
                }
                Ok(_) | Err(SyncError::Unauthenticated) => {
                    self.identity_in_flight = false;
                    self.suspend();
                }
                Err(err) => {
                    self.identity_in_flight = false;
                    warn!(error = %err, "failed to fetch the signed-in user; will retry");
                    self.record_error(&err);
                    self.signal(SyncSignal::Error(err));
                }
            },
            Completion::ChannelCreated(result, reply) => {
                if let Ok(channel) = &result {
                    let mutations = self
                        .session
                        .apply_channels(Batch::created(vec![channel.clone()]), Origin::Action);
                    self.emit_view(mutations);
                }
                self.finish_action(result, reply);
            }
            Completion::ChannelRenamed(channel_id, name, result, reply) => {
                if let Ok(echoed) = &result {
                    let renamed = echoed.clone().or_else(|| {
                        let mut channel = self.session.view().channel(channel_id)?.clone();
                        channel.name = Some(name.trim().to_string());
                        Some(channel)
                    });
                    if let Some(channel) = renamed {
                        let mutations = self
                            .session
                            .apply_channels(Batch::updated(channel), Origin::Action);
                        self.emit_view(mutations);
                    }
                }
                self.finish_action(result.map(drop), reply);
            }
            Completion::ChannelDeleted(channel_id, result, reply) => {
                if result.is_ok() {
                    let mutations = self
                        .session
                        .apply_channels(Batch::deleted(channel_id), Origin::Action);
                    self.emit_view(mutations);
                    self.sync_subscription();
                }
                self.finish_action(result, reply);
            }
            Completion::MessagePosted(channel_id, result, reply) => {
                if let Ok(PostOutcome::Message(message)) = &result {
                    let mutations = self
                        .session
                        .apply_message_action(channel_id, Batch::created(vec![message.clone()]));
                    self.emit_view(mutations);
                }
                self.finish_action(result, reply);
            }
            Completion::MessageDeleted(channel_id, message_id, result, reply) => {
                if result.is_ok() {
                    let mutations = self
                        .session
                        .apply_message_action(channel_id, Batch::deleted(message_id));
                    self.emit_view(mutations);
                }
                self.finish_action(result, reply);
            }
            Completion::Reacted {
                message_id,
                emoji,
                intent,
                optimistic,
                result,
                reply,
            } => {
                let mutation = match &result {
                    Ok(Some(state)) => self.session.apply_reactions(state.clone()),
                    Ok(None) => None,
                    Err(_) if optimistic => {
                        self.session
                            .apply_optimistic_reaction(message_id, &emoji, intent.inverse())
                    }
                    Err(_) => None,
                };
                if let Some(mutation) = mutation {
                    self.emit_view(vec![mutation]);
                }
                self.finish_action(result.map(|_| intent), reply);
            }
            Completion::SignedOut(result, reply) => {
                let _ = reply.send(result);
                self.cancel.cancel();
            }
        }
    }

    fn accept_poll<E: Entity>(
        &mut self,
        outcome: PollOutcome<E>,
    ) -> Option<Batch<E>> {
        match outcome {
            PollOutcome::Batch(decoded) => {
                let mut stats = self.stats.write();
                stats.entities_skipped += decoded.skipped.len() as u64;
                stats.last_sync_time = Some(Instant::now());
                Some(decoded.batch)
            }
            PollOutcome::Unauthenticated => {
                self.suspend();
                None
            }
            PollOutcome::Failed(err) => {
                {
                    let mut stats = self.stats.write();
                    stats.poll_failures += 1;
                    stats.last_error = Some(err.to_string());
                }
                self.signal(SyncSignal::Error(err));
                None
            }
        }
    }

    fn finish_action<T>(&mut self, result: SyncResult<T>, reply: Reply<T>) {
        if let Err(err) = &result {
            debug!(error = %err, "action failed");
            self.record_error(err);
            if *err == SyncError::Unauthenticated {
                self.suspend();
            }
        }
        let _ = reply.send(result);
    }

    fn handle_push(&mut self, output: PushOutput) {
        match output {
            PushOutput::Event(event) => {
                self.stats.write().push_events += 1;
                let mutations = self.session.apply_remote(event);
                self.emit_view(mutations);
                self.sync_subscription();
            }
            PushOutput::Signal(signal) => match signal {
                PushSignal::Connected => self.signal(SyncSignal::Connected),
                PushSignal::Reconnected => {
                    self.stats.write().reconnects += 1;
                    self.spawn_identity();
                    self.signal(SyncSignal::Reconnected);
                    self.spawn_channel_poll();
                    self.spawn_message_poll();
                }
                PushSignal::Joined(channel_id) => self.signal(SyncSignal::Joined(channel_id)),
                PushSignal::ServerError(message) => {
                    warn!(%message, "server rejected a socket command");
                    self.signal(SyncSignal::ServerMessage(message));
                }
                PushSignal::UserJoined(user_id) => self.signal(SyncSignal::UserJoined(user_id)),
                PushSignal::LoggedOut => self.suspend(),
                PushSignal::Disconnected { attempts } => {
                    self.push = None;
                    self.dispatcher.clear_push();
                    self.set_state(SyncState::Disconnected);
                    self.record_error(&SyncError::Disconnected { attempts });
                    self.signal(SyncSignal::Disconnected { attempts });
                }
            },
        }
    }
}

async fn next_push(push: &mut Option<PushLink>) -> Option<PushOutput> {
    match push {
        Some(link) => link.outputs.recv().await,
        None => std::future::pending().await,
    }
}

fn reject(command: Command, err: SyncError) {
    match command {
        Command::Select(_, reply)
        | Command::RenameChannel(_, _, reply)
        | Command::DeleteChannel(_, reply)
        | Command::DeleteMessage(_, _, reply)
        | Command::SignOut(reply) => {
            let _ = reply.send(Err(err));
        }
        Command::CreateChannel(_, reply) => {
            let _ = reply.send(Err(err));
        }
        Command::PostMessage(_, _, reply) => {
            let _ = reply.send(Err(err));
        }
        Command::Reaction { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Command::Snapshot(_) => {}
    }
}
