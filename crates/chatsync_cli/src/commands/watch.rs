//! Live chat session.
//!
//! Prints view mutations as they arrive and reads chat input from stdin.
//! Plain lines are posted to the open channel; lines starting with `/` are
//! commands (see [`HELP`]).

use super::{channel_line, message_line, reaction_summary, CommandResult};
use chatsync_engine::{EngineEvent, EngineHandle, SyncConfig, SyncEngine, SyncSignal, ViewMutation};
use chatsync_protocol::{ChannelId, MessageId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

const HELP: &str = "\
/join <channel>        open a channel
/create <name>         create a channel
/rename <name>         rename the open channel
/drop <channel>        delete a channel you created
/react <message> <emoji>  toggle a reaction
/delete <message>      delete a message you wrote
/channels              list known channels
/logout                sign out and exit
/quit                  exit";

/// Runs the watch loop until the engine stops, stdin asks to quit, or
/// Ctrl-C is pressed.
pub async fn run(config: SyncConfig, channel: Option<i64>) -> CommandResult {
    let (handle, mut events) = SyncEngine::connect(config)?.spawn();
    if let Some(channel) = channel {
        handle.select_channel(ChannelId(channel)).await?;
    }

    let mut session = Session {
        handle: handle.clone(),
        selected: None,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::Signal(SyncSignal::Stopped)) | None => break,
                Some(event) => session.render(event),
            },

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => session.input(line.trim()).await,
                Ok(None) => {
                    debug!("stdin closed; still watching");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => handle.shutdown(),
        }
    }

    handle.stopped().await;
    Ok(())
}

struct Session {
    handle: EngineHandle,
    selected: Option<ChannelId>,
}

impl Session {
    fn render(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::View(mutations) => mutations.into_iter().for_each(|m| self.render_view(m)),
            EngineEvent::Signal(signal) => render_signal(signal),
        }
    }

    fn render_view(&mut self, mutation: ViewMutation) {
        match mutation {
            ViewMutation::ChannelInserted(channel) => println!("+ {}", channel_line(&channel)),
            ViewMutation::ChannelUpdated(channel) => println!("~ {}", channel_line(&channel)),
            ViewMutation::ChannelRemoved(id) => println!("- channel #{id} deleted"),
            ViewMutation::MessageInserted(message) => println!("{}", message_line(&message)),
            ViewMutation::MessageUpdated(message) => {
                let summary = reaction_summary(&message);
                if summary.is_empty() {
                    println!("  ~ {} no reactions", message.id);
                } else {
                    println!("  ~ {} {summary}", message.id);
                }
            }
            ViewMutation::MessageRemoved(id) => println!("  - message {id} deleted"),
            ViewMutation::SelectionChanged(id) => {
                self.selected = Some(id);
                println!("== channel #{id} ==");
            }
            ViewMutation::SelectionCleared => {
                self.selected = None;
                println!("== no channel open; /join <channel> ==");
            }
        }
    }

    async fn input(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if let Err(e) = self.execute(line).await {
            eprintln!("error: {e}");
        }
    }

    async fn execute(&mut self, line: &str) -> CommandResult {
        let Some(command) = line.strip_prefix('/') else {
            let channel = self.selected.ok_or("no channel open; /join <channel> first")?;
            self.handle.post_message(channel, line).await?;
            return Ok(());
        };

        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match name {
            "join" => {
                let channel = rest.parse().map_err(|_| "usage: /join <channel>")?;
                self.handle.select_channel(ChannelId(channel)).await?;
            }
            "create" => {
                let channel = self.handle.create_channel(rest).await?;
                println!("created {}", channel_line(&channel));
            }
            "rename" => {
                let channel = self.selected.ok_or("no channel open")?;
                self.handle.rename_channel(channel, rest).await?;
            }
            "drop" => {
                let channel = rest.parse().map_err(|_| "usage: /drop <channel>")?;
                self.handle.delete_channel(ChannelId(channel)).await?;
            }
            "react" => {
                let (message, emoji) = rest
                    .split_once(char::is_whitespace)
                    .ok_or("usage: /react <message> <emoji>")?;
                let message = message.parse().map_err(|_| "usage: /react <message> <emoji>")?;
                self.handle
                    .toggle_reaction(MessageId(message), emoji.trim())
                    .await?;
            }
            "delete" => {
                let channel = self.selected.ok_or("no channel open")?;
                let message = rest.parse().map_err(|_| "usage: /delete <message>")?;
                self.handle
                    .delete_message(channel, MessageId(message))
                    .await?;
            }
            "channels" => {
                let view = self.handle.snapshot().await?;
                for channel in view.channels() {
                    let marker = if Some(channel.id) == view.selected() { "*" } else { " " };
                    println!("{marker} {}", channel_line(channel));
                }
            }
            "logout" => self.handle.sign_out().await?,
            "quit" | "exit" => self.handle.shutdown(),
            "help" => println!("{HELP}"),
            other => return Err(format!("unknown command /{other}; try /help").into()),
        }
        Ok(())
    }
}

fn render_signal(signal: SyncSignal) {
    match signal {
        SyncSignal::Identified(user) => match user.email {
            Some(email) => println!("* signed in as {email}"),
            None => println!("* signed in"),
        },
        SyncSignal::Unauthenticated => {
            println!("* session is not authenticated; sign in again, then restart (/quit)")
        }
        SyncSignal::Error(err) if err.is_retryable() => eprintln!("* sync error: {err}; retrying"),
        SyncSignal::Error(err) => eprintln!("* sync error: {err}"),
        SyncSignal::Connected => println!("* connected"),
        SyncSignal::Reconnected => println!("* reconnected; catching up"),
        SyncSignal::Joined(id) => debug!(channel_id = %id, "subscribed"),
        SyncSignal::ServerMessage(message) => eprintln!("* server: {message}"),
        SyncSignal::UserJoined(user) => println!("* user {user} joined"),
        SyncSignal::Disconnected { attempts } => {
            println!("* live updates lost after {attempts} attempts; messages still send over HTTP")
        }
        SyncSignal::Stopped => {}
    }
}
