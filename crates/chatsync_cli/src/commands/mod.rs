//! CLI command implementations.

pub mod account;
pub mod channels;
pub mod messages;
pub mod watch;

use chatsync_engine::{ActionDispatcher, ChatApi, ReqwestClient, SyncConfig, SyncResult};
use chatsync_protocol::{Channel, Message, ProtocolResult, Timestamp};
use serde::Serialize;

/// Result type shared by command entry points.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Builds an API client for one-shot commands.
pub fn api(config: &SyncConfig) -> SyncResult<ChatApi<ReqwestClient>> {
    config.validate()?;
    Ok(ChatApi::new(ReqwestClient::new(config)?))
}

/// Builds a dispatcher for one-shot commands.
pub fn dispatcher(config: &SyncConfig) -> SyncResult<ActionDispatcher<ReqwestClient>> {
    Ok(ActionDispatcher::new(api(config)?))
}

/// Parses an `--after` argument.
pub fn parse_after(after: Option<&str>) -> ProtocolResult<Option<Timestamp>> {
    after.map(Timestamp::parse).transpose()
}

/// Prints a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line describing a channel.
pub fn channel_line(channel: &Channel) -> String {
    let kind = if channel.is_dm { " (dm)" } else { "" };
    format!("#{:<5} {}{kind}", channel.id, channel.display_name())
}

/// One line describing a message and its reactions.
pub fn message_line(message: &Message) -> String {
    let author = message
        .email
        .clone()
        .unwrap_or_else(|| format!("user {}", message.user_id));
    let mut line = format!(
        "[{}] {:<5} {author}: {}",
        message.created_at, message.id, message.content
    );
    let reactions = reaction_summary(message);
    if !reactions.is_empty() {
        line.push_str("  ");
        line.push_str(&reactions);
    }
    line
}

/// Reactions formatted as `👍 2 🎉 1`.
pub fn reaction_summary(message: &Message) -> String {
    message
        .reactions
        .iter()
        .filter(|(_, reaction)| !reaction.is_empty())
        .map(|(emoji, reaction)| format!("{emoji} {}", reaction.count()))
        .collect::<Vec<_>>()
        .join(" ")
}
