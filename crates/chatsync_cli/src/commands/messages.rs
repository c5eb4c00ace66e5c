//! Message and reaction commands.

use super::{api, dispatcher, message_line, parse_after, print_json, CommandResult};
use crate::Format;
use chatsync_engine::{PostOutcome, SyncConfig};
use chatsync_protocol::{ChannelId, MessageId};

/// Lists a channel's messages.
pub async fn list(
    config: &SyncConfig,
    channel: i64,
    after: Option<&str>,
    format: Format,
) -> CommandResult {
    let after = parse_after(after)?;
    let listing = api(config)?
        .list_messages(ChannelId(channel), after.as_ref())
        .await?;

    match format {
        Format::Json => print_json(&listing.batch.created)?,
        Format::Text => {
            if listing.batch.created.is_empty() {
                println!("No messages");
            }
            for message in &listing.batch.created {
                println!("{}", message_line(message));
            }
        }
    }
    if !listing.skipped.is_empty() {
        eprintln!("{} malformed entries skipped", listing.skipped.len());
    }
    Ok(())
}

/// Posts a message.
pub async fn post(config: &SyncConfig, channel: i64, content: &str) -> CommandResult {
    match dispatcher(config)?
        .post_message(ChannelId(channel), content)
        .await?
    {
        PostOutcome::Message(message) => println!("{}", message_line(&message)),
        PostOutcome::Accepted(id) => println!("Posted message {id}"),
        PostOutcome::Emitted => println!("Sent"),
    }
    Ok(())
}

/// Deletes a message.
pub async fn delete(config: &SyncConfig, channel: i64, message: i64) -> CommandResult {
    dispatcher(config)?
        .delete_message(ChannelId(channel), MessageId(message))
        .await?;
    println!("Deleted message {message}");
    Ok(())
}

/// Adds or removes the signed-in user's reaction.
pub async fn react(config: &SyncConfig, message: i64, emoji: &str, remove: bool) -> CommandResult {
    let dispatcher = dispatcher(config)?;
    let state = if remove {
        dispatcher.unreact(MessageId(message), emoji).await?
    } else {
        dispatcher.react(MessageId(message), emoji).await?
    };
    match state {
        Some(state) => {
            let summary = state
                .reactions
                .iter()
                .map(|(emoji, reaction)| format!("{emoji} {}", reaction.count()))
                .collect::<Vec<_>>()
                .join(" ");
            println!("Message {}: {summary}", state.message_id);
        }
        None => println!("OK"),
    }
    Ok(())
}
