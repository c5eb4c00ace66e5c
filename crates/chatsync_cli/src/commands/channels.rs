//! Channel commands.

use super::{api, channel_line, dispatcher, parse_after, print_json, CommandResult};
use crate::Format;
use chatsync_engine::SyncConfig;
use chatsync_protocol::ChannelId;

/// Lists channels, optionally only those created after `after`.
pub async fn list(config: &SyncConfig, after: Option<&str>, format: Format) -> CommandResult {
    let after = parse_after(after)?;
    let listing = api(config)?.list_channels(after.as_ref()).await?;

    match format {
        Format::Json => print_json(&listing.batch.created)?,
        Format::Text => {
            if listing.batch.created.is_empty() {
                println!("No channels");
            }
            for channel in &listing.batch.created {
                println!("{}", channel_line(channel));
            }
            for id in &listing.batch.deleted_ids {
                println!("#{id:<5} (deleted)");
            }
        }
    }
    if !listing.skipped.is_empty() {
        eprintln!("{} malformed entries skipped", listing.skipped.len());
    }
    Ok(())
}

/// Creates a channel.
pub async fn create(config: &SyncConfig, name: &str) -> CommandResult {
    let channel = dispatcher(config)?.create_channel(name).await?;
    println!("Created {}", channel_line(&channel));
    Ok(())
}

/// Renames a channel.
pub async fn rename(config: &SyncConfig, channel: i64, name: &str) -> CommandResult {
    match dispatcher(config)?
        .rename_channel(ChannelId(channel), name)
        .await?
    {
        Some(channel) => println!("Renamed {}", channel_line(&channel)),
        None => println!("Renamed channel #{channel} to {}", name.trim()),
    }
    Ok(())
}

/// Deletes a channel.
pub async fn delete(config: &SyncConfig, channel: i64) -> CommandResult {
    dispatcher(config)?.delete_channel(ChannelId(channel)).await?;
    println!("Deleted channel #{channel}");
    Ok(())
}
