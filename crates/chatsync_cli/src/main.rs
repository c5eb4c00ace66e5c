//! chatsync CLI
//!
//! Command-line chat client for a chatsync server.
//!
//! # Commands
//!
//! - `whoami` - Show the signed-in user
//! - `channels` - List channels
//! - `messages` - List a channel's messages
//! - `create-channel` / `delete-channel` - Manage channels
//! - `post` / `delete` - Post or delete a message
//! - `react` - Add or remove a reaction
//! - `watch` - Follow channels live and chat from stdin
//! - `logout` - End the server session

mod commands;

use chatsync_engine::{SyncConfig, TransportMode};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Chat from the terminal.
#[derive(Parser)]
#[command(name = "chatsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(
        global = true,
        short,
        long,
        env = "CHATSYNC_SERVER",
        default_value = "http://localhost:5000"
    )]
    server: String,

    /// Session cookie value, e.g. `session=...`
    #[arg(global = true, long, env = "CHATSYNC_SESSION", hide_env_values = true)]
    session: Option<String>,

    /// Request timeout in seconds
    #[arg(global = true, long, env = "CHATSYNC_TIMEOUT", default_value = "30")]
    timeout: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for listings.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Format {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON document
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the signed-in user
    Whoami,

    /// List channels
    Channels {
        /// Only channels created after this timestamp
        #[arg(short, long)]
        after: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },

    /// List a channel's messages
    Messages {
        /// Channel ID
        channel: i64,

        /// Only messages created after this timestamp
        #[arg(short, long)]
        after: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },

    /// Create a channel
    CreateChannel {
        /// Channel name
        name: String,
    },

    /// Rename a channel
    RenameChannel {
        /// Channel ID
        channel: i64,
        /// New name
        name: String,
    },

    /// Delete a channel you created
    DeleteChannel {
        /// Channel ID
        channel: i64,
    },

    /// Post a message
    Post {
        /// Channel ID
        channel: i64,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },

    /// Delete a message you wrote
    Delete {
        /// Channel ID
        channel: i64,

        /// Message ID
        message: i64,
    },

    /// Add or remove a reaction
    React {
        /// Message ID
        message: i64,

        /// Emoji
        emoji: String,

        /// Remove the reaction instead of adding it
        #[arg(short, long)]
        remove: bool,
    },

    /// Follow channels live and chat from stdin
    Watch {
        /// Channel to open on start
        #[arg(short, long)]
        channel: Option<i64>,

        /// Use the push socket instead of polling
        #[arg(long, env = "CHATSYNC_PUSH")]
        push: bool,

        /// Socket URL, derived from the server URL when omitted
        #[arg(long, env = "CHATSYNC_SOCKET_URL")]
        socket_url: Option<String>,

        /// Poll interval in milliseconds
        #[arg(short, long, default_value = "2000")]
        interval: u64,
    },

    /// End the server session
    Logout,

    /// Show version information
    Version,
}

impl Cli {
    fn config(&self) -> SyncConfig {
        let mut config =
            SyncConfig::new(self.server.clone()).with_timeout(Duration::from_secs(self.timeout));
        if let Some(session) = &self.session {
            config = config.with_session_cookie(session.clone());
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config();

    match cli.command {
        Commands::Whoami => commands::account::whoami(&config).await?,
        Commands::Channels { after, format } => {
            commands::channels::list(&config, after.as_deref(), format).await?
        }
        Commands::Messages {
            channel,
            after,
            format,
        } => commands::messages::list(&config, channel, after.as_deref(), format).await?,
        Commands::CreateChannel { name } => commands::channels::create(&config, &name).await?,
        Commands::RenameChannel { channel, name } => {
            commands::channels::rename(&config, channel, &name).await?
        }
        Commands::DeleteChannel { channel } => {
            commands::channels::delete(&config, channel).await?
        }
        Commands::Post { channel, content } => {
            commands::messages::post(&config, channel, &content.join(" ")).await?
        }
        Commands::Delete { channel, message } => {
            commands::messages::delete(&config, channel, message).await?
        }
        Commands::React {
            message,
            emoji,
            remove,
        } => commands::messages::react(&config, message, &emoji, remove).await?,
        Commands::Watch {
            channel,
            push,
            socket_url,
            interval,
        } => {
            let mut config = config
                .with_poll_interval(Duration::from_millis(interval))
                .with_mode(if push {
                    TransportMode::Push
                } else {
                    TransportMode::Polling
                });
            if let Some(url) = socket_url {
                config = config.with_socket_url(url);
            }
            commands::watch::run(config, channel).await?
        }
        Commands::Logout => commands::account::logout(&config).await?,
        Commands::Version => {
            println!("chatsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
