//! Command-line adapter over [`Services`].
//!
//! Results are printed as JSON on stdout. Failures print a JSON object with
//! the error code and suggested action, plus a styled line on stderr.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use chatgate::api::ApiError;
use chatgate::chat::ChatError;
use chatgate::config::Config;
use chatgate::error::ErrorCode;
use chatgate::services::{NotReadyError, Services};

#[derive(Parser)]
#[command(name = "chatgate")]
#[command(about = "Rate-limited chat and REST access for live streaming channels")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Join a channel and print what is said for a while
    Observe {
        channel: String,
        /// Observation window in seconds
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },

    /// Send a chat message (requires TWITCH_USERNAME and TWITCH_OAUTH_TOKEN)
    Send { channel: String, text: String },

    /// Show whether a channel is live
    Stream {
        channel: String,
        /// Fail with channel-offline instead of printing null
        #[arg(long)]
        live: bool,
    },

    /// Show live status for several channels at once
    Streams {
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Show channel details
    Channel { channel: String },

    /// List the most recent followers
    Followers {
        channel: String,
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },

    /// Show subscriber totals (requires channel:read:subscriptions)
    Subscribers { channel: String },

    /// Connect to chat and report connection, queue and service health
    Health {
        /// Join this channel before reporting
        #[arg(long)]
        channel: Option<String>,
    },
}

/// A failure carrying a machine-readable code.
#[derive(Debug, Serialize, Error)]
#[error("{message}")]
struct Failure {
    code: ErrorCode,
    message: String,
    suggested_action: &'static str,
}

impl From<ChatError> for Failure {
    fn from(e: ChatError) -> Self {
        Self {
            code: e.code(),
            suggested_action: e.suggested_action(),
            message: e.to_string(),
        }
    }
}

impl From<ApiError> for Failure {
    fn from(e: ApiError) -> Self {
        Self {
            code: e.code(),
            suggested_action: e.suggested_action(),
            message: e.to_string(),
        }
    }
}

impl From<NotReadyError> for Failure {
    fn from(e: NotReadyError) -> Self {
        Self {
            code: e.code(),
            suggested_action: e.suggested_action(),
            message: e.to_string(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_explicit(path).await?,
        None => Config::load().await?,
    };
    let services = Services::from_config(&config);

    match execute(&services, cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast::<Failure>() {
            Ok(failure) => {
                eprintln!(
                    "{} {} ({})",
                    style("error:").red().bold(),
                    failure.message,
                    style(failure.code).yellow()
                );
                eprintln!("  {}", style(failure.suggested_action).dim());
                print_json(&json!({ "error": failure }))?;
                std::process::exit(1);
            }
            Err(other) => Err(other),
        },
    }
}

async fn execute(services: &Services, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Observe { channel, seconds } => {
            let chat = services.chat.require().map_err(Failure::from)?;
            chat.start().await.map_err(Failure::from)?;
            let result = chat
                .observe_chat(&channel, Duration::from_secs(seconds))
                .await;
            chat.shutdown().await;
            print_json(&result.map_err(Failure::from)?)
        }
        Commands::Send { channel, text } => {
            let chat = services.chat.require().map_err(Failure::from)?;
            chat.start().await.map_err(Failure::from)?;
            let result = chat.send_message(&channel, &text).await;
            chat.shutdown().await;
            result.map_err(Failure::from)?;
            print_json(&json!({ "sent": true, "channel": channel }))
        }
        Commands::Stream { channel, live } => {
            let api = services.api.require().map_err(Failure::from)?;
            if live {
                print_json(&api.get_live_stream(&channel).await.map_err(Failure::from)?)
            } else {
                print_json(&api.get_stream_info(&channel).await.map_err(Failure::from)?)
            }
        }
        Commands::Streams { channels } => {
            let api = services.api.require().map_err(Failure::from)?;
            let streams = api
                .get_multiple_streams_info(&channels)
                .await
                .map_err(Failure::from)?;
            print_json(&streams)
        }
        Commands::Channel { channel } => {
            let api = services.api.require().map_err(Failure::from)?;
            print_json(&api.get_channel_info(&channel).await.map_err(Failure::from)?)
        }
        Commands::Followers { channel, count } => {
            let api = services.api.require().map_err(Failure::from)?;
            let followers = api
                .get_recent_followers(&channel, count)
                .await
                .map_err(Failure::from)?;
            print_json(&followers)
        }
        Commands::Subscribers { channel } => {
            let api = services.api.require().map_err(Failure::from)?;
            let info = api
                .get_subscriber_info(&channel)
                .await
                .map_err(Failure::from)?;
            print_json(&info)
        }
        Commands::Health { channel } => cmd_health(services, channel).await,
    }
}

async fn cmd_health(services: &Services, channel: Option<String>) -> anyhow::Result<()> {
    let chat = services.chat.require().map_err(Failure::from)?;
    let connect_error = chat.start().await.err().map(Failure::from);
    let join_error = match (&channel, &connect_error) {
        (Some(channel), None) => chat
            .observe_chat(channel, Duration::ZERO)
            .await
            .err()
            .map(Failure::from),
        _ => None,
    };

    let api_queue = services.api.require().ok().map(|api| api.queue_status());
    let report = json!({
        "services": {
            "chat": services.chat.status(),
            "api": services.api.status(),
        },
        "chat": {
            "connection": chat.get_connection_health().await,
            "send_queue": chat.get_queue_status(),
            "connect_error": connect_error,
            "join_error": join_error,
        },
        "api": { "queue": api_queue },
    });
    chat.shutdown().await;
    print_json(&report)
}
