//! CLI command definitions for the `parley` binary.

pub mod history;
pub mod shell;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::bot::DemoBot;

/// Conversation event store and bot dispatcher.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the TOML config file.
    #[arg(long, global = true, env = "PARLEY_CONFIG", default_value = parley_infra::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Also export tracing spans as OpenTelemetry to stdout.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Chat with the bot in this terminal.
    Shell {
        /// Continue an existing conversation instead of starting a new one.
        #[arg(long)]
        conv_id: Option<String>,

        /// Demo handler set to run.
        #[arg(long, value_enum, default_value_t)]
        bot: DemoBot,
    },

    /// Serve the configured webhook channels over HTTP.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Demo handler set to run.
        #[arg(long, value_enum, default_value_t)]
        bot: DemoBot,
    },

    /// Print the full event history of a conversation.
    History {
        /// Conversation id.
        conv_id: String,
    },

    /// Print the sessions of a conversation.
    Sessions {
        /// Conversation id.
        conv_id: String,

        /// Inactivity gap in seconds (defaults to `dispatch.session_gap_secs`).
        #[arg(long)]
        gap: Option<u64>,
    },

    /// List known conversation ids.
    #[command(alias = "ls")]
    Conversations,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
