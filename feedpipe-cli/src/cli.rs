//! CLI argument parsing using clap derive API
//!
//! This module only declares the command-line structure. It performs no I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// feedpipectl -- inspect and manage feedpipe bot queues.
///
/// Use `feedpipectl <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "feedpipectl", version, about, long_about = None)]
pub struct Cli {
    /// Path to the feedpipe.toml configuration file.
    #[arg(short, long, default_value = "feedpipe.toml")]
    pub config: PathBuf,

    /// Override the pipeline topology file (`[general] pipeline_file`).
    #[arg(long, global = true)]
    pub pipeline_file: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect or clear broker queues.
    Queues(QueuesArgs),

    /// Inspect a single bot's queues.
    Bot(BotArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- queues ----

#[derive(Args, Debug)]
pub struct QueuesArgs {
    #[command(subcommand)]
    pub action: QueuesAction,
}

#[derive(Subcommand, Debug)]
pub enum QueuesAction {
    /// List the queues of every bot in the topology with their lengths.
    List {
        /// Only show queues holding messages.
        #[arg(long)]
        non_zero: bool,

        /// Only print the total number of queued messages.
        #[arg(long)]
        count: bool,
    },
    /// Delete every message in a queue listed in the topology.
    Clear {
        /// Queue name (source, internal or destination queue).
        queue: String,
    },
    /// Find non-empty broker queues that no bot in the topology uses.
    Check {
        /// Queue to leave out of the report (repeatable).
        #[arg(long = "ignore", value_name = "QUEUE")]
        ignore: Vec<String>,
    },
}

// ---- bot ----

#[derive(Args, Debug)]
pub struct BotArgs {
    #[command(subcommand)]
    pub action: BotAction,
}

#[derive(Subcommand, Debug)]
pub enum BotAction {
    /// Look at or modify the messages around a bot.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Bot identifier from the topology file.
    pub bot_id: String,

    #[command(subcommand)]
    pub action: InspectAction,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum InspectAction {
    /// Show the next message in the bot's source queue without removing it.
    Get,
    /// Remove and show the next message in the bot's source queue.
    Pop,
    /// Send a message to the bot's destination queues.
    Send {
        /// Raw message body (usually a JSON event).
        message: String,
    },
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration and topology files and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, pipeline, bot).
        #[arg(long)]
        section: Option<String>,
    },
}
