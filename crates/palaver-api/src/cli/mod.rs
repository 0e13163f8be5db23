//! CLI command definitions for the `palaver` binary.

pub mod chat;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Conversation orchestration engine for configured AI agents.
#[derive(Parser)]
#[command(name = "palaver", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding `config.toml`.
    #[arg(long, global = true, env = "PALAVER_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Host to bind (defaults to `[server].host`).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to `[server].port`).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message to an agent and print the reply.
    Chat {
        /// Agent id.
        #[arg(long)]
        agent: Uuid,

        /// Caller id the turn runs on behalf of.
        #[arg(long, default_value = "local")]
        caller: String,

        /// Model id overriding the agent's and caller's defaults.
        #[arg(long)]
        model: Option<String>,

        /// The message text.
        message: String,
    },
}
