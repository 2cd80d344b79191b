//! CLI command definitions and dispatch for the `syard` binary.

pub mod budget;
pub mod complete;
pub mod display;
pub mod history;
pub mod provider;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Route LLM completions across providers with per-user budgets.
#[derive(Parser)]
#[command(name = "syard", version, about, long_about = None)]
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

    /// Gateway config file. Errors in it are fatal, unlike the default
    /// `gateway.toml` in the data directory.
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a completion and print the whole response.
    Complete(CompletionArgs),

    /// Run a completion and print chunks as they arrive. Ctrl-C cancels.
    Stream(CompletionArgs),

    /// Show a user's budget for the current window.
    Budget {
        /// User to inspect.
        #[arg(long)]
        user: String,
    },

    /// List configured providers, or the resolution order for a model.
    Providers {
        /// Show only the candidates for this model, in dispatch order.
        #[arg(long)]
        model: Option<String>,
    },

    /// Show a user's persisted completions, newest first.
    History {
        /// User to inspect.
        #[arg(long)]
        user: String,

        /// Maximum number of records.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Arguments shared by `complete` and `stream`.
#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// User the request is billed to.
    #[arg(long)]
    pub user: String,

    /// Model to request.
    #[arg(long, short)]
    pub model: String,

    /// Maximum output tokens.
    #[arg(long, default_value = "256")]
    pub max_tokens: u32,

    /// Sampling temperature (0.0 to 2.0).
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Request id (idempotency key). A UUID v7 is generated when omitted.
    #[arg(long)]
    pub request_id: Option<String>,

    /// The user message.
    pub message: String,
}
