//! Switchyard CLI entry point.
//!
//! Binary name: `syard`
//!
//! Parses CLI arguments, sets up tracing, wires config, database and the
//! gateway, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use switchyard_infra::config::resolve_data_dir;
use switchyard_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,switchyard=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: filter.to_string(),
        json: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "syard", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(resolve_data_dir(), cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Complete(args) => cli::complete::complete(&state, args, cli.json).await,
        Commands::Stream(args) => cli::complete::stream(&state, args, cli.json).await,
        Commands::Budget { user } => cli::budget::show_budget(&state, &user, cli.json).await,
        Commands::Providers { model } => {
            cli::provider::list_providers(&state, model.as_deref(), cli.json)
        }
        Commands::History { user, limit } => {
            cli::history::show_history(&state, &user, limit, cli.json).await
        }
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
