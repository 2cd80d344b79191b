//! `complete` and `stream` commands.

use std::io::Write;

use anyhow::Result;
use console::style;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchyard_core::relay::{RelayEvent, StreamSummary};
use switchyard_types::llm::{CompletionRequest, CompletionResult};

use super::CompletionArgs;
use super::display::{gateway_failure, render_completion_footer};
use crate::state::AppState;

/// Build the request, assigning a request id up front so failures can name it.
fn build_request(args: CompletionArgs, stream: bool) -> CompletionRequest {
    let mut request = CompletionRequest::new(args.user, args.model, args.message, args.max_tokens);
    request.temperature = args.temperature;
    request.stream = stream;
    request.request_id = Some(
        args.request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
    );
    request
}

/// Cancel `token` on Ctrl-C. Installed before dispatch so an interrupt
/// while waiting for a provider still releases the reservation.
fn cancel_on_interrupt() -> (CancellationToken, JoinHandle<()>) {
    let token = CancellationToken::new();
    let cancel = token.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    (token, interrupt)
}

/// Run a completion to the end and print it.
///
/// Ctrl-C abandons the call; nothing is billed.
pub async fn complete(state: &AppState, args: CompletionArgs, json: bool) -> Result<()> {
    let request = build_request(args, false);
    let request_id = request.id().to_string();

    let (cancel, interrupt) = cancel_on_interrupt();
    let result = state.gateway.complete_with_cancel(request, cancel).await;
    interrupt.abort();
    let result = result.map_err(|err| gateway_failure(&err, &request_id, json))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print_result(&result);
    Ok(())
}

fn print_result(result: &CompletionResult) {
    if let Some(warning) = &result.failover_warning {
        eprintln!("  {} {}", style("!").yellow().bold(), style(warning).yellow());
    }
    println!("{}", result.content);
    println!();
    println!(
        "{}",
        render_completion_footer(&result.provider, &result.usage, result.cost_usd)
    );
}

/// Stream a completion, printing chunks as they arrive.
///
/// Ctrl-C cancels the stream; tokens consumed so far are still billed.
pub async fn stream(state: &AppState, args: CompletionArgs, json: bool) -> Result<()> {
    let request = build_request(args, true);
    let request_id = request.id().to_string();

    let (cancel, interrupt) = cancel_on_interrupt();
    let opened = state.gateway.stream_complete_with_cancel(request, cancel).await;
    let (mut events, handle) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            interrupt.abort();
            return Err(gateway_failure(&err, &request_id, json));
        }
    };

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        // Terminal events are reported from the handle's outcome below.
        if let RelayEvent::Chunk(chunk) = event {
            if json {
                let line = serde_json::json!({
                    "type": "chunk",
                    "sequence": chunk.sequence,
                    "text": chunk.text,
                });
                writeln!(stdout, "{line}")?;
            } else {
                write!(stdout, "{}", chunk.text)?;
                stdout.flush()?;
            }
        }
    }
    interrupt.abort();

    match handle.outcome().await {
        Ok(summary) => {
            print_summary(&summary, json)?;
            Ok(())
        }
        Err(err) => {
            if !json {
                println!();
            }
            Err(gateway_failure(&err, &request_id, json))
        }
    }
}

fn print_summary(summary: &StreamSummary, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({ "type": "finished", "summary": summary });
        println!("{line}");
        return Ok(());
    }

    println!();
    if let Some(warning) = &summary.failover_warning {
        eprintln!("  {} {}", style("!").yellow().bold(), style(warning).yellow());
    }
    println!();
    println!(
        "{}",
        render_completion_footer(&summary.provider, &summary.usage, summary.cost_usd)
    );
    Ok(())
}
