//! `budget` command: the caller's usage in the current window.

use anyhow::Result;
use console::style;

use super::display::render_usage;
use crate::state::AppState;

pub async fn show_budget(state: &AppState, user: &str, json: bool) -> Result<()> {
    let snapshot = state.gateway.ledger().snapshot(user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let token_limit = snapshot
        .tokens_remaining
        .map(|remaining| snapshot.tokens_used + remaining);
    let request_limit = snapshot
        .requests_remaining
        .map(|remaining| u64::from(snapshot.requests_used + remaining));

    println!();
    println!(
        "  {} {}",
        style(&snapshot.user_id).bold(),
        style(format!("({} tier)", snapshot.tier)).dim()
    );
    println!("  Tokens:   {}", render_usage(snapshot.tokens_used, token_limit));
    println!(
        "  Requests: {}",
        render_usage(u64::from(snapshot.requests_used), request_limit)
    );
    println!(
        "  Resets:   {}",
        style(snapshot.window_reset_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
    );
    println!();
    Ok(())
}
