//! `history` command: persisted completions, newest first.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use switchyard_infra::llm::pricing::format_cost;
use switchyard_types::record::{CompletionRecord, CompletionStatus};

use super::display::{format_tokens_human, preview};
use crate::state::AppState;

pub async fn show_history(state: &AppState, user: &str, limit: u32, json: bool) -> Result<()> {
    let records = state.completions.recent(user, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  {}", style(format!("No completions recorded for {user}.")).dim());
        println!();
        return Ok(());
    }

    println!("{}", history_table(&records));
    Ok(())
}

fn status_color(status: CompletionStatus) -> Color {
    match status {
        CompletionStatus::Completed => Color::Green,
        CompletionStatus::Interrupted => Color::Yellow,
        CompletionStatus::Cancelled => Color::DarkGrey,
    }
}

fn history_table(records: &[CompletionRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("When"),
            Cell::new("Request"),
            Cell::new("Model"),
            Cell::new("Provider"),
            Cell::new("Status"),
            Cell::new("Tokens"),
            Cell::new("Cost"),
            Cell::new("Text"),
        ]);

    for record in records {
        table.add_row(vec![
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&record.request_id),
            Cell::new(&record.model),
            Cell::new(&record.provider).fg(Color::Cyan),
            Cell::new(record.status).fg(status_color(record.status)),
            Cell::new(format_tokens_human(record.usage.total())),
            Cell::new(format_cost(record.cost_usd)),
            Cell::new(preview(&record.text, 40)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::llm::{CompletionRequest, Usage};

    #[test]
    fn table_shows_status_and_preview() {
        let mut request = CompletionRequest::new("alice", "sim-1", "hi", 64);
        request.request_id = Some("req-1".to_string());
        let record = CompletionRecord::new(
            &request,
            "backup",
            "partial answer\nsecond line",
            CompletionStatus::Interrupted,
            Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
            0.0,
        );

        let rendered = history_table(&[record]).to_string();
        assert!(rendered.contains("req-1"));
        assert!(rendered.contains("backup"));
        assert!(rendered.contains("interrupted"));
        assert!(rendered.contains("partial answer"));
    }
}
