//! Shared output formatting for CLI commands.

use console::style;
use switchyard_types::error::GatewayError;
use switchyard_types::llm::Usage;

use switchyard_infra::llm::pricing::format_cost;

/// Format a token count with thousands separators (`12,450`).
pub fn format_tokens_human(tokens: u64) -> String {
    let digits = tokens.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `used / limit` with the same 80% warning threshold as the budget view.
///
/// Unlimited quotas render as `used / ∞`.
pub fn render_usage(used: u64, limit: Option<u64>) -> String {
    let Some(limit) = limit else {
        return format!("{} / \u{221e}", format_tokens_human(used));
    };
    let text = format!("{} / {}", format_tokens_human(used), format_tokens_human(limit));
    let percentage = if limit == 0 {
        100.0
    } else {
        used as f64 / limit as f64 * 100.0
    };

    if percentage >= 100.0 {
        format!("{}", style(text).red())
    } else if percentage >= 80.0 {
        format!("{}", style(text).yellow())
    } else {
        text
    }
}

/// Footer printed after a response: provider, tokens, cost.
///
/// Example: `  [primary · 12 in / 34 out · ~$0.001]`
pub fn render_completion_footer(provider: &str, usage: &Usage, cost_usd: f64) -> String {
    format!(
        "  {}",
        style(format!(
            "[{provider} \u{00b7} {} in / {} out \u{00b7} {}]",
            format_tokens_human(u64::from(usage.input_tokens)),
            format_tokens_human(u64::from(usage.output_tokens)),
            format_cost(cost_usd),
        ))
        .dim()
    )
}

/// First line of `text`, cut to `max_chars` with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars || line.len() < text.trim_end().len() {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}\u{2026}")
    } else {
        line.to_string()
    }
}

/// Report a failed gateway call and turn it into the command's error.
///
/// The detailed error goes to the log; the user sees the public message and
/// the request id. With `--json` the error envelope is printed on stdout.
pub fn gateway_failure(err: &GatewayError, request_id: &str, json: bool) -> anyhow::Error {
    tracing::warn!(request_id, error = %err, kind = %err.kind(), "Completion failed");

    if json {
        match serde_json::to_string_pretty(&err.envelope(Some(request_id))) {
            Ok(body) => println!("{body}"),
            Err(e) => tracing::error!("Failed to serialize error envelope: {e}"),
        }
    }

    anyhow::anyhow!("{} (request {request_id})", err.public_message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_get_thousands_separators() {
        assert_eq!(format_tokens_human(0), "0");
        assert_eq!(format_tokens_human(999), "999");
        assert_eq!(format_tokens_human(1_000), "1,000");
        assert_eq!(format_tokens_human(12_450), "12,450");
        assert_eq!(format_tokens_human(200_000), "200,000");
        assert_eq!(format_tokens_human(1_234_567), "1,234,567");
    }

    #[test]
    fn usage_contains_both_counts() {
        let usage = render_usage(8_500, Some(10_000));
        assert!(usage.contains("8,500"));
        assert!(usage.contains("10,000"));
        assert!(render_usage(3, None).contains('\u{221e}'));
    }

    #[test]
    fn footer_shows_provider_and_cost() {
        let footer = render_completion_footer(
            "backup",
            &Usage {
                input_tokens: 12,
                output_tokens: 1_034,
            },
            0.0004,
        );
        assert!(footer.contains("backup"));
        assert!(footer.contains("12 in / 1,034 out"));
        assert!(footer.contains("~$0.000"));
    }

    #[test]
    fn preview_cuts_long_and_multiline_text() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd\u{2026}");
        assert_eq!(preview("first\nsecond", 20), "first\u{2026}");
        assert_eq!(preview("", 5), "");
    }

    #[test]
    fn failure_message_is_public_and_names_the_request() {
        let err = GatewayError::Internal {
            message: "db exploded at /var/lib".to_string(),
        };
        let message = gateway_failure(&err, "req-9", false).to_string();
        assert_eq!(message, "Internal error (request req-9)");
    }
}
