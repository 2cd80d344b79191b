//! Persisted completion records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{CompletionRequest, Usage};

/// How a persisted completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    /// The provider failed mid-stream; `text` holds the partial output.
    Interrupted,
    /// The caller abandoned the stream; `text` holds what was relayed.
    Cancelled,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Completed => write!(f, "completed"),
            CompletionStatus::Interrupted => write!(f, "interrupted"),
            CompletionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for CompletionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(CompletionStatus::Completed),
            "interrupted" => Ok(CompletionStatus::Interrupted),
            "cancelled" => Ok(CompletionStatus::Cancelled),
            other => Err(format!("invalid completion status: '{other}'")),
        }
    }
}

/// One row handed to the persistence sink: written exactly once per
/// completion attempt that reached a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: Uuid,
    /// Idempotency key; a second record with the same id is rejected.
    pub request_id: String,
    pub user_id: String,
    pub model: String,
    pub provider: String,
    pub request: CompletionRequest,
    pub text: String,
    pub status: CompletionStatus,
    pub usage: Usage,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn new(
        request: &CompletionRequest,
        provider: impl Into<String>,
        text: impl Into<String>,
        status: CompletionStatus,
        usage: Usage,
        cost_usd: f64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id: request.id().to_string(),
            user_id: request.user_id.clone(),
            model: request.model.clone(),
            provider: provider.into(),
            request: request.clone(),
            text: text.into(),
            status,
            usage,
            cost_usd,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_matches_display() {
        for status in [
            CompletionStatus::Completed,
            CompletionStatus::Interrupted,
            CompletionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<CompletionStatus>().unwrap(), status);
        }
        assert!("done".parse::<CompletionStatus>().is_err());
    }

    #[test]
    fn record_copies_request_identity() {
        let mut request = CompletionRequest::new("bob", "gpt-4o", "hi", 16);
        request.request_id = Some("req-1".into());
        let record = CompletionRecord::new(
            &request,
            "openai",
            "hello",
            CompletionStatus::Completed,
            Usage::default(),
            0.0,
        );
        assert_eq!(record.request_id, "req-1");
        assert_eq!(record.user_id, "bob");
        assert_eq!(record.model, "gpt-4o");
    }
}
