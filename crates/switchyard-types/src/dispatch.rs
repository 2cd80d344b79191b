//! Dispatch policy and per-attempt observability records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ErrorClass, ProviderError};

/// How the dispatch engine drives candidates for a non-streaming call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Try candidates one at a time in ranked order.
    #[default]
    Failover,
    /// Invoke the top `fan_out` candidates concurrently; first success wins.
    Race { fan_out: usize },
}

/// Outcome of a single provider invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Error,
    Cancelled,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Timeout => write!(f, "timeout"),
            AttemptOutcome::Error => write!(f, "error"),
            AttemptOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl AttemptOutcome {
    pub fn from_error(error: &ProviderError) -> Self {
        match error {
            ProviderError::Timeout { .. } => AttemptOutcome::Timeout,
            ProviderError::Cancelled => AttemptOutcome::Cancelled,
            _ => AttemptOutcome::Error,
        }
    }
}

/// Transient record of one provider invocation, emitted to the attempt sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub request_id: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
    /// Tokens consumed, when the provider reported them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

/// One candidate's failure, kept for the aggregate error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl ProviderFailure {
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}
