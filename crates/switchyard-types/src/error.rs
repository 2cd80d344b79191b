use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetError;
use crate::dispatch::ProviderFailure;
use crate::llm::ProviderError;

/// Caller-facing error returned by every gateway operation.
///
/// The display text is the detailed internal description meant for logs;
/// [`GatewayError::public_message`] is what a client should see.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("no provider serves model '{model}'")]
    UnknownModel { model: String },

    #[error("token budget exceeded: requested {requested_tokens}, remaining {remaining_tokens}")]
    BudgetExceeded {
        remaining_tokens: u64,
        requested_tokens: u64,
        retry_after_secs: u64,
    },

    #[error("rate limit exceeded: {limit} requests per window")]
    RateLimitExceeded { limit: u32, retry_after_secs: u64 },

    #[error("all providers failed: {}", join_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("provider '{provider}' rejected the request: {error}")]
    NonRetriableProvider { provider: String, error: ProviderError },

    #[error("stream from '{provider}' interrupted after {} bytes: {error}", .partial.len())]
    StreamInterrupted {
        provider: String,
        partial: String,
        error: ProviderError,
    },

    #[error("cancelled by caller")]
    Cancelled,

    #[error("failed to persist completion {request_id}: {message}")]
    Persistence { request_id: String, message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    UnknownModel,
    BudgetExceeded,
    RateLimitExceeded,
    AllProvidersFailed,
    NonRetriableProviderError,
    StreamInterrupted,
    Cancelled,
    PersistenceFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::UnknownModel => "UNKNOWN_MODEL",
            ErrorKind::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::AllProvidersFailed => "ALL_PROVIDERS_FAILED",
            ErrorKind::NonRetriableProviderError => "NON_RETRIABLE_PROVIDER_ERROR",
            ErrorKind::StreamInterrupted => "STREAM_INTERRUPTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::PersistenceFailed => "PERSISTENCE_FAILED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            GatewayError::UnknownModel { .. } => ErrorKind::UnknownModel,
            GatewayError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            GatewayError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            GatewayError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            GatewayError::NonRetriableProvider { .. } => ErrorKind::NonRetriableProviderError,
            GatewayError::StreamInterrupted { .. } => ErrorKind::StreamInterrupted,
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::Persistence { .. } => ErrorKind::PersistenceFailed,
            GatewayError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Status code the HTTP layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest { .. } => 400,
            GatewayError::UnknownModel { .. } => 404,
            GatewayError::BudgetExceeded { .. } | GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::AllProvidersFailed { .. }
            | GatewayError::NonRetriableProvider { .. }
            | GatewayError::StreamInterrupted { .. } => 502,
            GatewayError::Cancelled => 499,
            GatewayError::Persistence { .. } | GatewayError::Internal { .. } => 500,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::BudgetExceeded {
                retry_after_secs, ..
            }
            | GatewayError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    /// Message safe to show a client. Provider internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::InvalidRequest { reason } => format!("Invalid request: {reason}"),
            GatewayError::UnknownModel { model } => format!("Model '{model}' is not available"),
            GatewayError::BudgetExceeded {
                remaining_tokens,
                retry_after_secs,
                ..
            } => format!(
                "Token budget exceeded ({remaining_tokens} tokens remaining). Try again in {retry_after_secs}s"
            ),
            GatewayError::RateLimitExceeded {
                limit,
                retry_after_secs,
            } => format!("Rate limit of {limit} requests reached. Try again in {retry_after_secs}s"),
            GatewayError::AllProvidersFailed { .. } => {
                "All upstream providers are currently unavailable. Please retry later".to_string()
            }
            GatewayError::NonRetriableProvider { .. } => {
                "The upstream provider rejected this request".to_string()
            }
            GatewayError::StreamInterrupted { .. } => {
                "The response was interrupted before it finished".to_string()
            }
            GatewayError::Cancelled => "Request cancelled".to_string(),
            GatewayError::Persistence { .. } | GatewayError::Internal { .. } => {
                "Internal error".to_string()
            }
        }
    }

    /// Partial output delivered before a mid-stream failure, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            GatewayError::StreamInterrupted { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// JSON error envelope for the transport layer.
    pub fn envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.kind(),
            message: self.public_message(),
            request_id: request_id.map(str::to_string),
            retry_after_secs: self.retry_after().map(|d| d.as_secs()),
        }
    }
}

impl From<BudgetError> for GatewayError {
    fn from(err: BudgetError) -> Self {
        match err {
            BudgetError::TokenBudgetExceeded {
                requested,
                remaining,
                retry_after_secs,
                ..
            } => GatewayError::BudgetExceeded {
                remaining_tokens: remaining,
                requested_tokens: requested,
                retry_after_secs,
            },
            BudgetError::RateLimitExceeded {
                limit,
                retry_after_secs,
                ..
            } => GatewayError::RateLimitExceeded {
                limit,
                retry_after_secs,
            },
            BudgetError::Store(message) => GatewayError::Internal {
                message: format!("budget store: {message}"),
            },
        }
    }
}

/// Serialized error body: `{ "code", "message", "request_id", "retry_after_secs" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Errors from repository (persistence port) operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
