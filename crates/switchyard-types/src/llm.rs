//! Completion request/response types for Switchyard.
//!
//! These types model the normalized shape every provider speaks behind the
//! gateway: role-tagged messages, completion requests, streamed chunks,
//! usage accounting and the provider-boundary error classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound accepted for `temperature`.
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// A validated, normalized completion request.
///
/// Immutable once it enters the gateway. `request_id` is the client-supplied
/// idempotency key; the gateway assigns one when it is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CompletionRequest {
    /// Build a single-turn user request with no sampling overrides.
    pub fn new(
        user_id: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            max_tokens,
            temperature: None,
            stream: false,
            user_id: user_id.into(),
            request_id: None,
        }
    }

    /// Check the structural invariants of the request.
    ///
    /// Returns a human-readable reason for the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        if let Some(index) = self.messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(format!("message {index} has empty content"));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if let Some(t) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(format!("temperature must be between 0.0 and {MAX_TEMPERATURE}, got {t}"));
            }
        }
        Ok(())
    }

    /// The request id, or an empty string before the gateway assigns one.
    pub fn id(&self) -> &str {
        self.request_id.as_deref().unwrap_or_default()
    }

    /// Concatenated prompt text, used for token estimation.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reason why a provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
        }
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "end_turn" => Ok(StopReason::EndTurn),
            "max_tokens" => Ok(StopReason::MaxTokens),
            "stop_sequence" => Ok(StopReason::StopSequence),
            other => Err(format!("invalid stop reason: '{other}'")),
        }
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Response from a provider for a non-streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// One incremental unit of streamed output.
///
/// `sequence` is strictly increasing within one completion. The final chunk
/// of a well-formed stream carries `stop_reason` and usually `usage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub sequence: u64,
    pub text: String,
    /// Output tokens this chunk accounts for.
    pub tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(sequence: u64, text: impl Into<String>, tokens: u32) -> Self {
        Self {
            sequence,
            text: text.into(),
            tokens,
            stop_reason: None,
            usage: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stop_reason.is_some()
    }
}

/// Pre-flight token estimate used to size a budget reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub input_tokens: u32,
    pub max_output_tokens: u32,
}

impl TokenEstimate {
    /// Heuristic estimate: prompt tokens plus the full output allowance.
    pub fn for_request(request: &CompletionRequest) -> Self {
        Self {
            input_tokens: estimate_text_tokens(&request.prompt_text()),
            max_output_tokens: request.max_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.max_output_tokens)
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_text_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// How the dispatch engine must react to a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Another candidate may succeed: timeouts, rate limits, 5xx.
    Retriable,
    /// No candidate can fix it: malformed request, auth, unsupported model.
    NonRetriable,
    /// The caller abandoned the operation.
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retriable => write!(f, "retriable"),
            ErrorClass::NonRetriable => write!(f, "non_retriable"),
            ErrorClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors produced at the provider boundary.
///
/// Every concrete provider maps its transport failures onto these variants;
/// [`ProviderError::class`] is what failover keys on.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("stream error: {message}")]
    Stream { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("model not supported: {model}")]
    ModelUnsupported { model: String },

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Timeout { .. }
            | ProviderError::RateLimited { .. }
            | ProviderError::Unavailable { .. }
            | ProviderError::Stream { .. } => ErrorClass::Retriable,
            ProviderError::InvalidRequest { .. }
            | ProviderError::AuthenticationFailed { .. }
            | ProviderError::ModelUnsupported { .. } => ErrorClass::NonRetriable,
            ProviderError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Retriable
    }
}

/// Final result of a non-streaming completion as handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub request_id: String,
    pub model: String,
    /// Name of the provider that served the request.
    pub provider: String,
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub cost_usd: f64,
    /// Present when a non-primary candidate served the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_warning: Option<String>,
    /// Number of provider attempts made, including the successful one.
    pub attempts: u32,
}
