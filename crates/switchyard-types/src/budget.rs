//! Per-user budget and rate-limit types.
//!
//! A `BudgetRecord` is owned by the budget ledger in switchyard-core; nothing
//! else mutates it. Quotas come from configured tiers and are read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ceilings applied to one user per window. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    /// Cap on `max_tokens` for a single request.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Mutable per-user consumption state for the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub user_id: String,
    pub tier: String,
    /// Committed tokens plus provisional holds of outstanding reservations.
    pub tokens_used: u64,
    pub requests_used: u32,
    pub window_start: DateTime<Utc>,
    pub window_reset_at: DateTime<Utc>,
}

impl BudgetRecord {
    pub fn new(
        user_id: impl Into<String>,
        tier: impl Into<String>,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tier: tier.into(),
            tokens_used: 0,
            requests_used: 0,
            window_start: now,
            window_reset_at: window_end(now, window),
        }
    }

    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    /// Start a fresh window at `now` with zeroed counters.
    pub fn reset(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        self.tokens_used = 0;
        self.requests_used = 0;
        self.window_start = now;
        self.window_reset_at = window_end(now, window);
    }

    /// Seconds until the window resets, never negative.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.window_reset_at - now).num_seconds()).unwrap_or(0)
    }
}

/// End of a window opened at `now`. A window that would run past the last
/// representable instant never resets.
fn window_end(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Read-only view of a user's budget for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub user_id: String,
    pub tier: String,
    pub tokens_used: u64,
    /// `None` when the tier has no token ceiling.
    pub tokens_remaining: Option<u64>,
    pub requests_used: u32,
    pub requests_remaining: Option<u32>,
    pub window_reset_at: DateTime<Utc>,
}

/// Errors produced by the budget ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "token budget exceeded for '{user_id}': requested {requested}, remaining {remaining} (resets in {retry_after_secs}s)"
    )]
    TokenBudgetExceeded {
        user_id: String,
        requested: u64,
        remaining: u64,
        retry_after_secs: u64,
    },

    #[error("rate limit exceeded for '{user_id}': {limit} requests per window (resets in {retry_after_secs}s)")]
    RateLimitExceeded {
        user_id: String,
        limit: u32,
        retry_after_secs: u64,
    },

    #[error("budget store error: {0}")]
    Store(String),
}
