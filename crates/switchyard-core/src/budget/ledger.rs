//! BudgetLedger: atomic check-and-reserve of per-user token and request quotas.
//!
//! Every user has one slot holding their cached `BudgetRecord` behind an
//! async mutex. `reserve`, `commit` and `release` hold that mutex for the
//! whole read-check-write, so two concurrent reserves for the same user can
//! never both pass a check that only one of them fits. Users never contend
//! with each other.
//!
//! Windows roll over lazily: the first `reserve` after `window_reset_at`
//! zeroes the counters. There is no background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use switchyard_types::budget::{BudgetError, BudgetRecord, BudgetSnapshot, Quota};
use switchyard_types::config::BudgetConfig;

use super::clock::{Clock, SystemClock};
use super::store::BudgetStore;

/// Quotas by tier and the tier assignment of each user. Read-only after startup.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    window: chrono::Duration,
    default_tier: String,
    tiers: HashMap<String, Quota>,
    users: HashMap<String, String>,
}

impl QuotaPolicy {
    pub fn from_config(config: &BudgetConfig) -> Self {
        if !config.tiers.contains_key(&config.default_tier) {
            warn!(
                tier = %config.default_tier,
                "Default tier is not defined, unassigned users will be unlimited"
            );
        }
        Self {
            window: config.window(),
            default_tier: config.default_tier.clone(),
            tiers: config.tiers.clone(),
            users: config.users.clone(),
        }
    }

    /// Every user gets the same quota.
    pub fn uniform(quota: Quota, window: chrono::Duration) -> Self {
        Self {
            window,
            default_tier: "default".to_string(),
            tiers: HashMap::from([("default".to_string(), quota)]),
            users: HashMap::new(),
        }
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    pub fn tier_for(&self, user_id: &str) -> &str {
        self.users
            .get(user_id)
            .filter(|tier| self.tiers.contains_key(tier.as_str()))
            .unwrap_or(&self.default_tier)
    }

    pub fn quota_for(&self, user_id: &str) -> Quota {
        self.tiers
            .get(self.tier_for(user_id))
            .copied()
            .unwrap_or_else(Quota::unlimited)
    }
}

#[derive(Debug, Default)]
struct LedgerCounters {
    outstanding: AtomicU64,
    leaked: AtomicU64,
}

/// A provisional hold against a user's budget.
///
/// Must be handed back to [`BudgetLedger::commit`] or
/// [`BudgetLedger::release`] exactly once. Dropping it unresolved keeps the
/// hold in place, logs an error and counts it in [`BudgetLedger::leaked`].
#[derive(Debug)]
pub struct Reservation {
    id: Uuid,
    user_id: String,
    estimated_tokens: u64,
    window_start: DateTime<Utc>,
    counters: Arc<LedgerCounters>,
    resolved: bool,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }

    fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.resolved {
            self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.counters.leaked.fetch_add(1, Ordering::SeqCst);
            error!(
                reservation_id = %self.id,
                user_id = %self.user_id,
                estimated_tokens = self.estimated_tokens,
                "Reservation dropped without commit or release"
            );
        }
    }
}

type Slot = Arc<Mutex<Option<BudgetRecord>>>;

/// Reserve, commit and release against per-user quotas.
///
/// One slot is created for every user id the ledger sees, including users
/// whose first request was rejected, and is kept for the lifetime of the
/// ledger. Memory grows with the number of distinct users; slots are never
/// evicted.
pub struct BudgetLedger<S: BudgetStore> {
    store: S,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    slots: DashMap<String, Slot>,
    counters: Arc<LedgerCounters>,
}

impl<S: BudgetStore> BudgetLedger<S> {
    pub fn new(store: S, policy: QuotaPolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
            slots: DashMap::new(),
            counters: Arc::new(LedgerCounters::default()),
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Reservations handed out and not yet resolved.
    pub fn outstanding(&self) -> u64 {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    /// Reservations dropped without being resolved.
    pub fn leaked(&self) -> u64 {
        self.counters.leaked.load(Ordering::SeqCst)
    }

    fn slot(&self, user_id: &str) -> Slot {
        // Clone the Arc so the shard lock is released before awaiting.
        self.slots.entry(user_id.to_string()).or_default().clone()
    }

    /// The cached record, loading it from the store (or creating it) on first use.
    async fn cached_record(
        &self,
        cached: &mut Option<BudgetRecord>,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BudgetRecord, BudgetError> {
        if let Some(record) = cached.as_ref() {
            return Ok(record.clone());
        }
        let record = match self
            .store
            .load(user_id)
            .await
            .map_err(|e| BudgetError::Store(e.to_string()))?
        {
            Some(record) => record,
            None => BudgetRecord::new(user_id, self.policy.tier_for(user_id), now, self.policy.window),
        };
        *cached = Some(record.clone());
        Ok(record)
    }

    /// Atomically check both ceilings and, if the request fits, hold
    /// `estimated_tokens` and one request slot.
    ///
    /// Rejections leave the stored record untouched.
    pub async fn reserve(
        &self,
        user_id: &str,
        estimated_tokens: u64,
    ) -> Result<Reservation, BudgetError> {
        let slot = self.slot(user_id);
        let mut cached = slot.lock().await;
        let now = self.clock.now();
        let quota = self.policy.quota_for(user_id);

        let mut record = self.cached_record(&mut cached, user_id, now).await?;
        if record.window_expired(now) {
            debug!(user_id, tokens_used = record.tokens_used, "Budget window rolled over");
            record.reset(now, self.policy.window);
        }
        record.tier = self.policy.tier_for(user_id).to_string();

        if let Some(limit) = quota.max_requests {
            if record.requests_used >= limit {
                return Err(BudgetError::RateLimitExceeded {
                    user_id: user_id.to_string(),
                    limit,
                    retry_after_secs: record.retry_after_secs(now),
                });
            }
        }
        if let Some(max_tokens) = quota.max_tokens {
            let remaining = max_tokens.saturating_sub(record.tokens_used);
            if estimated_tokens > remaining {
                return Err(BudgetError::TokenBudgetExceeded {
                    user_id: user_id.to_string(),
                    requested: estimated_tokens,
                    remaining,
                    retry_after_secs: record.retry_after_secs(now),
                });
            }
        }

        record.tokens_used = record.tokens_used.saturating_add(estimated_tokens);
        record.requests_used = record.requests_used.saturating_add(1);
        self.store
            .save(&record)
            .await
            .map_err(|e| BudgetError::Store(e.to_string()))?;

        let window_start = record.window_start;
        *cached = Some(record);
        self.counters.outstanding.fetch_add(1, Ordering::SeqCst);

        let reservation = Reservation {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            estimated_tokens,
            window_start,
            counters: Arc::clone(&self.counters),
            resolved: false,
        };
        debug!(
            user_id,
            reservation_id = %reservation.id,
            estimated_tokens,
            "Budget reserved"
        );
        Ok(reservation)
    }

    /// Replace the provisional hold with the tokens actually consumed.
    ///
    /// An actual above the estimate is recorded as overage; the delivered
    /// response is never failed retroactively. A reservation from an earlier
    /// window charges `actual_tokens` to the current window.
    ///
    /// The in-memory record is updated and the reservation resolved even
    /// when the store write fails; the failure is still returned.
    pub async fn commit(
        &self,
        mut reservation: Reservation,
        actual_tokens: u64,
    ) -> Result<(), BudgetError> {
        reservation.resolve();
        let slot = self.slot(&reservation.user_id);
        let mut cached = slot.lock().await;
        let now = self.clock.now();
        let mut record = self
            .cached_record(&mut cached, &reservation.user_id, now)
            .await?;

        if record.window_start == reservation.window_start {
            record.tokens_used = record
                .tokens_used
                .saturating_sub(reservation.estimated_tokens)
                .saturating_add(actual_tokens);
        } else {
            if record.window_expired(now) {
                record.reset(now, self.policy.window);
            }
            record.tokens_used = record.tokens_used.saturating_add(actual_tokens);
        }

        if actual_tokens > reservation.estimated_tokens {
            warn!(
                user_id = %reservation.user_id,
                estimated = reservation.estimated_tokens,
                actual = actual_tokens,
                "Actual usage exceeded reservation estimate"
            );
        }
        debug!(
            user_id = %reservation.user_id,
            reservation_id = %reservation.id,
            actual_tokens,
            "Budget committed"
        );

        *cached = Some(record.clone());
        self.store
            .save(&record)
            .await
            .map_err(|e| BudgetError::Store(e.to_string()))
    }

    /// Fully reverse the provisional hold (tokens and request slot).
    ///
    /// A no-op when the reservation's window has already rolled over.
    pub async fn release(&self, mut reservation: Reservation) -> Result<(), BudgetError> {
        reservation.resolve();
        let slot = self.slot(&reservation.user_id);
        let mut cached = slot.lock().await;
        let now = self.clock.now();
        let mut record = self
            .cached_record(&mut cached, &reservation.user_id, now)
            .await?;

        if record.window_start != reservation.window_start {
            debug!(
                user_id = %reservation.user_id,
                reservation_id = %reservation.id,
                "Release after window rollover, nothing to revert"
            );
            return Ok(());
        }

        record.tokens_used = record.tokens_used.saturating_sub(reservation.estimated_tokens);
        record.requests_used = record.requests_used.saturating_sub(1);
        debug!(
            user_id = %reservation.user_id,
            reservation_id = %reservation.id,
            "Budget released"
        );

        *cached = Some(record.clone());
        self.store
            .save(&record)
            .await
            .map_err(|e| BudgetError::Store(e.to_string()))
    }

    /// Read-only view of the user's current window.
    pub async fn snapshot(&self, user_id: &str) -> Result<BudgetSnapshot, BudgetError> {
        let slot = self.slot(user_id);
        let mut cached = slot.lock().await;
        let now = self.clock.now();
        let mut record = self.cached_record(&mut cached, user_id, now).await?;
        if record.window_expired(now) {
            record.reset(now, self.policy.window);
        }

        let quota = self.policy.quota_for(user_id);
        Ok(BudgetSnapshot {
            user_id: user_id.to_string(),
            tier: self.policy.tier_for(user_id).to_string(),
            tokens_used: record.tokens_used,
            tokens_remaining: quota.max_tokens.map(|max| max.saturating_sub(record.tokens_used)),
            requests_used: record.requests_used,
            requests_remaining: quota
                .max_requests
                .map(|max| max.saturating_sub(record.requests_used)),
            window_reset_at: record.window_reset_at,
        })
    }
}
