//! Per-user token budget and rate-limit enforcement.

pub mod clock;
pub mod ledger;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use ledger::{BudgetLedger, QuotaPolicy, Reservation};
pub use store::{BudgetStore, InMemoryBudgetStore};
