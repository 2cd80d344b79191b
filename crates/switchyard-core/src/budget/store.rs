//! Persistence port for budget records.
//!
//! The ledger loads a user's record on first use and writes it through
//! after every reserve/commit/release. Implementations live in
//! switchyard-infra (e.g., `SqliteBudgetStore`); the in-memory store here is
//! the default for tests and ephemeral gateways.

use dashmap::DashMap;

use switchyard_types::budget::BudgetRecord;
use switchyard_types::error::RepositoryError;

pub trait BudgetStore: Send + Sync {
    fn load(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<BudgetRecord>, RepositoryError>> + Send;

    fn save(
        &self,
        record: &BudgetRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

#[derive(Debug, Default)]
pub struct InMemoryBudgetStore {
    records: DashMap<String, BudgetRecord>,
}

impl InMemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BudgetStore for InMemoryBudgetStore {
    async fn load(&self, user_id: &str) -> Result<Option<BudgetRecord>, RepositoryError> {
        Ok(self.records.get(user_id).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &BudgetRecord) -> Result<(), RepositoryError> {
        self.records.insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}
