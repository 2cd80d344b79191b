//! Persistence port for finished completions.
//!
//! The gateway calls [`CompletionSink::save`] at most once per completion
//! that reached a provider. Budget-rejected and invalid requests never get
//! here. Implementations must reject a second record with the same
//! `request_id` with [`RepositoryError::Conflict`].

use std::sync::Mutex;

use switchyard_types::error::RepositoryError;
use switchyard_types::record::CompletionRecord;

pub trait CompletionSink: Send + Sync {
    fn save(
        &self,
        record: &CompletionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Keeps records in memory. Used by tests and ephemeral gateways.
#[derive(Debug, Default)]
pub struct InMemoryCompletionSink {
    records: Mutex<Vec<CompletionRecord>>,
}

impl InMemoryCompletionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl CompletionSink for InMemoryCompletionSink {
    async fn save(&self, record: &CompletionRecord) -> Result<(), RepositoryError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Query("completion sink poisoned".to_string()))?;
        if records.iter().any(|r| r.request_id == record.request_id) {
            return Err(RepositoryError::Conflict(format!(
                "completion for request '{}' already saved",
                record.request_id
            )));
        }
        records.push(record.clone());
        Ok(())
    }
}
