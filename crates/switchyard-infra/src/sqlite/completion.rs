//! SQLite completion store.
//!
//! Implements the `CompletionSink` port. `request_id` is UNIQUE, so a second
//! save for the same request fails with `RepositoryError::Conflict` instead
//! of writing a duplicate row.

use sqlx::Row;
use uuid::Uuid;

use switchyard_core::persistence::CompletionSink;
use switchyard_types::error::RepositoryError;
use switchyard_types::llm::{CompletionRequest, Usage};
use switchyard_types::record::{CompletionRecord, CompletionStatus};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

pub struct SqliteCompletionStore {
    pool: DatabasePool,
}

impl SqliteCompletionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recent completions for `user_id`, newest first.
    pub async fn recent(&self, user_id: &str, limit: u32) -> Result<Vec<CompletionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM completions WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                CompletionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_record()
            })
            .collect()
    }

    pub async fn get(&self, request_id: &str) -> Result<CompletionRecord, RepositoryError> {
        let row = sqlx::query("SELECT * FROM completions WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .ok_or(RepositoryError::NotFound)?;

        CompletionRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_record()
    }
}

impl CompletionSink for SqliteCompletionStore {
    async fn save(&self, record: &CompletionRecord) -> Result<(), RepositoryError> {
        let request_json = serde_json::to_string(&record.request)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize request: {e}")))?;

        sqlx::query(
            r#"INSERT INTO completions (id, request_id, user_id, model, provider, request_json, text, status, input_tokens, output_tokens, cost_usd, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.request_id)
        .bind(&record.user_id)
        .bind(&record.model)
        .bind(&record.provider)
        .bind(request_json)
        .bind(&record.text)
        .bind(record.status.to_string())
        .bind(i64::from(record.usage.input_tokens))
        .bind(i64::from(record.usage.output_tokens))
        .bind(record.cost_usd)
        .bind(format_datetime(&record.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(
                format!("completion for request '{}' already saved", record.request_id),
            ),
            other => RepositoryError::Query(other.to_string()),
        })?;

        tracing::debug!(
            request_id = %record.request_id,
            status = %record.status,
            "Completion persisted"
        );
        Ok(())
    }
}

struct CompletionRow {
    id: String,
    request_id: String,
    user_id: String,
    model: String,
    provider: String,
    request_json: String,
    text: String,
    status: String,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    created_at: String,
}

impl CompletionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            user_id: row.try_get("user_id")?,
            model: row.try_get("model")?,
            provider: row.try_get("provider")?,
            request_json: row.try_get("request_json")?,
            text: row.try_get("text")?,
            status: row.try_get("status")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            cost_usd: row.try_get("cost_usd")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self) -> Result<CompletionRecord, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?;
        let request: CompletionRequest = serde_json::from_str(&self.request_json)
            .map_err(|e| RepositoryError::Query(format!("invalid request json: {e}")))?;
        let status: CompletionStatus = self.status.parse().map_err(RepositoryError::Query)?;

        Ok(CompletionRecord {
            id,
            request_id: self.request_id,
            user_id: self.user_id,
            model: self.model,
            provider: self.provider,
            request,
            text: self.text,
            status,
            usage: Usage {
                input_tokens: u32::try_from(self.input_tokens).unwrap_or(0),
                output_tokens: u32::try_from(self.output_tokens).unwrap_or(0),
            },
            cost_usd: self.cost_usd,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}
