//! SQLite budget store: one row per user, upserted after every ledger
//! operation so window state survives restarts.

use sqlx::Row;

use switchyard_core::budget::BudgetStore;
use switchyard_types::budget::BudgetRecord;
use switchyard_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

pub struct SqliteBudgetStore {
    pool: DatabasePool,
}

impl SqliteBudgetStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl BudgetStore for SqliteBudgetStore {
    async fn load(&self, user_id: &str) -> Result<Option<BudgetRecord>, RepositoryError> {
        // Read through the writer: the ledger needs its own latest write.
        let row = sqlx::query("SELECT * FROM budget_records WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let record = BudgetRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_record()?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, record: &BudgetRecord) -> Result<(), RepositoryError> {
        let tokens_used = i64::try_from(record.tokens_used)
            .map_err(|_| RepositoryError::Query("tokens_used out of range".to_string()))?;

        sqlx::query(
            r#"INSERT INTO budget_records (user_id, tier, tokens_used, requests_used, window_start, window_reset_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id) DO UPDATE SET
                   tier = excluded.tier,
                   tokens_used = excluded.tokens_used,
                   requests_used = excluded.requests_used,
                   window_start = excluded.window_start,
                   window_reset_at = excluded.window_reset_at"#,
        )
        .bind(&record.user_id)
        .bind(&record.tier)
        .bind(tokens_used)
        .bind(i64::from(record.requests_used))
        .bind(format_datetime(&record.window_start))
        .bind(format_datetime(&record.window_reset_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

struct BudgetRow {
    user_id: String,
    tier: String,
    tokens_used: i64,
    requests_used: i64,
    window_start: String,
    window_reset_at: String,
}

impl BudgetRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            tier: row.try_get("tier")?,
            tokens_used: row.try_get("tokens_used")?,
            requests_used: row.try_get("requests_used")?,
            window_start: row.try_get("window_start")?,
            window_reset_at: row.try_get("window_reset_at")?,
        })
    }

    fn into_record(self) -> Result<BudgetRecord, RepositoryError> {
        Ok(BudgetRecord {
            user_id: self.user_id,
            tier: self.tier,
            tokens_used: u64::try_from(self.tokens_used).unwrap_or(0),
            requests_used: u32::try_from(self.requests_used).unwrap_or(0),
            window_start: parse_datetime(&self.window_start)?,
            window_reset_at: parse_datetime(&self.window_reset_at)?,
        })
    }
}
