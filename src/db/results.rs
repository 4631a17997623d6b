//! Result batch store.
//!
//! One row per persisted batch of matcher results, serialized losslessly
//! (decimals as strings). Each insert also appends a `result_events` row in
//! the same transaction so the result consumer can tail batches in commit
//! order.

use super::events::RESULT_EVENTS;
use super::StoreError;
use crate::services::matching::MatchResult;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub const CREATED: &str = "created";

#[derive(Debug, Clone)]
pub struct ResultBatch {
    pub id: i64,
    pub start_seq: i64,
    pub end_seq: i64,
    pub created_at: DateTime<Utc>,
    pub results: Vec<MatchResult>,
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: i64,
    start_seq: i64,
    end_seq: i64,
    created_at: DateTime<Utc>,
    results_json: serde_json::Value,
}

impl BatchRow {
    fn decode(self) -> Result<ResultBatch, StoreError> {
        let results: Vec<MatchResult> = serde_json::from_value(self.results_json)?;
        Ok(ResultBatch {
            id: self.id,
            start_seq: self.start_seq,
            end_seq: self.end_seq,
            created_at: self.created_at,
            results,
        })
    }
}

/// Persist a batch and its event in one transaction, returning the row id.
pub async fn create(pool: &PgPool, results: &[MatchResult]) -> Result<i64, StoreError> {
    let start_seq = results.first().map(|r| r.sequence).unwrap_or(0);
    let end_seq = results.last().map(|r| r.sequence).unwrap_or(0);
    let results_json = serde_json::to_value(results)?;

    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO results (start_seq, end_seq, results_json)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(start_seq)
    .bind(end_seq)
    .bind(results_json)
    .fetch_one(&mut *tx)
    .await?;

    RESULT_EVENTS.insert(&mut tx, id, CREATED, None).await?;

    tx.commit().await?;
    Ok(id)
}

pub async fn lookup(pool: &PgPool, id: i64) -> Result<ResultBatch, StoreError> {
    let row: Option<BatchRow> = sqlx::query_as(
        "SELECT id, start_seq, end_seq, created_at, results_json FROM results WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.ok_or(StoreError::ResultBatchNotFound(id))?.decode()
}

/// Committed batches containing results up to `seq`, in commit order. Used
/// to rebuild the order book from history.
pub async fn list_upto(pool: &PgPool, seq: i64) -> Result<Vec<ResultBatch>, StoreError> {
    let rows: Vec<BatchRow> = sqlx::query_as(
        r#"
        SELECT id, start_seq, end_seq, created_at, results_json
        FROM results WHERE start_seq <= $1 ORDER BY id ASC
        "#,
    )
    .bind(seq)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(BatchRow::decode).collect()
}
