//! Database Layer
//!
//! Postgres access through a shared pool. The exchange treats the store as
//! an append-only event log (order_events, result_events) with a cursor
//! table and side tables for orders, results and trades.

pub mod cursors;
pub mod events;
pub mod orders;
pub mod results;
pub mod trades;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Store errors surfaced by the typed operations in this module.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("order not found: {0}")]
    OrderNotFound(i64),

    #[error("cannot cancel complete order: {0}")]
    CannotCancel(i64),

    #[error("result batch not found: {0}")]
    ResultBatchNotFound(i64),
}

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        tracing::info!("Database pool established");
        Ok(Self { pool })
    }

    /// Run the idempotent schema bootstrap.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(include_str!("schema.sql")).await?;
        tracing::info!("Database schema ensured");
        Ok(())
    }
}
