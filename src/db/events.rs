//! Append-only event logs.
//!
//! Two streams share this shape: `order_events` (produced by the orders FSM,
//! consumed by the sequencer) and `result_events` (produced by the result
//! pipeline, consumed by the result consumer). Event ids are monotonic and
//! double as the matcher command sequence for `order_events`.

use super::cursors;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub foreign_id: i64,
    pub event_type: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A named append-only event table.
#[derive(Debug, Clone, Copy)]
pub struct EventLog {
    table: &'static str,
}

pub const ORDER_EVENTS: EventLog = EventLog {
    table: "order_events",
};

pub const RESULT_EVENTS: EventLog = EventLog {
    table: "result_events",
};

impl EventLog {
    /// Append an event within the caller's transaction, returning its id.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        foreign_id: i64,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64, sqlx::Error> {
        let query = format!(
            "INSERT INTO {} (foreign_id, event_type, metadata) VALUES ($1, $2, $3) RETURNING id",
            self.table
        );

        sqlx::query_scalar(&query)
            .bind(foreign_id)
            .bind(event_type)
            .bind(metadata)
            .fetch_one(&mut **tx)
            .await
    }

    /// Events strictly after `after`, in id order. Empty when caught up;
    /// consumers poll again after a short sleep.
    pub async fn next_batch(
        &self,
        pool: &PgPool,
        after: i64,
        limit: i64,
    ) -> Result<Vec<Event>, sqlx::Error> {
        let query = format!(
            "SELECT id, foreign_id, event_type, metadata, created_at \
             FROM {} WHERE id > $1 ORDER BY id ASC LIMIT $2",
            self.table
        );

        sqlx::query_as(&query)
            .bind(after)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

/// An opaque reference to an event-log position. Acknowledging it advances
/// the owning consumer's cursor, which also acknowledges every prior event.
#[async_trait]
pub trait AckHandle: Send + Sync {
    fn sequence(&self) -> i64;
    async fn ack(&self) -> anyhow::Result<()>;
}

/// Cursor-backed ack handle for a streamed event.
pub struct EventAck {
    pool: PgPool,
    consumer: &'static str,
    id: i64,
}

impl EventAck {
    pub fn new(pool: PgPool, consumer: &'static str, id: i64) -> Self {
        Self { pool, consumer, id }
    }
}

#[async_trait]
impl AckHandle for EventAck {
    fn sequence(&self) -> i64 {
        self.id
    }

    async fn ack(&self) -> anyhow::Result<()> {
        cursors::set_cursor(&self.pool, self.consumer, self.id).await?;
        Ok(())
    }
}
