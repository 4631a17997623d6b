//! Orders FSM.
//!
//! The submission surface (create/cancel) and the consumer-side transitions
//! (posted/complete). Every applied transition appends an `order_events` row
//! in the same transaction as the row mutation; those events are the
//! matcher's command stream, and transitions the matcher does not care about
//! become the sequence gaps it fills with no-ops.

use super::events::ORDER_EVENTS;
use super::StoreError;
use crate::models::{CancelOrderPayload, CreateOrderPayload, Order, OrderStatus, OrderType};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::debug;

pub async fn create_limit(
    pool: &PgPool,
    is_buy: bool,
    price: Decimal,
    volume: Decimal,
    post_only: bool,
) -> Result<i64, StoreError> {
    let order_type = if post_only {
        OrderType::PostOnly
    } else {
        OrderType::Limit
    };

    insert(
        pool,
        CreateOrderPayload {
            order_type,
            is_buy,
            limit_price: price,
            limit_volume: volume,
            market_base: Decimal::ZERO,
            market_counter: Decimal::ZERO,
        },
    )
    .await
}

pub async fn create_market_buy(pool: &PgPool, base: Decimal) -> Result<i64, StoreError> {
    insert(
        pool,
        CreateOrderPayload {
            order_type: OrderType::Market,
            is_buy: true,
            limit_price: Decimal::ZERO,
            limit_volume: Decimal::ZERO,
            market_base: base,
            market_counter: Decimal::ZERO,
        },
    )
    .await
}

pub async fn create_market_sell(pool: &PgPool, counter: Decimal) -> Result<i64, StoreError> {
    insert(
        pool,
        CreateOrderPayload {
            order_type: OrderType::Market,
            is_buy: false,
            limit_price: Decimal::ZERO,
            limit_volume: Decimal::ZERO,
            market_base: Decimal::ZERO,
            market_counter: counter,
        },
    )
    .await
}

async fn insert(pool: &PgPool, payload: CreateOrderPayload) -> Result<i64, StoreError> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO orders
            (order_type, is_buy, status, limit_price, limit_volume, market_base, market_counter)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(payload.order_type)
    .bind(payload.is_buy)
    .bind(OrderStatus::Pending)
    .bind(payload.limit_price)
    .bind(payload.limit_volume)
    .bind(payload.market_base)
    .bind(payload.market_counter)
    .fetch_one(&mut *tx)
    .await?;

    let metadata = serde_json::to_value(&payload)?;
    ORDER_EVENTS
        .insert(&mut tx, id, OrderStatus::Pending.as_str(), Some(metadata))
        .await?;

    tx.commit().await?;
    Ok(id)
}

pub async fn lookup(pool: &PgPool, id: i64) -> Result<Order, StoreError> {
    sqlx::query_as(
        r#"
        SELECT id, order_type, is_buy, status, limit_price, limit_volume,
               market_base, market_counter, update_seq, created_at, updated_at
        FROM orders WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::OrderNotFound(id))
}

/// Request cancellation of a live order. Terminal orders are reported to the
/// caller; the matcher decides whether the cancel actually lands.
pub async fn request_cancel(pool: &PgPool, id: i64) -> Result<(), StoreError> {
    let order = lookup(pool, id).await?;
    if order.status == OrderStatus::Complete {
        return Err(StoreError::CannotCancel(id));
    }

    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE orders SET status = 'cancelling', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'posted')
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        // Raced to a terminal or already-cancelling state.
        return Err(StoreError::CannotCancel(id));
    }

    let metadata = serde_json::to_value(CancelOrderPayload {
        is_buy: order.is_buy,
    })?;
    ORDER_EVENTS
        .insert(&mut tx, id, OrderStatus::Cancelling.as_str(), Some(metadata))
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Mark the order as resting on the book. Stale sequences, cancelling
/// orders and already advanced rows are all no-ops.
pub async fn update_posted(pool: &PgPool, id: i64, seq: i64) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE orders SET status = 'posted', update_seq = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending' AND update_seq < $2
        "#,
    )
    .bind(id)
    .bind(seq)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        debug!(order_id = id, seq, "posted update skipped");
        return Ok(());
    }

    ORDER_EVENTS
        .insert(&mut tx, id, OrderStatus::Posted.as_str(), None)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Complete the order. Stale sequences and already complete rows are no-ops.
pub async fn complete(pool: &PgPool, id: i64, seq: i64) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE orders SET status = 'complete', update_seq = $2, updated_at = NOW()
        WHERE id = $1 AND status <> 'complete' AND update_seq < $2
        "#,
    )
    .bind(id)
    .bind(seq)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        debug!(order_id = id, seq, "complete update skipped");
        return Ok(());
    }

    ORDER_EVENTS
        .insert(&mut tx, id, OrderStatus::Complete.as_str(), None)
        .await?;

    tx.commit().await?;
    Ok(())
}
