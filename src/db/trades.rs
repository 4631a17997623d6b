//! Trade row store.

use rust_decimal::Decimal;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct CreateTradeReq {
    pub is_buy: bool,
    pub seq: i64,
    pub seq_idx: i32,
    pub price: Decimal,
    pub volume: Decimal,
    pub maker_order_id: i64,
    pub taker_order_id: i64,
}

/// Insert one trade. The result pipeline is at-least-once, so a replayed
/// `(seq, seq_idx)` hits the uniqueness constraint and is ignored.
pub async fn create(pool: &PgPool, req: &CreateTradeReq) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trades
            (is_buy, seq, seq_idx, price, volume, maker_order_id, taker_order_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (seq, seq_idx) DO NOTHING
        "#,
    )
    .bind(req.is_buy)
    .bind(req.seq)
    .bind(req.seq_idx)
    .bind(req.price)
    .bind(req.volume)
    .bind(req.maker_order_id)
    .bind(req.taker_order_id)
    .execute(pool)
    .await?;

    Ok(())
}
