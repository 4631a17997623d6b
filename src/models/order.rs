use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    PostOnly,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
            OrderType::PostOnly => write!(f, "post_only"),
        }
    }
}

/// Order lifecycle status.
///
/// Transitions: Pending -> {Posted, Cancelling, Complete};
/// Posted -> {Cancelling, Complete}; Cancelling -> Complete.
/// Complete is terminal. Every applied transition appends a row to
/// `order_events`, which is what feeds the matcher its command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Posted,
    Cancelling,
    Complete,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Posted => "posted",
            OrderStatus::Cancelling => "cancelling",
            OrderStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted order row.
///
/// `update_seq` is the last matcher result sequence that advanced this row;
/// updates carrying a stale sequence are no-ops.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub order_type: OrderType,
    pub is_buy: bool,
    pub status: OrderStatus,

    pub limit_price: Decimal,
    pub limit_volume: Decimal,

    pub market_base: Decimal,    // Buying with X base
    pub market_counter: Decimal, // Selling X counter

    pub update_seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create-request payload carried in the `pending` order event metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderPayload {
    pub order_type: OrderType,
    pub is_buy: bool,
    pub limit_price: Decimal,
    pub limit_volume: Decimal,
    pub market_base: Decimal,
    pub market_counter: Decimal,
}

/// Payload carried in the `cancelling` order event metadata. The matcher
/// needs the side to know which ladder to scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderPayload {
    pub is_buy: bool,
}
