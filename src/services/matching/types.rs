//! Matching Engine Types
//!
//! Shared types for the deterministic matching core. Everything that crosses
//! the matcher's channel boundary or lands in `results_json` lives here, so
//! it all derives serde and round-trips losslessly (decimals are
//! string-encoded).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    #[default]
    Unknown,
    Limit,
    Market,
    PostOnly,
    Cancel,
}

/// A totally ordered instruction to the matcher.
///
/// Sequences are contiguous starting at 1; a command with
/// `command_type = Unknown` is a legal no-op that only advances the book
/// sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Command {
    pub sequence: i64,
    pub command_type: CommandType,
    pub is_buy: bool,
    pub order_id: i64,

    pub limit_price: Decimal,
    pub limit_volume: Decimal,

    pub market_base: Decimal,    // Eg. buying counter with X base
    pub market_counter: Decimal, // Eg. selling X counter for base
}

// ============================================================================
// Order book
// ============================================================================

/// A resting bid or ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookOrder {
    pub id: i64,
    pub price: Decimal,
    pub remaining: Decimal, // Counter remaining, > 0 while on the book
}

/// The in-memory order book, exclusively owned by the matcher task.
///
/// Bids are non-increasing and asks non-decreasing by price from the head;
/// entries at equal price keep insertion order. `sequence` is the sequence
/// of the most recently applied command, 0 for a fresh book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OrderBook {
    pub sequence: i64,
    pub bids: Vec<BookOrder>,
    pub asks: Vec<BookOrder>,
}

// ============================================================================
// Results
// ============================================================================

/// A single execution. `price` is always the maker's resting price and
/// `is_buy` reflects the taker side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub maker_order_id: i64,
    pub taker_order_id: i64,
    pub maker_filled: bool,
    pub volume: Decimal,
    pub price: Decimal,
    pub is_buy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    CommandOld,
    CommandUnknown,
    CancelFailed,
    Cancelled,
    PostFailed,
    Posted,
    MarketEmpty,
    MarketPartial,
    MarketFull,
    LimitTaker,
    LimitPartial,
    LimitMaker,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::CommandOld => "command_old",
            ResultType::CommandUnknown => "command_unknown",
            ResultType::CancelFailed => "cancel_failed",
            ResultType::Cancelled => "cancelled",
            ResultType::PostFailed => "post_failed",
            ResultType::Posted => "posted",
            ResultType::MarketEmpty => "market_empty",
            ResultType::MarketPartial => "market_partial",
            ResultType::MarketFull => "market_full",
            ResultType::LimitTaker => "limit_taker",
            ResultType::LimitPartial => "limit_partial",
            ResultType::LimitMaker => "limit_maker",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The matcher's output for one command.
///
/// The command is carried verbatim so the book can be rebuilt from committed
/// results alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub sequence: i64,
    pub order_id: i64,
    pub result_type: ResultType,
    pub trades: Vec<Trade>,
    pub command: Command,
}

// ============================================================================
// Errors
// ============================================================================

/// Matcher errors. Both variants violate invariants the rest of the system
/// depends on, so they terminate the matching loop.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("out of order command: expect {expect}, got {got}")]
    OutOfOrderCommand { expect: i64, got: i64 },

    #[error("unexpected post failed for limit residual: sequence {sequence}")]
    ResidualPostFailed { sequence: i64 },

    #[error("result channel closed")]
    OutputClosed,
}
