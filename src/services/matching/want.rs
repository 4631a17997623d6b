//! Trading intents.
//!
//! `Want` unifies the three ways a taker can ask for liquidity: a limit
//! (counter amount bounded by price), a market sell (counter amount,
//! unbounded price) and a market buy (base amount, unbounded price). The
//! matching walk only ever talks to this capability set, never to the
//! command itself.

use rust_decimal::{Decimal, RoundingStrategy};

/// A closed set: there is no open extension point.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Want {
    /// Counter remaining, bounded by a limit price.
    Limit { price: Decimal, remaining: Decimal },
    /// Counter remaining, no price bound.
    MarketCounter { remaining: Decimal },
    /// Base remaining, no price bound. `scale` bounds the counter
    /// conversion below.
    MarketBase { remaining: Decimal, scale: u32 },
}

impl Want {
    /// The price bound, where zero means unbounded.
    pub fn price_limit(&self) -> Decimal {
        match self {
            Want::Limit { price, .. } => *price,
            Want::MarketCounter { .. } | Want::MarketBase { .. } => Decimal::ZERO,
        }
    }

    /// Counter amount still wanted at the given maker price.
    ///
    /// This is the only place in the matcher that rounds: a base amount
    /// divided by a price is rounded to `scale` places, midpoint away from
    /// zero. `fill` then deducts the rounded counter times the exact maker
    /// price, so base remaining can carry a nonzero tail.
    pub fn remaining(&self, price: Decimal) -> Decimal {
        match self {
            Want::Limit { remaining, .. } | Want::MarketCounter { remaining } => *remaining,
            Want::MarketBase { remaining, scale } => (remaining / price)
                .round_dp_with_strategy(*scale, RoundingStrategy::MidpointAwayFromZero),
        }
    }

    /// Deduct a partial fill of `counter` at `price`.
    pub fn fill(&mut self, counter: Decimal, price: Decimal) {
        match self {
            Want::Limit { remaining, .. } | Want::MarketCounter { remaining } => {
                *remaining -= counter;
            }
            Want::MarketBase { remaining, .. } => {
                *remaining -= counter * price;
            }
        }
    }

    /// Mark the want fully satisfied.
    pub fn set_filled(&mut self) {
        match self {
            Want::Limit { remaining, .. }
            | Want::MarketCounter { remaining }
            | Want::MarketBase { remaining, .. } => *remaining = Decimal::ZERO,
        }
    }

    /// Exact zero only. A rounded market-by-base fill can strand dust; that
    /// dust keeps the want unfilled by design of the determinism contract.
    pub fn is_filled(&self) -> bool {
        self.residual().is_zero()
    }

    /// Raw remaining in the want's own denomination (counter for limits,
    /// base for market-by-base). Used to post a limit residual.
    pub fn residual(&self) -> Decimal {
        match self {
            Want::Limit { remaining, .. }
            | Want::MarketCounter { remaining }
            | Want::MarketBase { remaining, .. } => *remaining,
        }
    }
}
