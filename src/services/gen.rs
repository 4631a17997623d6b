//! Deterministic load generator.
//!
//! Optional background service that feeds the orders FSM a reproducible mix
//! of limit, post-only and market orders with fuzzed prices and volumes,
//! cancelling a fraction of resting limits. The op plan is generated
//! up-front from the seed, so the same configuration always produces the
//! same submission sequence.

use crate::config::AppConfig;
use crate::db::{orders, StoreError};
use crate::metrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GenConfig {
    pub count: u32,
    pub seed: u64,
    pub price: Decimal,
    pub amount: Decimal,
    /// Fuzz applied to price and amount, in basis points of the mean.
    pub fuzz_bps: i64,
    /// Probability a limit order is later cancelled, in basis points.
    pub cancel_prob_bps: i64,
    pub scale: u32,
}

impl GenConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            count: config.gen_count,
            seed: config.gen_seed,
            price: Decimal::from_str(&config.gen_price).unwrap_or(Decimal::ONE_HUNDRED),
            amount: Decimal::from_str(&config.gen_amount).unwrap_or(Decimal::ONE),
            fuzz_bps: config.gen_fuzz_bps,
            cancel_prob_bps: config.gen_cancel_prob_bps,
            scale: config.base_scale,
        }
    }
}

/// One planned submission. Cancels refer to previously tracked limit
/// orders by position, resolved against live ids at execution time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GenOp {
    Limit {
        is_buy: bool,
        price: Decimal,
        volume: Decimal,
        post_only: bool,
        track_cancel: bool,
    },
    MarketBuy {
        base: Decimal,
    },
    MarketSell {
        counter: Decimal,
    },
    CancelHead,
    CancelTail,
}

/// Deterministic op plan for the configuration.
pub fn plan(config: &GenConfig) -> Vec<GenOp> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut ops = Vec::with_capacity(config.count as usize);

    for _ in 0..config.count {
        let is_buy = rng.gen_bool(0.5);
        let price = fuzz(&mut rng, config.price, config.fuzz_bps, config.scale);
        let volume = fuzz(&mut rng, config.amount, config.fuzz_bps, config.scale);

        // Mostly resting flow with some market takers, like real traffic.
        let kind = rng.gen_range(0..10);
        if kind < 2 {
            if is_buy {
                ops.push(GenOp::MarketBuy {
                    base: (price * volume).round_dp(config.scale),
                });
            } else {
                ops.push(GenOp::MarketSell { counter: volume });
            }
        } else {
            ops.push(GenOp::Limit {
                is_buy,
                price,
                volume,
                post_only: kind < 5,
                track_cancel: rng.gen_range(0..10_000) < config.cancel_prob_bps,
            });
        }

        // Maybe cancel one tracked order, picking either end.
        if rng.gen_range(0..10_000) < config.cancel_prob_bps {
            if rng.gen_bool(0.5) {
                ops.push(GenOp::CancelHead);
            } else {
                ops.push(GenOp::CancelTail);
            }
        }
    }

    ops
}

fn fuzz(rng: &mut StdRng, mean: Decimal, fuzz_bps: i64, scale: u32) -> Decimal {
    let jitter = rng.gen_range(-fuzz_bps..=fuzz_bps);
    let factor = Decimal::from(10_000 + jitter) / Decimal::from(10_000);
    (mean * factor).round_dp(scale)
}

/// Execute the plan against the orders FSM.
pub async fn run(
    pool: PgPool,
    config: GenConfig,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    info!(count = config.count, seed = config.seed, "order generator starting");

    let mut cancels: Vec<i64> = Vec::new();

    for op in plan(&config) {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match op {
            GenOp::Limit {
                is_buy,
                price,
                volume,
                post_only,
                track_cancel,
            } => {
                let id = orders::create_limit(&pool, is_buy, price, volume, post_only).await?;
                if track_cancel {
                    cancels.push(id);
                }
            }
            GenOp::MarketBuy { base } => {
                orders::create_market_buy(&pool, base).await?;
            }
            GenOp::MarketSell { counter } => {
                orders::create_market_sell(&pool, counter).await?;
            }
            GenOp::CancelHead | GenOp::CancelTail => {
                let id = if matches!(op, GenOp::CancelHead) {
                    if cancels.is_empty() {
                        continue;
                    }
                    cancels.remove(0)
                } else {
                    match cancels.pop() {
                        Some(id) => id,
                        None => continue,
                    }
                };

                if let Err(err) = orders::request_cancel(&pool, id).await {
                    // The matcher may have completed it already.
                    warn!(order_id = id, error = %err, "generated cancel rejected");
                }
            }
        }

        metrics::record_order_generated();
    }

    info!("order generator done");
    Ok(())
}
