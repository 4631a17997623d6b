//! Result consumer.
//!
//! Independently tails the persisted result stream against its own cursor,
//! writes individual trade rows and advances the order FSM. The pipeline is
//! at-least-once, so every write here is idempotent: trade inserts dedupe on
//! `(seq, seq_idx)` and FSM updates carry the result sequence.

use super::{ExchangeError, RESULTS_CURSOR};
use crate::db::events::RESULT_EVENTS;
use crate::db::{cursors, orders, results, trades};
use crate::metrics;
use crate::services::matching::{MatchResult, ResultType};
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STREAM_BATCH: i64 = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Result types that complete the taker order.
fn completes_taker(result_type: ResultType) -> bool {
    matches!(
        result_type,
        ResultType::LimitTaker
            | ResultType::MarketEmpty
            | ResultType::MarketPartial
            | ResultType::MarketFull
            | ResultType::Cancelled
    )
}

/// Result types that rest the taker order on the book.
fn posts_taker(result_type: ResultType) -> bool {
    matches!(
        result_type,
        ResultType::Posted | ResultType::LimitMaker | ResultType::LimitPartial
    )
}

/// Orders completed by this result: every fully filled maker, plus the
/// taker when the result type is terminal.
fn completed_order_ids(result: &MatchResult) -> Vec<i64> {
    let mut completed: Vec<i64> = result
        .trades
        .iter()
        .filter(|t| t.maker_filled)
        .map(|t| t.maker_order_id)
        .collect();

    if completes_taker(result.result_type) {
        completed.push(result.order_id);
    }
    completed
}

pub async fn run(pool: PgPool, cancel: CancellationToken) -> Result<(), ExchangeError> {
    let mut from = cursors::get_cursor(&pool, RESULTS_CURSOR).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match RESULT_EVENTS.next_batch(&pool, from, STREAM_BATCH).await {
            Ok(batch) if batch.is_empty() => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Ok(batch) => {
                for event in batch {
                    let result_batch = results::lookup(&pool, event.foreign_id).await?;
                    debug!(
                        batch_id = result_batch.id,
                        start_seq = result_batch.start_seq,
                        end_seq = result_batch.end_seq,
                        "consuming result batch"
                    );
                    for result in &result_batch.results {
                        process_result(&pool, result).await?;
                    }
                    cursors::set_cursor(&pool, RESULTS_CURSOR, event.id).await?;
                    from = event.id;
                }
            }
            Err(err) => {
                warn!(error = %err, "result event stream failed, restarting");
                from = cursors::get_cursor(&pool, RESULTS_CURSOR)
                    .await
                    .unwrap_or(from);
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                }
            }
        }
    }
}

async fn process_result(pool: &PgPool, result: &MatchResult) -> Result<(), ExchangeError> {
    for (idx, trade) in result.trades.iter().enumerate() {
        trades::create(
            pool,
            &trades::CreateTradeReq {
                is_buy: trade.is_buy,
                seq: result.sequence,
                seq_idx: idx as i32,
                price: trade.price,
                volume: trade.volume,
                maker_order_id: trade.maker_order_id,
                taker_order_id: trade.taker_order_id,
            },
        )
        .await?;
        metrics::record_trade_recorded();
    }

    if posts_taker(result.result_type) {
        orders::update_posted(pool, result.order_id, result.sequence).await?;
        metrics::record_order_posted();
    }

    for id in completed_order_ids(result) {
        orders::complete(pool, id, result.sequence).await?;
        metrics::record_order_completed();
    }

    Ok(())
}
