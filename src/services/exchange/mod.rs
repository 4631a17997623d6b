//! Event-Sourced Exchange Runner
//!
//! Glues the matching core to the event log:
//!
//! ```text
//! order_events ─→ Sequencer ─→ Command channel ─→ Matcher driver
//!                    │                                  │
//!                    └──── shared ack FIFO ────┐        ↓
//!                                              │   MatchResult channel
//!                                              ↓        ↓
//!                                        Result pipeline (batch, persist, ack)
//!                                                       ↓
//!                                  results + result_events ─→ Result consumer
//!                                                                  ↓
//!                                                       trades + orders FSM
//! ```
//!
//! All four tasks run under one cancellation token; the first task error
//! cancels the rest and is returned, so the process can restart and replay
//! from the last committed cursor.

pub mod consumer;
pub mod pipeline;
pub mod sequencer;

use crate::db::events::AckHandle;
use crate::db::{cursors, results, StoreError};
use crate::services::matching::{self, Command, MatchError, MatchResult, OrderBook, ResultType};
use parking_lot::Mutex;
use self::sequencer::Sequencer;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cursor name of the matcher's order event consumer.
pub const MATCHER_CURSOR: &str = "matcher";

/// Cursor name of the result consumer.
pub const RESULTS_CURSOR: &str = "results";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("result ack not found: want {want}, got {got}")]
    AckMismatch { want: i64, got: i64 },

    #[error("result ack queue empty at sequence {0}")]
    AckMissing(i64),

    #[error("command channel closed")]
    InputClosed,

    #[error("event {id} missing metadata")]
    MissingMetadata { id: i64 },

    #[error("ack failed: {0}")]
    Ack(#[source] anyhow::Error),

    #[error("task failed: {0}")]
    Task(String),
}

/// Ack bookkeeping shared between the sequencer (push) and the result
/// pipeline (pop). One mutex, no I/O inside the critical section.
pub struct AckState {
    pub queue: VecDeque<Box<dyn AckHandle>>,
    pub last_ack: i64,
}

pub type SharedAcks = Arc<Mutex<AckState>>;

pub struct ExchangeOptions {
    pub base_scale: u32,
    pub max_batch: usize,
    pub input_capacity: usize,
    pub output_capacity: usize,
    pub snap: Option<Box<dyn FnMut(&OrderBook) + Send>>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            base_scale: 8,
            max_batch: 100,
            input_capacity: 1000,
            output_capacity: 1000,
            snap: None,
        }
    }
}

/// Run the exchange until cancellation or the first task error.
pub async fn run(
    pool: PgPool,
    opts: ExchangeOptions,
    cancel: CancellationToken,
) -> Result<(), ExchangeError> {
    let cursor = cursors::get_cursor(&pool, MATCHER_CURSOR).await?;
    let book = build_order_book(&pool, cursor, opts.base_scale).await?;
    info!(
        sequence = book.sequence,
        bids = book.bids.len(),
        asks = book.asks.len(),
        "order book rebuilt"
    );

    let (input_tx, input_rx) = mpsc::channel::<Command>(opts.input_capacity);
    let (output_tx, output_rx) = mpsc::channel::<MatchResult>(opts.output_capacity);

    // Seed last_ack from the cursor so replay never synthesizes gap
    // commands below the recovery point.
    let acks: SharedAcks = Arc::new(Mutex::new(AckState {
        queue: VecDeque::new(),
        last_ack: cursor,
    }));

    let mut tasks: JoinSet<Result<(), ExchangeError>> = JoinSet::new();

    {
        let sequencer = Sequencer::new(pool.clone(), acks.clone(), input_tx);
        let cancel = cancel.clone();
        tasks.spawn(async move { sequencer.run(cancel).await });
    }

    {
        let scale = opts.base_scale;
        let snap = opts.snap.unwrap_or_else(|| Box::new(|_: &OrderBook| {}));
        let cancel = cancel.clone();
        tasks.spawn(async move {
            matching::driver::run(book, input_rx, output_tx, scale, snap, cancel)
                .await
                .map_err(ExchangeError::from)
        });
    }

    {
        let pipeline = pipeline::Pipeline::new(pool.clone(), acks.clone(), opts.max_batch);
        let cancel = cancel.clone();
        tasks.spawn(async move { pipeline.run(output_rx, cancel).await });
    }

    {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { consumer::run(pool, cancel).await });
    }

    // First completion wins; everything else is torn down behind it.
    let mut first = Ok(());
    if let Some(joined) = tasks.join_next().await {
        first = flatten(joined);
        cancel.cancel();
    }
    while let Some(joined) = tasks.join_next().await {
        let res = flatten(joined);
        if first.is_ok() {
            first = res;
        }
    }

    first
}

fn flatten(
    joined: Result<Result<(), ExchangeError>, tokio::task::JoinError>,
) -> Result<(), ExchangeError> {
    match joined {
        Ok(res) => res,
        Err(err) => Err(ExchangeError::Task(err.to_string())),
    }
}

/// Rebuild the book by replaying the commands carried in committed results
/// up to `seq` against an empty book. Duplicate batches from at-least-once
/// persistence are skipped by sequence.
pub async fn build_order_book(
    pool: &PgPool,
    seq: i64,
    scale: u32,
) -> Result<OrderBook, ExchangeError> {
    let mut book = OrderBook::default();
    if seq == 0 {
        return Ok(book);
    }

    for batch in results::list_upto(pool, seq).await? {
        for result in batch.results {
            if result.sequence > seq || result.sequence <= book.sequence {
                continue;
            }
            if result.result_type == ResultType::CommandOld {
                continue;
            }

            matching::apply(&mut book, &result.command, scale)?;
            book.sequence = result.sequence;
        }
    }

    Ok(book)
}
