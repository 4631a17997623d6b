//! Result pipeline.
//!
//! Drains the matcher's result channel without blocking, batches up to
//! `max_batch` results, persists each batch in one transaction and then
//! acknowledges the input event of the last result in the batch. No-op
//! results never touch the ack queue or the batch.

use super::{ExchangeError, SharedAcks};
use crate::db::events::AckHandle;
use crate::db::results;
use crate::metrics;
use crate::services::matching::{MatchResult, ResultType};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct Pipeline {
    pool: PgPool,
    acks: SharedAcks,
    max_batch: usize,
}

impl Pipeline {
    pub fn new(pool: PgPool, acks: SharedAcks, max_batch: usize) -> Self {
        Self {
            pool,
            acks,
            max_batch,
        }
    }

    pub async fn run(
        self,
        mut output: mpsc::Receiver<MatchResult>,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError> {
        let mut batch: Vec<MatchResult> = Vec::new();
        let mut last_handle: Option<Box<dyn AckHandle>> = None;

        loop {
            if cancel.is_cancelled() {
                // In-flight batch is abandoned, not acked; replay covers it.
                return Ok(());
            }

            match output.try_recv() {
                Ok(result) => {
                    let admitted = self.admit(&mut batch, &mut last_handle, result)?;
                    if admitted && batch.len() >= self.max_batch {
                        self.flush(&mut batch, &mut last_handle).await?;
                    }
                }
                Err(TryRecvError::Empty) => {
                    if batch.is_empty() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(IDLE_SLEEP) => {}
                        }
                    } else {
                        self.flush(&mut batch, &mut last_handle).await?;
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    self.flush(&mut batch, &mut last_handle).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Admit one result into the batch, popping and checking its ack handle.
    /// Returns false for no-op results, which carry no handle.
    fn admit(
        &self,
        batch: &mut Vec<MatchResult>,
        last_handle: &mut Option<Box<dyn AckHandle>>,
        result: MatchResult,
    ) -> Result<bool, ExchangeError> {
        if result.result_type == ResultType::CommandUnknown {
            return Ok(false);
        }

        let handle = {
            let mut acks = self.acks.lock();
            acks.queue.pop_front()
        }
        .ok_or(ExchangeError::AckMissing(result.sequence))?;

        if handle.sequence() != result.sequence {
            return Err(ExchangeError::AckMismatch {
                want: result.sequence,
                got: handle.sequence(),
            });
        }

        *last_handle = Some(handle);
        batch.push(result);
        Ok(true)
    }

    /// Persist the batch, then ack the last popped handle. The underlying
    /// log treats acking handle N as acknowledging all prior ones.
    async fn flush(
        &self,
        batch: &mut Vec<MatchResult>,
        last_handle: &mut Option<Box<dyn AckHandle>>,
    ) -> Result<(), ExchangeError> {
        if batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(batch);
        let start_seq = batch[0].sequence;
        let end_seq = batch[batch.len() - 1].sequence;

        results::create(&self.pool, &batch).await?;
        metrics::record_batch_persisted(batch.len());

        if let Some(handle) = last_handle.take() {
            handle.ack().await.map_err(ExchangeError::Ack)?;
        }

        debug!(start_seq, end_seq, size = batch.len(), "persisted result batch");
        Ok(())
    }
}
