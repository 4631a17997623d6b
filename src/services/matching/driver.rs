//! Sequential matching loop.
//!
//! Bridges the asynchronous command stream and the strictly serial matching
//! core. The book is owned by this task alone; the only suspension points
//! are the input receive and the output send, so backpressure from a slow
//! result pipeline flows straight back to the sequencer.

use super::book::apply;
use super::types::*;
use crate::metrics;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Apply commands from `input` to the book in sequence order, sending one
/// result per command to `output`.
///
/// Commands at or below the book sequence are replays and produce
/// `CommandOld`; a gap above `book.sequence + 1` violates the replay
/// invariant and is fatal. `snap` is invoked with the book after every
/// applied command.
pub async fn run(
    mut book: OrderBook,
    mut input: mpsc::Receiver<Command>,
    output: mpsc::Sender<MatchResult>,
    scale: u32,
    mut snap: impl FnMut(&OrderBook),
    cancel: CancellationToken,
) -> Result<(), MatchError> {
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            cmd = input.recv() => match cmd {
                Some(cmd) => cmd,
                None => return Ok(()),
            },
        };

        if cmd.sequence <= book.sequence {
            debug!(
                sequence = cmd.sequence,
                book_sequence = book.sequence,
                "ignoring old command"
            );
            let result = MatchResult {
                sequence: cmd.sequence,
                order_id: cmd.order_id,
                result_type: ResultType::CommandOld,
                trades: Vec::new(),
                command: cmd,
            };
            if output.send(result).await.is_err() {
                return Err(MatchError::OutputClosed);
            }
            continue;
        }

        if cmd.sequence > book.sequence + 1 {
            return Err(MatchError::OutOfOrderCommand {
                expect: book.sequence + 1,
                got: cmd.sequence,
            });
        }

        let started = Instant::now();
        let (result_type, trades) = apply(&mut book, &cmd, scale)?;
        book.sequence = cmd.sequence;

        metrics::record_command_applied(result_type.as_str(), started.elapsed().as_secs_f64());
        if !trades.is_empty() {
            metrics::record_trades_executed(trades.len());
        }

        let result = MatchResult {
            sequence: cmd.sequence,
            order_id: cmd.order_id,
            result_type,
            trades,
            command: cmd,
        };
        if output.send(result).await.is_err() {
            return Err(MatchError::OutputClosed);
        }

        snap(&book);
    }
}
