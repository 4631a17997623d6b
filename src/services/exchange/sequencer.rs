//! Order event sequencer.
//!
//! Tails the `order_events` log and turns it into the matcher's contiguous
//! command stream. Only `pending` and `cancelling` transitions become real
//! commands; every other event id is covered by synthesized no-op commands
//! so the matcher sees sequence numbers without holes. The ack handle for
//! each real command is pushed onto the shared FIFO in command order.

use super::{ExchangeError, SharedAcks, MATCHER_CURSOR};
use crate::db::events::{Event, EventAck, ORDER_EVENTS};
use crate::metrics;
use crate::models::{CancelOrderPayload, CreateOrderPayload, OrderStatus, OrderType};
use crate::services::matching::{Command, CommandType};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const STREAM_BATCH: i64 = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct Sequencer {
    pool: PgPool,
    acks: SharedAcks,
    input: mpsc::Sender<Command>,
}

impl Sequencer {
    pub fn new(pool: PgPool, acks: SharedAcks, input: mpsc::Sender<Command>) -> Self {
        Self { pool, acks, input }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), ExchangeError> {
        let mut from = self.acks.lock().last_ack;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match ORDER_EVENTS.next_batch(&self.pool, from, STREAM_BATCH).await {
                Ok(batch) if batch.is_empty() => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
                Ok(batch) => {
                    for event in batch {
                        from = event.id;
                        self.handle_event(&event).await?;
                    }
                }
                Err(err) => {
                    // Stream errors don't affect state; restart the poll.
                    warn!(error = %err, "order event stream failed, restarting");
                    from = self.acks.lock().last_ack;
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                    }
                }
            }
        }
    }

    pub(crate) async fn handle_event(&self, event: &Event) -> Result<(), ExchangeError> {
        let cmd = match decode_command(event)? {
            Some(cmd) => cmd,
            None => return Ok(()), // Status we don't care about; leave the gap.
        };

        let ack = EventAck::new(self.pool.clone(), MATCHER_CURSOR, event.id);

        let prev = {
            let mut acks = self.acks.lock();
            if acks.last_ack >= cmd.sequence {
                // Event already enqueued.
                return Ok(());
            }
            let prev = acks.last_ack;
            acks.last_ack = cmd.sequence;
            acks.queue.push_back(Box::new(ack));
            prev
        };

        // The matcher requires sequential commands; fill the holes left by
        // the transitions filtered out above.
        for sequence in prev + 1..cmd.sequence {
            metrics::record_gap_command();
            self.send(Command {
                sequence,
                ..Default::default()
            })
            .await?;
        }

        metrics::record_event_sequenced(&event.event_type);
        self.send(cmd).await
    }

    async fn send(&self, cmd: Command) -> Result<(), ExchangeError> {
        self.input
            .send(cmd)
            .await
            .map_err(|_| ExchangeError::InputClosed)
    }
}

/// Translate an order event into a matcher command, or `None` for
/// transitions the matcher does not consume.
pub(crate) fn decode_command(event: &Event) -> Result<Option<Command>, ExchangeError> {
    if event.event_type == OrderStatus::Pending.as_str() {
        let metadata = event
            .metadata
            .as_ref()
            .ok_or(ExchangeError::MissingMetadata { id: event.id })?;
        let payload: CreateOrderPayload = serde_json::from_value(metadata.clone())?;

        let command_type = match payload.order_type {
            OrderType::Limit => CommandType::Limit,
            OrderType::Market => CommandType::Market,
            OrderType::PostOnly => CommandType::PostOnly,
        };

        Ok(Some(Command {
            sequence: event.id,
            command_type,
            is_buy: payload.is_buy,
            order_id: event.foreign_id,
            limit_price: payload.limit_price,
            limit_volume: payload.limit_volume,
            market_base: payload.market_base,
            market_counter: payload.market_counter,
        }))
    } else if event.event_type == OrderStatus::Cancelling.as_str() {
        let metadata = event
            .metadata
            .as_ref()
            .ok_or(ExchangeError::MissingMetadata { id: event.id })?;
        let payload: CancelOrderPayload = serde_json::from_value(metadata.clone())?;

        Ok(Some(Command {
            sequence: event.id,
            command_type: CommandType::Cancel,
            is_buy: payload.is_buy,
            order_id: event.foreign_id,
            ..Default::default()
        }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::exchange::AckState;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap()
    }

    fn pending_event(id: i64, order_id: i64, payload: &CreateOrderPayload) -> Event {
        Event {
            id,
            foreign_id: order_id,
            event_type: "pending".to_string(),
            metadata: Some(serde_json::to_value(payload).unwrap()),
            created_at: chrono::Utc::now(),
        }
    }

    fn limit_payload(price: Decimal, volume: Decimal) -> CreateOrderPayload {
        CreateOrderPayload {
            order_type: OrderType::Limit,
            is_buy: true,
            limit_price: price,
            limit_volume: volume,
            market_base: Decimal::ZERO,
            market_counter: Decimal::ZERO,
        }
    }

    fn sequencer(last_ack: i64, capacity: usize) -> (Sequencer, mpsc::Receiver<Command>, SharedAcks) {
        let acks: SharedAcks = Arc::new(Mutex::new(AckState {
            queue: VecDeque::new(),
            last_ack,
        }));
        let (tx, rx) = mpsc::channel(capacity);
        (Sequencer::new(lazy_pool(), acks.clone(), tx), rx, acks)
    }

    #[test]
    fn test_decode_pending_limit() {
        let payload = limit_payload(dec!(99), dec!(2));
        let event = pending_event(7, 3, &payload);

        let cmd = decode_command(&event).unwrap().unwrap();
        assert_eq!(cmd.sequence, 7);
        assert_eq!(cmd.command_type, CommandType::Limit);
        assert_eq!(cmd.order_id, 3);
        assert_eq!(cmd.limit_price, dec!(99));
        assert_eq!(cmd.limit_volume, dec!(2));
        assert!(cmd.is_buy);
    }

    #[test]
    fn test_decode_cancelling() {
        let event = Event {
            id: 9,
            foreign_id: 4,
            event_type: "cancelling".to_string(),
            metadata: Some(serde_json::to_value(CancelOrderPayload { is_buy: false }).unwrap()),
            created_at: chrono::Utc::now(),
        };

        let cmd = decode_command(&event).unwrap().unwrap();
        assert_eq!(cmd.command_type, CommandType::Cancel);
        assert_eq!(cmd.sequence, 9);
        assert_eq!(cmd.order_id, 4);
        assert!(!cmd.is_buy);
        assert!(cmd.limit_price.is_zero());
    }

    #[test]
    fn test_decode_ignores_other_transitions() {
        for event_type in ["posted", "complete"] {
            let event = Event {
                id: 1,
                foreign_id: 1,
                event_type: event_type.to_string(),
                metadata: None,
                created_at: chrono::Utc::now(),
            };
            assert!(decode_command(&event).unwrap().is_none());
        }
    }

    #[test]
    fn test_decode_missing_metadata_is_fatal() {
        let event = Event {
            id: 2,
            foreign_id: 1,
            event_type: "pending".to_string(),
            metadata: None,
            created_at: chrono::Utc::now(),
        };
        assert!(matches!(
            decode_command(&event),
            Err(ExchangeError::MissingMetadata { id: 2 })
        ));
    }

    #[tokio::test]
    async fn test_gap_fill() {
        let (sequencer, mut rx, acks) = sequencer(0, 16);
        let payload = limit_payload(dec!(100), dec!(1));

        sequencer
            .handle_event(&pending_event(1, 1, &payload))
            .await
            .unwrap();
        sequencer
            .handle_event(&pending_event(4, 4, &payload))
            .await
            .unwrap();

        let mut sequences = Vec::new();
        let mut types = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            sequences.push(cmd.sequence);
            types.push(cmd.command_type);
        }
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(
            types,
            vec![
                CommandType::Limit,
                CommandType::Unknown,
                CommandType::Unknown,
                CommandType::Limit,
            ]
        );

        let acks = acks.lock();
        assert_eq!(acks.last_ack, 4);
        assert_eq!(acks.queue.len(), 2);
        assert_eq!(acks.queue[0].sequence(), 1);
        assert_eq!(acks.queue[1].sequence(), 4);
    }

    #[tokio::test]
    async fn test_replayed_event_dropped() {
        let (sequencer, mut rx, acks) = sequencer(5, 16);
        let payload = limit_payload(dec!(100), dec!(1));

        sequencer
            .handle_event(&pending_event(4, 4, &payload))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        let acks = acks.lock();
        assert_eq!(acks.last_ack, 5);
        assert!(acks.queue.is_empty());
    }

    #[tokio::test]
    async fn test_no_gaps_below_seeded_cursor() {
        // A restart with cursor 10 must not synthesize commands 1..=10.
        let (sequencer, mut rx, _) = sequencer(10, 16);
        let payload = limit_payload(dec!(100), dec!(1));

        sequencer
            .handle_event(&pending_event(12, 12, &payload))
            .await
            .unwrap();

        let mut sequences = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            sequences.push(cmd.sequence);
        }
        assert_eq!(sequences, vec![11, 12]);
    }
}
