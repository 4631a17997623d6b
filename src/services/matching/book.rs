//! Price-time priority matching.
//!
//! `apply` is a pure, deterministic function over the book: the same
//! (book, command, scale) always produces the same book mutation and the
//! same trade sequence, byte for byte on the decimal representations.

use super::types::*;
use super::want::Want;
use rust_decimal::Decimal;

/// Apply one command to the book, returning the result type and any trades.
pub fn apply(
    book: &mut OrderBook,
    cmd: &Command,
    scale: u32,
) -> Result<(ResultType, Vec<Trade>), MatchError> {
    match cmd.command_type {
        CommandType::Unknown => Ok((ResultType::CommandUnknown, Vec::new())),

        CommandType::Cancel => {
            if cancel_order(book, cmd) {
                Ok((ResultType::Cancelled, Vec::new()))
            } else {
                Ok((ResultType::CancelFailed, Vec::new()))
            }
        }

        CommandType::PostOnly => {
            if post_limit(book, cmd, cmd.limit_volume) {
                Ok((ResultType::Posted, Vec::new()))
            } else {
                Ok((ResultType::PostFailed, Vec::new()))
            }
        }

        CommandType::Market => {
            let mut want = if cmd.is_buy {
                Want::MarketBase {
                    remaining: cmd.market_base,
                    scale,
                }
            } else {
                Want::MarketCounter {
                    remaining: cmd.market_counter,
                }
            };

            let trades = trade(book, cmd, &mut want);

            let typ = if want.is_filled() {
                ResultType::MarketFull
            } else if trades.is_empty() {
                ResultType::MarketEmpty
            } else {
                ResultType::MarketPartial
            };
            Ok((typ, trades))
        }

        CommandType::Limit => {
            let mut want = Want::Limit {
                price: cmd.limit_price,
                remaining: cmd.limit_volume,
            };

            let trades = trade(book, cmd, &mut want);

            if want.is_filled() {
                return Ok((ResultType::LimitTaker, trades));
            }

            // A partially filled limit can never cross again.
            if !post_limit(book, cmd, want.residual()) {
                return Err(MatchError::ResidualPostFailed {
                    sequence: cmd.sequence,
                });
            }

            let typ = if trades.is_empty() {
                ResultType::LimitMaker
            } else {
                ResultType::LimitPartial
            };
            Ok((typ, trades))
        }
    }
}

/// Walk the opposite ladder from the head, consuming makers until the want
/// is satisfied or the price bound stops the walk.
fn trade(book: &mut OrderBook, cmd: &Command, want: &mut Want) -> Vec<Trade> {
    let side = if cmd.is_buy {
        // Buy orders match asks.
        &mut book.asks
    } else {
        // Sell orders match bids.
        &mut book.bids
    };

    let mut trades = Vec::new();
    let mut pop = 0; // Number of fully filled makers to pop off the head.

    for i in 0..side.len() {
        let maker_price = side[i].price;
        let maker_remaining = side[i].remaining;

        // A maker inside the want's limit means trading is done.
        // A zero limit never stops the walk.
        if is_inside(maker_price, want.price_limit(), !cmd.is_buy) {
            break;
        }

        let mut t = Trade {
            maker_order_id: side[i].id,
            taker_order_id: cmd.order_id,
            maker_filled: false,
            volume: Decimal::ZERO,
            price: maker_price,
            is_buy: cmd.is_buy,
        };

        let want_remaining = want.remaining(maker_price);
        let diff = want_remaining - maker_remaining;

        if diff < Decimal::ZERO {
            // Taker filled by a partial maker.
            want.set_filled();
            t.volume = want_remaining;
            side[i].remaining = diff.abs();
        } else if diff > Decimal::ZERO {
            // Maker filled, taker keeps going.
            want.fill(maker_remaining, maker_price);
            t.volume = maker_remaining;
            t.maker_filled = true;
            pop += 1;
        } else {
            // Both filled.
            want.set_filled();
            t.volume = maker_remaining;
            t.maker_filled = true;
            pop += 1;
        }

        trades.push(t);
        if want.is_filled() {
            break;
        }
    }

    side.drain(..pop);

    trades
}

/// Rest a limit order on the book, or return false if it would cross the
/// opposite top of book (equal prices cross).
fn post_limit(book: &mut OrderBook, cmd: &Command, remaining: Decimal) -> bool {
    if cmd.is_buy {
        // A buy matching the lowest ask may not post.
        if let Some(top) = book.asks.first() {
            if !is_inside(top.price, cmd.limit_price, false) {
                return false;
            }
        }
    } else {
        // A sell matching the highest bid may not post.
        if let Some(top) = book.bids.first() {
            if !is_inside(top.price, cmd.limit_price, true) {
                return false;
            }
        }
    }

    let side = if cmd.is_buy {
        &mut book.bids
    } else {
        &mut book.asks
    };

    // Insert before the first entry the new price is strictly better than.
    // Equal prices are passed over, which keeps time priority.
    let idx = side
        .iter()
        .position(|o| is_inside(o.price, cmd.limit_price, cmd.is_buy))
        .unwrap_or(side.len());

    side.insert(
        idx,
        BookOrder {
            id: cmd.order_id,
            price: cmd.limit_price,
            remaining,
        },
    );
    true
}

/// Remove the order from the side named by the command, returning whether
/// it was found.
fn cancel_order(book: &mut OrderBook, cmd: &Command) -> bool {
    let side = if cmd.is_buy {
        &mut book.bids
    } else {
        &mut book.asks
    };

    match side.iter().position(|o| o.id == cmd.order_id) {
        Some(idx) => {
            side.remove(idx);
            true
        }
        None => false,
    }
}

/// Whether `price` is strictly inside the resting `order_price`: higher for
/// bids, lower for asks. Equal is not inside, and a zero price is never
/// inside.
fn is_inside(order_price: Decimal, price: Decimal, is_bid: bool) -> bool {
    if price.is_zero() {
        return false;
    }
    if order_price == price {
        return false;
    }

    let price_higher = order_price < price;
    let price_lower = order_price > price;
    is_bid && price_higher || !is_bid && price_lower
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(seq: i64, id: i64, is_buy: bool, price: Decimal, volume: Decimal) -> Command {
        Command {
            sequence: seq,
            command_type: CommandType::Limit,
            is_buy,
            order_id: id,
            limit_price: price,
            limit_volume: volume,
            ..Default::default()
        }
    }

    fn post_only(seq: i64, id: i64, is_buy: bool, price: Decimal, volume: Decimal) -> Command {
        Command {
            command_type: CommandType::PostOnly,
            ..limit(seq, id, is_buy, price, volume)
        }
    }

    fn market_buy(seq: i64, id: i64, base: Decimal) -> Command {
        Command {
            sequence: seq,
            command_type: CommandType::Market,
            is_buy: true,
            order_id: id,
            market_base: base,
            ..Default::default()
        }
    }

    fn market_sell(seq: i64, id: i64, counter: Decimal) -> Command {
        Command {
            sequence: seq,
            command_type: CommandType::Market,
            is_buy: false,
            order_id: id,
            market_counter: counter,
            ..Default::default()
        }
    }

    fn cancel(seq: i64, id: i64, is_buy: bool) -> Command {
        Command {
            sequence: seq,
            command_type: CommandType::Cancel,
            is_buy,
            order_id: id,
            ..Default::default()
        }
    }

    fn entry(id: i64, price: Decimal, remaining: Decimal) -> BookOrder {
        BookOrder {
            id,
            price,
            remaining,
        }
    }

    fn must_apply(book: &mut OrderBook, cmd: &Command) -> (ResultType, Vec<Trade>) {
        apply(book, cmd, 8).unwrap()
    }

    #[test]
    fn test_post_only_no_cross() {
        let mut book = OrderBook::default();

        let (typ, trades) = must_apply(&mut book, &post_only(1, 1, true, dec!(99), dec!(1)));
        assert_eq!(typ, ResultType::Posted);
        assert!(trades.is_empty());

        let (typ, _) = must_apply(&mut book, &post_only(2, 2, false, dec!(101), dec!(1)));
        assert_eq!(typ, ResultType::Posted);

        assert_eq!(book.bids, vec![entry(1, dec!(99), dec!(1))]);
        assert_eq!(book.asks, vec![entry(2, dec!(101), dec!(1))]);
    }

    #[test]
    fn test_post_only_crosses() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 1, true, dec!(99), dec!(1)));
        must_apply(&mut book, &post_only(2, 2, false, dec!(101), dec!(1)));
        let before = book.clone();

        let (typ, trades) = must_apply(&mut book, &post_only(3, 3, true, dec!(101), dec!(1)));
        assert_eq!(typ, ResultType::PostFailed);
        assert!(trades.is_empty());
        assert_eq!(book, before);
    }

    #[test]
    fn test_post_only_equal_price_crosses() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 1, false, dec!(100), dec!(1)));

        let (typ, _) = must_apply(&mut book, &post_only(2, 2, true, dec!(100), dec!(1)));
        assert_eq!(typ, ResultType::PostFailed);
    }

    #[test]
    fn test_limit_taker_full() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 1, true, dec!(99), dec!(1)));
        must_apply(&mut book, &post_only(2, 2, false, dec!(101), dec!(1)));

        let (typ, trades) = must_apply(&mut book, &limit(3, 3, true, dec!(101), dec!(1)));
        assert_eq!(typ, ResultType::LimitTaker);
        assert_eq!(
            trades,
            vec![Trade {
                maker_order_id: 2,
                taker_order_id: 3,
                maker_filled: true,
                volume: dec!(1),
                price: dec!(101),
                is_buy: true,
            }]
        );
        assert!(book.asks.is_empty());
        assert_eq!(book.bids, vec![entry(1, dec!(99), dec!(1))]);
    }

    #[test]
    fn test_limit_partial_rests_residual() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 2, false, dec!(101), dec!(1)));

        let (typ, trades) = must_apply(&mut book, &limit(2, 3, true, dec!(101), dec!(2)));
        assert_eq!(typ, ResultType::LimitPartial);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].volume, dec!(1));
        assert_eq!(trades[0].price, dec!(101));
        assert!(trades[0].maker_filled);
        assert!(book.asks.is_empty());
        assert_eq!(book.bids, vec![entry(3, dec!(101), dec!(1))]);
    }

    #[test]
    fn test_limit_maker_rests_whole() {
        let mut book = OrderBook::default();
        let (typ, trades) = must_apply(&mut book, &limit(1, 1, false, dec!(12), dec!(1)));
        assert_eq!(typ, ResultType::LimitMaker);
        assert!(trades.is_empty());
        assert_eq!(book.asks, vec![entry(1, dec!(12), dec!(1))]);
    }

    #[test]
    fn test_limit_taker_walks_levels() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, true, dec!(10), dec!(1)));
        must_apply(&mut book, &limit(2, 2, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(3, 3, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(4, 4, true, dec!(8), dec!(2)));

        // Sells into bids at and above 9, fully filled across two levels.
        let (typ, trades) = must_apply(&mut book, &limit(5, 5, false, dec!(9), dec!(2)));
        assert_eq!(typ, ResultType::LimitTaker);
        assert_eq!(trades.len(), 2);
        assert_eq!((trades[0].price, trades[0].volume), (dec!(10), dec!(1)));
        assert_eq!((trades[1].price, trades[1].volume), (dec!(9), dec!(1)));
        assert!(trades.iter().all(|t| !t.is_buy));
        assert_eq!(
            book.bids,
            vec![entry(3, dec!(9), dec!(1)), entry(4, dec!(8), dec!(2))]
        );
    }

    #[test]
    fn test_limit_partial_exhausts_crossable_levels() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, true, dec!(10), dec!(1)));
        must_apply(&mut book, &limit(2, 2, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(3, 3, true, dec!(8), dec!(2)));

        // Sell 5 at 9: takes the 10 and 9 bids, rests 3 as an ask at 9.
        let (typ, trades) = must_apply(&mut book, &limit(4, 4, false, dec!(9), dec!(5)));
        assert_eq!(typ, ResultType::LimitPartial);
        assert_eq!(trades.len(), 2);
        assert_eq!(book.bids, vec![entry(3, dec!(8), dec!(2))]);
        assert_eq!(book.asks, vec![entry(4, dec!(9), dec!(3))]);
    }

    #[test]
    fn test_market_by_counter_sell() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, true, dec!(10), dec!(1)));
        must_apply(&mut book, &limit(2, 2, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(3, 3, true, dec!(8), dec!(2)));

        let (typ, trades) = must_apply(&mut book, &market_sell(4, 4, dec!(3)));
        assert_eq!(typ, ResultType::MarketFull);
        assert_eq!(trades.len(), 3);
        assert_eq!((trades[0].price, trades[0].volume), (dec!(10), dec!(1)));
        assert_eq!((trades[1].price, trades[1].volume), (dec!(9), dec!(1)));
        assert_eq!((trades[2].price, trades[2].volume), (dec!(8), dec!(1)));
        assert!(trades[0].maker_filled && trades[1].maker_filled);
        assert!(!trades[2].maker_filled);
        assert_eq!(book.bids, vec![entry(3, dec!(8), dec!(1))]);
    }

    #[test]
    fn test_market_by_base_buy_exact_scale() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, false, dec!(10), dec!(1)));
        must_apply(&mut book, &limit(2, 2, false, dec!(11), dec!(1)));
        must_apply(&mut book, &limit(3, 3, false, dec!(12), dec!(2)));

        // 33 base buys exactly 1@10 + 1@11 + 1@12.
        let (typ, trades) = must_apply(&mut book, &market_buy(4, 4, dec!(33)));
        assert_eq!(typ, ResultType::MarketFull);
        assert_eq!(trades.len(), 3);
        assert_eq!((trades[0].price, trades[0].volume), (dec!(10), dec!(1)));
        assert_eq!((trades[1].price, trades[1].volume), (dec!(11), dec!(1)));
        assert_eq!((trades[2].price, trades[2].volume), (dec!(12), dec!(1)));
        assert_eq!(book.asks, vec![entry(3, dec!(12), dec!(1))]);
    }

    #[test]
    fn test_market_partial_and_empty() {
        let mut book = OrderBook::default();

        let (typ, trades) = must_apply(&mut book, &market_sell(1, 1, dec!(1)));
        assert_eq!(typ, ResultType::MarketEmpty);
        assert!(trades.is_empty());

        must_apply(&mut book, &limit(2, 2, true, dec!(10), dec!(1)));
        let (typ, trades) = must_apply(&mut book, &market_sell(3, 3, dec!(5)));
        assert_eq!(typ, ResultType::MarketPartial);
        assert_eq!(trades.len(), 1);
        assert!(book.bids.is_empty());
    }

    #[test]
    fn test_cancel_success_then_miss() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 1, false, dec!(10), dec!(1)));

        let (typ, _) = must_apply(&mut book, &cancel(2, 1, false));
        assert_eq!(typ, ResultType::Cancelled);
        assert!(book.asks.is_empty());

        let (typ, trades) = must_apply(&mut book, &cancel(3, 1, false));
        assert_eq!(typ, ResultType::CancelFailed);
        assert!(trades.is_empty());
    }

    #[test]
    fn test_cancel_only_scans_named_side() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &post_only(1, 1, false, dec!(10), dec!(1)));

        // Wrong side: the ask is not found among bids.
        let (typ, _) = must_apply(&mut book, &cancel(2, 1, true));
        assert_eq!(typ, ResultType::CancelFailed);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_ladder_ordering_and_time_priority() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(2, 2, true, dec!(10), dec!(1)));
        must_apply(&mut book, &limit(3, 3, true, dec!(9), dec!(1)));
        must_apply(&mut book, &limit(4, 4, true, dec!(8), dec!(1)));

        // Non-increasing, with id 1 ahead of id 3 at the shared level.
        let ids: Vec<i64> = book.bids.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);

        // FIFO: the older order at 9 trades first.
        let (_, trades) = must_apply(&mut book, &market_sell(5, 5, dec!(2)));
        assert_eq!(trades[0].maker_order_id, 2);
        assert_eq!(trades[1].maker_order_id, 1);
    }

    #[test]
    fn test_unknown_is_noop() {
        let mut book = OrderBook::default();
        must_apply(&mut book, &limit(1, 1, true, dec!(10), dec!(1)));
        let before = book.clone();

        let cmd = Command {
            sequence: 2,
            ..Default::default()
        };
        let (typ, trades) = must_apply(&mut book, &cmd);
        assert_eq!(typ, ResultType::CommandUnknown);
        assert!(trades.is_empty());
        assert_eq!(book, before);
    }

    #[test]
    fn test_is_inside() {
        // Zero price is never inside.
        assert!(!is_inside(dec!(10), dec!(0), true));
        // Equal is not inside.
        assert!(!is_inside(dec!(10), dec!(10), true));
        // Bids: higher is inside.
        assert!(is_inside(dec!(10), dec!(11), true));
        assert!(!is_inside(dec!(10), dec!(9), true));
        // Asks: lower is inside.
        assert!(is_inside(dec!(10), dec!(9), false));
        assert!(!is_inside(dec!(10), dec!(11), false));
    }

    #[test]
    fn test_determinism_replay() {
        let cmds = vec![
            limit(1, 1, false, dec!(12), dec!(1)),
            limit(2, 2, true, dec!(8), dec!(1)),
            post_only(3, 3, false, dec!(11), dec!(1)),
            post_only(4, 4, true, dec!(9), dec!(1)),
            limit(5, 5, false, dec!(9), dec!(1)),
            market_buy(6, 6, dec!(11)),
            cancel(7, 1, false),
            market_sell(8, 8, dec!(2)),
        ];

        let run = || {
            let mut book = OrderBook::default();
            let mut out = Vec::new();
            for cmd in &cmds {
                out.push(apply(&mut book, cmd, 8).unwrap());
            }
            (book, out)
        };

        assert_eq!(run(), run());
    }
}
