// stoic_core/src/simulation.rs

//! Replays a historical trade list under a candidate parameter set.
//! The optimizer only depends on the `TradeSimulator` trait, so callers can
//! plug in a full backtester instead of the default replay rules.

use crate::error::TunerResult;
use crate::parameters::ParameterSet;
use crate::trade::{self, Trade};

pub const STOP_LOSS: &str = "stop_loss";
pub const TAKE_PROFIT: &str = "take_profit";
pub const ENTRY_THRESHOLD: &str = "entry_threshold";
pub const EXIT_THRESHOLD: &str = "exit_threshold";

const MS_PER_MINUTE: f64 = 60_000.0;

/// Produces the trade list a strategy would have generated with `params`.
/// Implementations must be pure: they are called concurrently from the worker pool.
pub trait TradeSimulator: Send + Sync {
    fn simulate(&self, trades: &[Trade], params: &ParameterSet) -> TunerResult<Vec<Trade>>;
}

/// Default simulator: filters and reshapes the recorded trades.
///
/// * `stop_loss` floors each trade's return at `-stop_loss`.
/// * `take_profit` caps each trade's return at `take_profit`.
/// * `entry_threshold` skips entries less than that many minutes after the previous accepted one.
/// * `exit_threshold` limits position growth to that multiple of the previous accepted size.
///
/// Absent parameters disable their rule; unknown names are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySimulator;

impl ReplaySimulator {
    pub fn new() -> Self {
        Self
    }
}

impl TradeSimulator for ReplaySimulator {
    fn simulate(&self, trades: &[Trade], params: &ParameterSet) -> TunerResult<Vec<Trade>> {
        let stop_loss = params.get(STOP_LOSS).filter(|v| *v > 0.0);
        let take_profit = params.get(TAKE_PROFIT).filter(|v| *v > 0.0);
        let min_gap_ms = params.get(ENTRY_THRESHOLD).map(|m| m.max(0.0) * MS_PER_MINUTE);
        let max_growth = params.get(EXIT_THRESHOLD).filter(|v| *v > 0.0);

        let trades = trade::chronological(trades);
        let mut replayed: Vec<Trade> = Vec::with_capacity(trades.len());

        for original in trades.iter() {
            if let (Some(gap), Some(last)) = (min_gap_ms, replayed.last()) {
                if (original.timestamp.saturating_sub(last.timestamp) as f64) < gap {
                    continue;
                }
            }

            let mut quantity = original.quantity;
            if let (Some(growth), Some(last)) = (max_growth, replayed.last()) {
                let cap = last.quantity.abs() * growth;
                if quantity.abs() > cap && cap > 0.0 {
                    quantity = cap * quantity.signum();
                }
            }

            let mut ret = original.return_fraction();
            if let Some(sl) = stop_loss {
                ret = ret.max(-sl);
            }
            if let Some(tp) = take_profit {
                ret = ret.min(tp);
            }

            replayed.push(reshape(original, ret, quantity));
        }

        Ok(replayed)
    }
}

/// Rebuilds a trade with a new return and size, keeping entry time, price and side.
fn reshape(original: &Trade, ret: f64, quantity: f64) -> Trade {
    if original.notional().abs() <= f64::EPSILON {
        return original.clone();
    }

    let pnl = ret * original.entry_price * quantity.abs();
    let exit_price = original.entry_price * (1.0 + ret * original.side.sign());

    Trade::new(
        original.timestamp,
        original.entry_price,
        exit_price,
        quantity,
        pnl,
        original.side,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Side;

    const MINUTE: i64 = 60_000;

    fn history() -> Vec<Trade> {
        vec![
            Trade::new(0, 100.0, 90.0, 1.0, -10.0, Side::Long),
            Trade::new(2 * MINUTE, 100.0, 130.0, 3.0, 90.0, Side::Long),
            Trade::new(30 * MINUTE, 50.0, 45.0, 2.0, 10.0, Side::Short),
        ]
    }

    #[test]
    fn test_empty_parameters_replay_unchanged() {
        let replayed = ReplaySimulator::new().simulate(&history(), &ParameterSet::new()).unwrap();
        assert_eq!(replayed.len(), 3);
        for (a, b) in replayed.iter().zip(history().iter()) {
            assert!((a.pnl - b.pnl).abs() < 1e-9);
            assert!((a.exit_price - b.exit_price).abs() < 1e-9);
        }
    }

    #[test]
    fn test_stop_loss_and_take_profit_cap_returns() {
        let params = ParameterSet::new()
            .with_value(STOP_LOSS, 0.05)
            .with_value(TAKE_PROFIT, 0.2);
        let replayed = ReplaySimulator::new().simulate(&history(), &params).unwrap();

        assert!((replayed[0].pnl + 5.0).abs() < 1e-9);
        assert!((replayed[0].exit_price - 95.0).abs() < 1e-9);
        assert!((replayed[1].pnl - 60.0).abs() < 1e-9);
        assert!((replayed[1].exit_price - 120.0).abs() < 1e-9);
        // short: +10% return stays, exit below entry
        assert!((replayed[2].pnl - 10.0).abs() < 1e-9);
        assert!((replayed[2].exit_price - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_entry_threshold_skips_quick_entries() {
        let params = ParameterSet::new().with_value(ENTRY_THRESHOLD, 5.0);
        let replayed = ReplaySimulator::new().simulate(&history(), &params).unwrap();
        let stamps: Vec<i64> = replayed.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![0, 30 * MINUTE]);
    }

    #[test]
    fn test_exit_threshold_limits_size_growth() {
        let params = ParameterSet::new().with_value(EXIT_THRESHOLD, 1.5);
        let replayed = ReplaySimulator::new().simulate(&history(), &params).unwrap();
        assert!((replayed[1].quantity - 1.5).abs() < 1e-12);
        assert!((replayed[1].pnl - 45.0).abs() < 1e-9);
        assert!((replayed[2].quantity - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let trades = vec![
            Trade::new(i64::MIN, 100.0, 101.0, 1.0, 1.0, Side::Long),
            Trade::new(i64::MAX, 100.0, 99.0, 1.0, -1.0, Side::Long),
        ];
        let params = ParameterSet::new().with_value(ENTRY_THRESHOLD, 30.0);
        let replayed = ReplaySimulator::new().simulate(&trades, &params).unwrap();
        assert_eq!(replayed.len(), 2);
    }
}
