// stoic_core/src/trade.rs

//! Closed trade records consumed by the optimizer.

use std::borrow::Cow;

/// Direction of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    #[serde(rename = "long", alias = "buy", alias = "LONG", alias = "BUY")]
    Long,
    #[serde(rename = "short", alias = "sell", alias = "SHORT", alias = "SELL")]
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// A single round-trip trade.
/// `timestamp` is the entry time in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub timestamp: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub side: Side,
}

impl Trade {
    pub fn new(
        timestamp: i64,
        entry_price: f64,
        exit_price: f64,
        quantity: f64,
        pnl: f64,
        side: Side,
    ) -> Self {
        Self { timestamp, entry_price, exit_price, quantity, pnl, side }
    }

    /// Capital committed at entry.
    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity.abs()
    }

    /// PnL relative to the committed notional; 0 when the notional is zero.
    pub fn return_fraction(&self) -> f64 {
        let notional = self.notional();
        if notional.abs() > f64::EPSILON {
            self.pnl / notional
        } else {
            0.0
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }

    /// UTC calendar day of the entry, `None` for out-of-range timestamps.
    pub fn calendar_day(&self) -> Option<chrono::NaiveDate> {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.timestamp)
            .map(|dt| dt.date_naive())
    }
}

/// Returns the trades in chronological order, cloning only when the input is unsorted.
pub fn chronological(trades: &[Trade]) -> Cow<'_, [Trade]> {
    let sorted = trades.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
    if sorted {
        Cow::Borrowed(trades)
    } else {
        let mut owned = trades.to_vec();
        owned.sort_by_key(|t| t.timestamp);
        Cow::Owned(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_fraction_uses_notional() {
        let trade = Trade::new(0, 100.0, 110.0, 2.0, 20.0, Side::Long);
        assert!((trade.return_fraction() - 0.1).abs() < 1e-12);

        let empty = Trade::new(0, 0.0, 0.0, 0.0, 5.0, Side::Long);
        assert_eq!(empty.return_fraction(), 0.0);
    }

    #[test]
    fn test_chronological_borrows_sorted_input() {
        let trades = vec![
            Trade::new(1, 1.0, 1.0, 1.0, 0.0, Side::Long),
            Trade::new(2, 1.0, 1.0, 1.0, 0.0, Side::Short),
        ];
        assert!(matches!(chronological(&trades), Cow::Borrowed(_)));

        let reversed: Vec<Trade> = trades.iter().rev().cloned().collect();
        let ordered = chronological(&reversed);
        assert!(matches!(ordered, Cow::Owned(_)));
        assert_eq!(ordered[0].timestamp, 1);
    }

    #[test]
    fn test_side_deserializes_aliases() {
        let side: Side = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(side, Side::Long);
        let side: Side = serde_json::from_str("\"short\"").unwrap();
        assert_eq!(side, Side::Short);
    }
}
