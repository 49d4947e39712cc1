// stoic_core/src/behavior.rs

//! Behavioral-risk scoring of a trade sequence.
//! Detects revenge trading, overtrading and FOMO entries and condenses each
//! into a normalized score in [0, 1].

use itertools::Itertools;

use crate::trade;

/// Normalized behavioral-risk sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BehaviorScore {
    pub revenge_trading_score: f64,
    pub over_trading_score: f64,
    pub fomo_score: f64,
}

/// Detection thresholds. `Default` holds the calibrated constants.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BehaviorThresholds {
    /// Size ratio above which the next trade counts as upsized.
    pub size_increase_ratio: f64,
    /// Entries closer than this to the previous entry count as quick.
    pub quick_entry_ms: i64,
    /// Relative gap between previous exit and next entry that counts as chasing.
    pub price_chase_pct: f64,
    /// Pairs with a revenge probability above this are tagged.
    pub revenge_probability: f64,
    /// Trades per day mapped to an overtrading score of 1.
    pub max_trades_per_day: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        Self {
            size_increase_ratio: 1.2,
            quick_entry_ms: 300_000,
            price_chase_pct: 0.01,
            revenge_probability: 0.7,
            max_trades_per_day: 10.0,
        }
    }
}

const LOSS_STREAK_WEIGHT: f64 = 0.15;
const QUICK_ENTRY_WEIGHT: f64 = 0.3;
const SIZE_INCREASE_WEIGHT: f64 = 0.25;
const PRICE_CHASE_WEIGHT: f64 = 0.2;
const EMOTION_WEIGHT: f64 = 0.1;
const EMOTION_PER_LOSS: f64 = 0.1;
const EMOTION_RELAX_ON_WIN: f64 = 0.05;

/// Assessment of one (previous, current) trade pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PairAssessment {
    /// Index of the current trade in the chronological sequence.
    pub index: usize,
    pub consecutive_losses: u32,
    pub emotional_state: f64,
    pub size_ratio: f64,
    pub time_delta_ms: i64,
    pub increased_size: bool,
    pub quick_entry: bool,
    pub price_chase: bool,
    pub revenge_probability: f64,
    pub is_revenge: bool,
    pub is_fomo: bool,
}

/// Score plus the pair-by-pair trace it was derived from.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BehaviorAnalysis {
    pub score: BehaviorScore,
    pub pairs: Vec<PairAssessment>,
    pub revenge_count: usize,
    pub fomo_count: usize,
    pub average_trades_per_day: f64,
}

/// Pure scorer: the same ordered trades always produce the same score.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeBehaviorScorer {
    thresholds: BehaviorThresholds,
}

impl TradeBehaviorScorer {
    pub fn new() -> Self {
        Self { thresholds: BehaviorThresholds::default() }
    }

    /// Replaces the detection thresholds.
    pub fn with_thresholds(mut self, thresholds: BehaviorThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn get_thresholds(&self) -> &BehaviorThresholds {
        &self.thresholds
    }

    pub fn score(&self, trades: &[trade::Trade]) -> BehaviorScore {
        self.analyze(trades).score
    }

    /// Full analysis with the per-pair trace. Fewer than two trades score zero.
    pub fn analyze(&self, trades: &[trade::Trade]) -> BehaviorAnalysis {
        if trades.len() < 2 {
            return BehaviorAnalysis {
                score: BehaviorScore::default(),
                pairs: Vec::new(),
                revenge_count: 0,
                fomo_count: 0,
                average_trades_per_day: 0.0,
            };
        }

        let trades = trade::chronological(trades);
        let total = trades.len() as f64;
        let pairs = self.assess_pairs(&trades);

        let revenge_count = pairs.iter().filter(|p| p.is_revenge).count();
        let fomo_count = pairs.iter().filter(|p| p.is_fomo).count();
        let average_trades_per_day = average_trades_per_day(&trades);

        let over_trading_score = if self.thresholds.max_trades_per_day > 0.0 {
            (average_trades_per_day / self.thresholds.max_trades_per_day).min(1.0)
        } else {
            0.0
        };

        let score = BehaviorScore {
            revenge_trading_score: (revenge_count as f64 / total).clamp(0.0, 1.0),
            over_trading_score: over_trading_score.clamp(0.0, 1.0),
            fomo_score: (fomo_count as f64 / total).clamp(0.0, 1.0),
        };

        BehaviorAnalysis {
            score,
            pairs,
            revenge_count,
            fomo_count,
            average_trades_per_day,
        }
    }

    fn assess_pairs(&self, trades: &[trade::Trade]) -> Vec<PairAssessment> {
        let t = &self.thresholds;
        let mut consecutive_losses: u32 = 0;
        let mut emotional_state: f64 = 0.0;
        let mut pairs = Vec::with_capacity(trades.len().saturating_sub(1));

        for (index, (previous, current)) in trades.iter().tuple_windows().enumerate() {
            if previous.is_loss() {
                consecutive_losses += 1;
                emotional_state -= EMOTION_PER_LOSS;
            } else {
                consecutive_losses = 0;
                if previous.is_win() {
                    emotional_state = (emotional_state + EMOTION_RELAX_ON_WIN).min(0.0);
                }
            }

            let size_ratio = if previous.quantity.abs() > f64::EPSILON {
                current.quantity / previous.quantity
            } else {
                0.0
            };
            let increased_size = size_ratio > t.size_increase_ratio;

            let time_delta_ms = current.timestamp.saturating_sub(previous.timestamp);
            let quick_entry = time_delta_ms < t.quick_entry_ms;

            let price_chase = previous.exit_price.abs() > f64::EPSILON
                && (current.entry_price - previous.exit_price).abs() / previous.exit_price.abs()
                    > t.price_chase_pct;

            let revenge_probability = LOSS_STREAK_WEIGHT * consecutive_losses as f64
                + QUICK_ENTRY_WEIGHT * indicator(quick_entry)
                + SIZE_INCREASE_WEIGHT * indicator(increased_size)
                + PRICE_CHASE_WEIGHT * indicator(price_chase)
                + EMOTION_WEIGHT * emotional_state.abs();

            pairs.push(PairAssessment {
                index: index + 1,
                consecutive_losses,
                emotional_state,
                size_ratio,
                time_delta_ms,
                increased_size,
                quick_entry,
                price_chase,
                revenge_probability,
                is_revenge: revenge_probability > t.revenge_probability,
                is_fomo: quick_entry && price_chase,
            });
        }

        pairs
    }
}

fn indicator(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}

/// Mean number of trades over the UTC calendar days that saw trading.
fn average_trades_per_day(trades: &[trade::Trade]) -> f64 {
    let per_day = trades.iter().filter_map(|t| t.calendar_day()).counts();
    if per_day.is_empty() {
        return 0.0;
    }
    per_day.values().sum::<usize>() as f64 / per_day.len() as f64
}
