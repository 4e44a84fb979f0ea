//! Entry Certainty Scorer
//!
//! Accumulates fixed point awards from independent order-book conditions
//! into LONG and SHORT certainty scores (0-100 each), then gates a discrete
//! entry signal on both scores at once.
//!
//! The point weights are empirically tuned policy constants; they live in
//! `CertaintyWeights` so they can be tuned without touching the scorer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::{LdMomentum, MetricsResult, SpreadState};
use crate::types::safe_ratio;

/// Two-step award: `strong_points` past `strong`, `mild_points` past `mild`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub strong: f64,
    pub strong_points: f64,
    pub mild: f64,
    pub mild_points: f64,
}

impl Tier {
    pub const fn new(strong: f64, strong_points: f64, mild: f64, mild_points: f64) -> Self {
        Self {
            strong,
            strong_points,
            mild,
            mild_points,
        }
    }

    /// Award for `value >= threshold`
    pub fn at_least(&self, value: f64) -> f64 {
        if value >= self.strong {
            self.strong_points
        } else if value >= self.mild {
            self.mild_points
        } else {
            0.0
        }
    }

    /// Award for `value > threshold`
    pub fn above(&self, value: f64) -> f64 {
        if value > self.strong {
            self.strong_points
        } else if value > self.mild {
            self.mild_points
        } else {
            0.0
        }
    }
}

/// Point weights for every certainty factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CertaintyWeights {
    /// Multiplier on wall proximity (0-100 -> 0-40)
    pub wall_factor: f64,
    /// Multiplier on support/resistance score (0-100 -> 0-20)
    pub structure_factor: f64,
    /// Level-count ratio
    pub level_imbalance: Tier,
    /// Opposite-side gap over own-side gap
    pub vacuum: Tier,
    pub near_pressure: Tier,
    pub depth_imbalance: Tier,
    /// BPR for long; its inverse for short
    pub bpr: Tier,
    pub ld_pct: Tier,
    /// Discount to VWMP/IFV in percent
    pub divergence: Tier,
    pub momentum_points: f64,
    pub tight_spread_bonus: f64,
    pub wide_spread_penalty: f64,
    /// Certainty required on the entry side
    pub entry_threshold: f64,
    /// Certainty the opposite side must stay below
    pub opposing_ceiling: f64,
}

impl Default for CertaintyWeights {
    fn default() -> Self {
        Self {
            wall_factor: 0.4,
            structure_factor: 0.2,
            level_imbalance: Tier::new(1.5, 12.0, 1.2, 6.0),
            vacuum: Tier::new(1.5, 10.0, 1.2, 5.0),
            near_pressure: Tier::new(30.0, 15.0, 15.0, 8.0),
            depth_imbalance: Tier::new(20.0, 15.0, 10.0, 8.0),
            bpr: Tier::new(1.5, 12.0, 1.2, 6.0),
            ld_pct: Tier::new(20.0, 12.0, 10.0, 6.0),
            divergence: Tier::new(0.10, 8.0, 0.03, 4.0),
            momentum_points: 8.0,
            tight_spread_bonus: 8.0,
            wide_spread_penalty: 5.0,
            entry_threshold: 80.0,
            opposing_ceiling: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntrySignal {
    Long,
    Short,
    Wait,
}

impl Default for EntrySignal {
    fn default() -> Self {
        EntrySignal::Wait
    }
}

impl EntrySignal {
    /// LONG iff long >= entry and short < ceiling; SHORT mirrored
    pub fn decide(long: f64, short: f64, weights: &CertaintyWeights) -> Self {
        if long >= weights.entry_threshold && short < weights.opposing_ceiling {
            EntrySignal::Long
        } else if short >= weights.entry_threshold && long < weights.opposing_ceiling {
            EntrySignal::Short
        } else {
            EntrySignal::Wait
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySignal::Long => "LONG",
            EntrySignal::Short => "SHORT",
            EntrySignal::Wait => "WAIT",
        }
    }
}

impl fmt::Display for EntrySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Certainty scores with the reasons that contributed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryCertainty {
    pub long: f64,
    pub short: f64,
    pub signal: EntrySignal,
    pub reasons: Vec<String>,
}

/// Running tally for one bar
struct Tally {
    long: f64,
    short: f64,
    reasons: Vec<String>,
}

impl Tally {
    fn long(&mut self, points: f64, reason: impl FnOnce() -> String) {
        if points > 0.0 {
            self.long += points;
            self.reasons.push(format!("LONG +{:.0}: {}", points, reason()));
        }
    }

    fn short(&mut self, points: f64, reason: impl FnOnce() -> String) {
        if points > 0.0 {
            self.short += points;
            self.reasons.push(format!("SHORT +{:.0}: {}", points, reason()));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryCertaintyScorer {
    weights: CertaintyWeights,
}

impl EntryCertaintyScorer {
    pub fn new(weights: CertaintyWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &CertaintyWeights {
        &self.weights
    }

    /// Score one bar. Cross-bar input comes from the result's own deltas.
    pub fn score(&self, m: &MetricsResult) -> EntryCertainty {
        let w = &self.weights;
        let mut t = Tally {
            long: 0.0,
            short: 0.0,
            reasons: Vec::new(),
        };

        // Walls
        t.long(m.bid_wall_proximity * w.wall_factor, || {
            format!("Bid wall prox {:.0}", m.bid_wall_proximity)
        });
        t.short(m.ask_wall_proximity * w.wall_factor, || {
            format!("Ask wall prox {:.0}", m.ask_wall_proximity)
        });

        // Support / resistance
        t.long(m.support_score * w.structure_factor, || {
            format!("Support {:.0}", m.support_score)
        });
        t.short(m.resistance_score * w.structure_factor, || {
            format!("Resistance {:.0}", m.resistance_score)
        });

        // Level imbalance
        let bid_levels = m.bid_level_count as f64;
        let ask_levels = m.ask_level_count as f64;
        let level_ratio = safe_ratio(bid_levels, ask_levels, 1.0);
        let inverse_level_ratio = safe_ratio(ask_levels, bid_levels, 1.0);
        t.long(w.level_imbalance.at_least(level_ratio), || {
            format!("Levels {:.2}x", level_ratio)
        });
        t.short(w.level_imbalance.at_least(inverse_level_ratio), || {
            format!("Levels {:.2}x", inverse_level_ratio)
        });

        // Liquidity vacuum: thin asks favour longs
        let ask_vacuum = safe_ratio(m.ask_gap_pct, m.bid_gap_pct, 1.0);
        let bid_vacuum = safe_ratio(m.bid_gap_pct, m.ask_gap_pct, 1.0);
        t.long(w.vacuum.at_least(ask_vacuum), || format!("Ask vacuum {:.2}x", ask_vacuum));
        t.short(w.vacuum.at_least(bid_vacuum), || format!("Bid vacuum {:.2}x", bid_vacuum));

        // Near pressure
        t.long(w.near_pressure.above(m.near_pressure_pct), || {
            format!("Near pressure {:.1}%", m.near_pressure_pct)
        });
        t.short(w.near_pressure.above(-m.near_pressure_pct), || {
            format!("Near pressure {:.1}%", m.near_pressure_pct)
        });

        // Depth imbalance
        t.long(w.depth_imbalance.above(m.depth_imbalance_pct), || {
            format!("Depth {:.1}%", m.depth_imbalance_pct)
        });
        t.short(w.depth_imbalance.above(-m.depth_imbalance_pct), || {
            format!("Depth {:.1}%", m.depth_imbalance_pct)
        });

        // BPR, inverse for short
        let inverse_bpr = if m.bpr > 0.0 { 1.0 / m.bpr } else { 0.0 };
        t.long(w.bpr.at_least(m.bpr), || format!("BPR {:.2}", m.bpr));
        t.short(w.bpr.at_least(inverse_bpr), || format!("BPR {:.2}", m.bpr));

        // LD%
        t.long(w.ld_pct.above(m.ld_pct), || format!("LD {:.1}%", m.ld_pct));
        t.short(w.ld_pct.above(-m.ld_pct), || format!("LD {:.1}%", m.ld_pct));

        // Fair value divergence: price below fair value favours longs
        t.long(w.divergence.above(-m.vs_vwmp_pct), || {
            format!("vs VWMP {:.3}%", m.vs_vwmp_pct)
        });
        t.short(w.divergence.above(m.vs_vwmp_pct), || {
            format!("vs VWMP {:.3}%", m.vs_vwmp_pct)
        });
        t.long(w.divergence.above(-m.vs_ifv_pct), || format!("vs IFV {:.3}%", m.vs_ifv_pct));
        t.short(w.divergence.above(m.vs_ifv_pct), || format!("vs IFV {:.3}%", m.vs_ifv_pct));

        // LD momentum
        match m.ld_momentum {
            LdMomentum::Rising => t.long(w.momentum_points, || "LD rising".to_string()),
            LdMomentum::Falling => t.short(w.momentum_points, || "LD falling".to_string()),
            LdMomentum::Flat => {}
        }

        // Spread state
        match m.spread_state {
            SpreadState::Tight => {
                if t.long > t.short {
                    t.long(w.tight_spread_bonus, || "Tight spread".to_string());
                } else if t.short > t.long {
                    t.short(w.tight_spread_bonus, || "Tight spread".to_string());
                }
            }
            SpreadState::Wide => {
                t.long -= w.wide_spread_penalty;
                t.short -= w.wide_spread_penalty;
                t.reasons
                    .push(format!("BOTH -{:.0}: Wide spread", w.wide_spread_penalty));
            }
            SpreadState::Normal => {}
        }

        let long = clamp_score(t.long);
        let short = clamp_score(t.short);
        EntryCertainty {
            long,
            short,
            signal: EntrySignal::decide(long, short, w),
            reasons: t.reasons,
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{MetricsEngine, MetricsSettings, SpreadDirection};
    use crate::types::{AggregatedBar, Book, BookLevel, Candle, Snapshot, Timeframe};

    fn metrics_for(bids: Vec<BookLevel>, asks: Vec<BookLevel>, price: f64) -> MetricsResult {
        let snap = Snapshot {
            time: 0,
            candle: Candle::new(price, price, price, price, 1.0),
            book: Some(Book::new(bids, asks)),
        };
        let bar = AggregatedBar::from_snapshot(0, Timeframe::Min1, &snap);
        MetricsEngine::new(MetricsSettings::default())
            .compute(&bar)
            .unwrap()
            .metrics
    }

    fn neutral_metrics() -> MetricsResult {
        metrics_for(
            vec![BookLevel::new(99.99, 1.0), BookLevel::new(99.98, 1.0)],
            vec![BookLevel::new(100.01, 1.0), BookLevel::new(100.02, 1.0)],
            100.0,
        )
    }

    #[test]
    fn test_tier_boundaries() {
        let tier = Tier::new(1.5, 12.0, 1.2, 6.0);
        assert_eq!(tier.at_least(1.5), 12.0);
        assert_eq!(tier.at_least(1.2), 6.0);
        assert_eq!(tier.at_least(1.19), 0.0);
        assert_eq!(tier.above(1.5), 6.0);
        assert_eq!(tier.above(1.2), 0.0);
    }

    #[test]
    fn test_decide_gating() {
        let w = CertaintyWeights::default();
        assert_eq!(EntrySignal::decide(80.0, 29.9, &w), EntrySignal::Long);
        assert_eq!(EntrySignal::decide(80.0, 30.0, &w), EntrySignal::Wait);
        assert_eq!(EntrySignal::decide(79.9, 0.0, &w), EntrySignal::Wait);
        assert_eq!(EntrySignal::decide(10.0, 95.0, &w), EntrySignal::Short);
        assert_eq!(EntrySignal::decide(90.0, 90.0, &w), EntrySignal::Wait);
    }

    #[test]
    fn test_balanced_book_waits() {
        let m = neutral_metrics();
        let certainty = EntryCertaintyScorer::default().score(&m);
        assert_eq!(certainty.signal, EntrySignal::Wait);
        assert!(certainty.long < 80.0);
        assert!(certainty.short < 80.0);
        assert!((certainty.long - certainty.short).abs() < 1e-9);
    }

    #[test]
    fn test_strong_bid_side_goes_long() {
        let mut m = neutral_metrics();
        m.bid_wall_proximity = 100.0;
        m.ask_wall_proximity = 0.0;
        m.support_score = 80.0;
        m.resistance_score = 10.0;
        m.bid_level_count = 20;
        m.ask_level_count = 10;
        m.bid_gap_pct = 0.01;
        m.ask_gap_pct = 0.02;
        m.near_pressure_pct = 40.0;
        m.depth_imbalance_pct = 25.0;
        m.bpr = 2.0;
        m.ld_pct = 30.0;
        m.vs_vwmp_pct = -0.2;
        m.vs_ifv_pct = -0.2;
        m.ld_momentum = LdMomentum::Rising;
        m.spread_state = SpreadState::Tight;
        m.spread_direction = SpreadDirection::Stable;

        let certainty = EntryCertaintyScorer::default().score(&m);
        assert_eq!(certainty.long, 100.0);
        // resistance 10 * 0.2
        assert!((certainty.short - 2.0).abs() < 1e-9);
        assert_eq!(certainty.signal, EntrySignal::Long);
        assert!(certainty.reasons.iter().any(|r| r.contains("Bid wall")));
    }

    #[test]
    fn test_wide_spread_penalizes_both() {
        let mut m = neutral_metrics();
        m.spread_state = SpreadState::Wide;
        let base = {
            let mut n = m.clone();
            n.spread_state = SpreadState::Normal;
            EntryCertaintyScorer::default().score(&n)
        };
        let wide = EntryCertaintyScorer::default().score(&m);
        assert!((wide.long - (base.long - 5.0).max(0.0)).abs() < 1e-9);
        assert!((wide.short - (base.short - 5.0).max(0.0)).abs() < 1e-9);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let mut m = neutral_metrics();
        m.bpr = f64::NAN;
        m.ld_pct = f64::INFINITY;
        let certainty = EntryCertaintyScorer::default().score(&m);
        assert!((0.0..=100.0).contains(&certainty.long));
        assert!((0.0..=100.0).contains(&certainty.short));
    }
}
