//! Metrics Engine - Order-book derived quantities per bar
//!
//! Computes, for every closed bar with a usable book:
//! - Pressure: BPR, liquidity delta (LD / LD%), near/far split
//! - Fair value: VWMP, IFV, full-book depth imbalance
//! - Walls and wall proximity, strongest support/resistance
//! - Alpha MM/Swing/HTF, market consensus (MCS), regime and next-regime odds
//! - Bar-over-bar deltas, LD momentum, spread state and direction
//!
//! A bar without a book (or with a one-sided book) yields no result and
//! clears the previous-bar reference so no delta spans the gap.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::{safe_pct, safe_ratio, AggregatedBar};

pub mod alpha;
pub use alpha::{AlphaScores, AlphaSensitivity, Regime};

pub mod directional;
pub use directional::{
    BandAnalysis, Confidence, DirectionalAnalysis, DirectionalAnalyzer, RangeBand,
};

pub mod levels;
pub use levels::{Level, LevelProcessor, LevelSettings, ProcessedLevels};

pub mod pulse;
pub use pulse::{PulseEvent, PulseIndicator, PulseSettings, PulseSource};

pub mod walls;
pub use walls::{detect_wall, wall_proximity, Wall};

/// Distance splitting near from far liquidity, in percent
pub const NEAR_BAND_PCT: f64 = 1.0;
/// Levels used for the liquidity-vacuum gap measurement
pub const VACUUM_LEVELS: usize = 10;
/// LD% delta beyond which LD momentum is rising/falling
pub const LD_MOMENTUM_THRESHOLD: f64 = 2.0;
/// Spread (bps) below which the spread is tight
pub const TIGHT_SPREAD_BPS: f64 = 2.0;
/// Spread (bps) above which the spread is wide
pub const WIDE_SPREAD_BPS: f64 = 8.0;
/// Spread% delta beyond which the spread is tightening/widening
pub const SPREAD_DIRECTION_THRESHOLD: f64 = 0.001;

/// How the LD window is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LdMode {
    /// Only levels within `ld_range` percent of price
    Signal,
    /// The whole clustered view
    Context,
}

impl Default for LdMode {
    fn default() -> Self {
        LdMode::Context
    }
}

impl LdMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "signal" => Some(LdMode::Signal),
            "context" => Some(LdMode::Context),
            _ => None,
        }
    }
}

/// Settings consumed by the metrics engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub levels: LevelSettings,
    pub ld_mode: LdMode,
    /// LD window in percent (signal mode)
    pub ld_range_pct: f64,
    pub sensitivity: AlphaSensitivity,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            levels: LevelSettings::default(),
            ld_mode: LdMode::Context,
            ld_range_pct: 1.5,
            sensitivity: AlphaSensitivity::default(),
        }
    }
}

/// Direction of LD% between bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LdMomentum {
    Rising,
    Falling,
    Flat,
}

impl Default for LdMomentum {
    fn default() -> Self {
        LdMomentum::Flat
    }
}

impl LdMomentum {
    pub fn from_delta(delta: Option<f64>) -> Self {
        match delta {
            Some(d) if d > LD_MOMENTUM_THRESHOLD => LdMomentum::Rising,
            Some(d) if d < -LD_MOMENTUM_THRESHOLD => LdMomentum::Falling,
            _ => LdMomentum::Flat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LdMomentum::Rising => "rising",
            LdMomentum::Falling => "falling",
            LdMomentum::Flat => "flat",
        }
    }
}

/// Spread width class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadState {
    Tight,
    Normal,
    Wide,
}

impl Default for SpreadState {
    fn default() -> Self {
        SpreadState::Normal
    }
}

impl SpreadState {
    pub fn classify(spread_bps: f64) -> Self {
        if spread_bps < TIGHT_SPREAD_BPS {
            SpreadState::Tight
        } else if spread_bps > WIDE_SPREAD_BPS {
            SpreadState::Wide
        } else {
            SpreadState::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadState::Tight => "tight",
            SpreadState::Normal => "normal",
            SpreadState::Wide => "wide",
        }
    }
}

/// Spread change between bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadDirection {
    Tightening,
    Widening,
    Stable,
}

impl Default for SpreadDirection {
    fn default() -> Self {
        SpreadDirection::Stable
    }
}

impl SpreadDirection {
    pub fn from_delta(delta: Option<f64>) -> Self {
        match delta {
            Some(d) if d < -SPREAD_DIRECTION_THRESHOLD => SpreadDirection::Tightening,
            Some(d) if d > SPREAD_DIRECTION_THRESHOLD => SpreadDirection::Widening,
            _ => SpreadDirection::Stable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadDirection::Tightening => "tightening",
            SpreadDirection::Widening => "widening",
            SpreadDirection::Stable => "stable",
        }
    }
}

macro_rules! impl_display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        })*
    };
}

impl_display_as_str!(LdMomentum, SpreadState, SpreadDirection);

/// Strongest level on one side of the clustered view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyLevel {
    pub price: f64,
    pub volume: f64,
    pub distance_pct: f64,
    /// 0-100: volume share blended with proximity
    pub score: f64,
}

/// `current - previous` for every scalar metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDeltas {
    pub mid: f64,
    pub spread: f64,
    pub spread_pct: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub bpr: f64,
    pub ld: f64,
    pub ld_pct: f64,
    pub near_delta: f64,
    pub far_delta: f64,
    pub near_pressure_pct: f64,
    pub vwmp: f64,
    pub ifv: f64,
    pub vs_vwmp_pct: f64,
    pub vs_ifv_pct: f64,
    pub depth_imbalance_pct: f64,
    pub bid_wall_proximity: f64,
    pub ask_wall_proximity: f64,
    pub support_score: f64,
    pub resistance_score: f64,
    pub alpha_mm: f64,
    pub alpha_swing: f64,
    pub alpha_htf: f64,
    pub mcs: f64,
    pub next_regime_prob: f64,
}

impl MetricDeltas {
    fn between(cur: &MetricsResult, prev: &MetricsResult) -> Self {
        Self {
            mid: cur.mid - prev.mid,
            spread: cur.spread - prev.spread,
            spread_pct: cur.spread_pct - prev.spread_pct,
            bid_volume: cur.bid_volume - prev.bid_volume,
            ask_volume: cur.ask_volume - prev.ask_volume,
            bpr: cur.bpr - prev.bpr,
            ld: cur.ld - prev.ld,
            ld_pct: cur.ld_pct - prev.ld_pct,
            near_delta: cur.near_delta - prev.near_delta,
            far_delta: cur.far_delta - prev.far_delta,
            near_pressure_pct: cur.near_pressure_pct - prev.near_pressure_pct,
            vwmp: cur.vwmp - prev.vwmp,
            ifv: cur.ifv - prev.ifv,
            vs_vwmp_pct: cur.vs_vwmp_pct - prev.vs_vwmp_pct,
            vs_ifv_pct: cur.vs_ifv_pct - prev.vs_ifv_pct,
            depth_imbalance_pct: cur.depth_imbalance_pct - prev.depth_imbalance_pct,
            bid_wall_proximity: cur.bid_wall_proximity - prev.bid_wall_proximity,
            ask_wall_proximity: cur.ask_wall_proximity - prev.ask_wall_proximity,
            support_score: cur.support_score - prev.support_score,
            resistance_score: cur.resistance_score - prev.resistance_score,
            alpha_mm: cur.alpha.mm - prev.alpha.mm,
            alpha_swing: cur.alpha.swing - prev.alpha.swing,
            alpha_htf: cur.alpha.htf - prev.alpha.htf,
            mcs: cur.mcs - prev.mcs,
            next_regime_prob: cur.next_regime_prob - prev.next_regime_prob,
        }
    }
}

/// Every derived quantity for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub time: i64,
    pub bar_id: i64,
    /// Reference price (bar close)
    pub price: f64,

    // Top of book
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub spread: f64,
    pub spread_pct: f64,
    pub spread_bps: f64,

    // Pressure
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub bpr: f64,
    pub ld: f64,
    pub ld_pct: f64,

    // Near / far split
    pub near_bid: f64,
    pub near_ask: f64,
    pub far_bid: f64,
    pub far_ask: f64,
    pub near_delta: f64,
    pub far_delta: f64,
    pub near_ratio: f64,
    pub far_ratio: f64,
    pub near_pressure_pct: f64,

    // Fair value
    pub vwmp: f64,
    pub ifv: f64,
    pub bid_avg_price: f64,
    pub ask_avg_price: f64,
    pub vs_vwmp_pct: f64,
    pub vs_ifv_pct: f64,
    pub depth_bid: f64,
    pub depth_ask: f64,
    pub depth_imbalance_pct: f64,

    // Walls
    pub bid_wall: Option<Wall>,
    pub ask_wall: Option<Wall>,
    pub bid_wall_proximity: f64,
    pub ask_wall_proximity: f64,

    // Structure
    pub support: Option<KeyLevel>,
    pub resistance: Option<KeyLevel>,
    pub support_score: f64,
    pub resistance_score: f64,
    pub bid_level_count: usize,
    pub ask_level_count: usize,
    /// Mean gap between consecutive bid levels, percent of price
    pub bid_gap_pct: f64,
    /// Mean gap between consecutive ask levels, percent of price
    pub ask_gap_pct: f64,

    // Composite
    pub alpha: AlphaScores,
    pub mcs: f64,
    pub regime: Regime,
    pub regime_score: f64,
    pub next_regime_prob: f64,

    // Cross-bar state
    pub spread_state: SpreadState,
    pub spread_direction: SpreadDirection,
    pub ld_momentum: LdMomentum,
    /// None on the first bar and right after a gap
    pub deltas: Option<MetricDeltas>,
}

/// Metrics plus the level views they were computed from
#[derive(Debug, Clone)]
pub struct MetricsFrame {
    pub metrics: MetricsResult,
    pub levels: ProcessedLevels,
}

/// Computes a MetricsResult per bar, tracking the previous bar for deltas
pub struct MetricsEngine {
    settings: MetricsSettings,
    processor: LevelProcessor,
    previous: Option<MetricsResult>,
}

impl MetricsEngine {
    pub fn new(settings: MetricsSettings) -> Self {
        Self {
            settings,
            processor: LevelProcessor::new(settings.levels),
            previous: None,
        }
    }

    pub fn settings(&self) -> &MetricsSettings {
        &self.settings
    }

    pub fn previous(&self) -> Option<&MetricsResult> {
        self.previous.as_ref()
    }

    /// Drop cross-bar state
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compute metrics for a closed bar and make it the new previous bar.
    ///
    /// A bar without a usable book returns None and clears the previous bar.
    pub fn compute(&mut self, bar: &AggregatedBar) -> Option<MetricsFrame> {
        match self.evaluate(bar) {
            Some(frame) => {
                self.previous = Some(frame.metrics.clone());
                Some(frame)
            }
            None => {
                if self.previous.take().is_some() {
                    debug!(bar = bar.time, "Book gap, clearing previous bar");
                }
                None
            }
        }
    }

    /// Compute metrics for an in-progress bar without committing it
    pub fn preview(&self, bar: &AggregatedBar) -> Option<MetricsFrame> {
        self.evaluate(bar)
    }

    fn evaluate(&self, bar: &AggregatedBar) -> Option<MetricsFrame> {
        let book = bar.book.as_ref()?;
        if !book.is_two_sided() {
            return None;
        }
        let best_bid = book.best_bid()?.price;
        let best_ask = book.best_ask()?.price;
        let mid = (best_bid + best_ask) / 2.0;

        let price = if bar.candle.close.is_finite() && bar.candle.close > 0.0 {
            bar.candle.close
        } else {
            mid
        };

        let levels = self.processor.process(book, price);
        if !levels.is_two_sided() {
            return None;
        }

        let metrics = self.build(bar, &levels, price, best_bid, best_ask, mid);
        Some(MetricsFrame { metrics, levels })
    }

    fn build(
        &self,
        bar: &AggregatedBar,
        levels: &ProcessedLevels,
        price: f64,
        best_bid: f64,
        best_ask: f64,
        mid: f64,
    ) -> MetricsResult {
        let spread = best_ask - best_bid;
        let spread_pct = safe_pct(spread, mid);
        let spread_bps = spread_pct * 100.0;

        // LD window
        let (bid_volume, ask_volume) = self.window_volumes(levels, price);
        let bpr = pressure_ratio(bid_volume, ask_volume);
        let ld = bid_volume - ask_volume;
        let ld_pct = safe_pct(ld, bid_volume + ask_volume);

        // Near / far split over the clustered view
        let (near_bid, far_bid) = split_near_far(&levels.bids, price);
        let (near_ask, far_ask) = split_near_far(&levels.asks, price);
        let near_ratio = safe_ratio(near_bid, near_bid + near_ask, 0.5);
        let far_ratio = safe_ratio(far_bid, far_bid + far_ask, 0.5);
        let near_pressure_pct = safe_pct(near_bid - near_ask, near_bid + near_ask);

        // Fair value
        let bid_avg_price = weighted_price(levels.bids.iter()).unwrap_or(best_bid);
        let ask_avg_price = weighted_price(levels.asks.iter()).unwrap_or(best_ask);
        let vwmp = weighted_price(levels.bids.iter().chain(levels.asks.iter())).unwrap_or(mid);

        let (full_bids, full_asks) = levels.full_within(self.settings.levels.fair_value_range_pct);
        let depth_bid: f64 = full_bids.iter().map(|l| l.volume).sum();
        let depth_ask: f64 = full_asks.iter().map(|l| l.volume).sum();
        let depth_imbalance_pct = safe_pct(depth_bid - depth_ask, depth_bid + depth_ask);

        let ifv = if depth_bid + depth_ask > 0.0 {
            (bid_avg_price * depth_bid + ask_avg_price * depth_ask) / (depth_bid + depth_ask)
        } else {
            vwmp
        };
        let vs_vwmp_pct = safe_pct(price - vwmp, vwmp);
        let vs_ifv_pct = safe_pct(price - ifv, ifv);

        // Walls
        let bid_wall = detect_wall(&levels.bids, price);
        let ask_wall = detect_wall(&levels.asks, price);
        let bid_wall_proximity = wall_proximity(bid_wall.as_ref());
        let ask_wall_proximity = wall_proximity(ask_wall.as_ref());

        // Structure
        let range = self.settings.levels.price_range_pct;
        let support = key_level(&levels.bids, price, range);
        let resistance = key_level(&levels.asks, price, range);

        // Composite
        let alpha = AlphaScores::compute(
            near_pressure_pct,
            ld_pct,
            depth_imbalance_pct,
            &self.settings.sensitivity,
        );
        let mcs = alpha::market_consensus(vs_vwmp_pct, ld_pct, vs_ifv_pct);
        let next_regime_prob = alpha::next_regime_probability(&alpha::RegimeInputs {
            near_ratio,
            far_ratio,
            bpr,
            vs_vwmp_pct,
            spread_pct,
        });

        let mut result = MetricsResult {
            time: bar.time,
            bar_id: bar.bar_id(),
            price,
            best_bid,
            best_ask,
            mid,
            spread,
            spread_pct,
            spread_bps,
            bid_volume,
            ask_volume,
            bpr,
            ld,
            ld_pct,
            near_bid,
            near_ask,
            far_bid,
            far_ask,
            near_delta: near_bid - near_ask,
            far_delta: far_bid - far_ask,
            near_ratio,
            far_ratio,
            near_pressure_pct,
            vwmp,
            ifv,
            bid_avg_price,
            ask_avg_price,
            vs_vwmp_pct,
            vs_ifv_pct,
            depth_bid,
            depth_ask,
            depth_imbalance_pct,
            bid_wall,
            ask_wall,
            bid_wall_proximity,
            ask_wall_proximity,
            support_score: support.map(|s| s.score).unwrap_or(0.0),
            resistance_score: resistance.map(|r| r.score).unwrap_or(0.0),
            support,
            resistance,
            bid_level_count: levels.bids.len(),
            ask_level_count: levels.asks.len(),
            bid_gap_pct: mean_gap_pct(&levels.bids, price),
            ask_gap_pct: mean_gap_pct(&levels.asks, price),
            alpha,
            mcs,
            regime: Regime::classify(ld_pct),
            regime_score: ld_pct,
            next_regime_prob,
            spread_state: SpreadState::classify(spread_bps),
            spread_direction: SpreadDirection::Stable,
            ld_momentum: LdMomentum::Flat,
            deltas: None,
        };

        if let Some(prev) = self.previous.as_ref() {
            let deltas = MetricDeltas::between(&result, prev);
            result.ld_momentum = LdMomentum::from_delta(Some(deltas.ld_pct));
            result.spread_direction = SpreadDirection::from_delta(Some(deltas.spread_pct));
            result.deltas = Some(deltas);
        }

        result
    }

    /// Bid/ask totals of the LD window
    fn window_volumes(&self, levels: &ProcessedLevels, price: f64) -> (f64, f64) {
        match self.settings.ld_mode {
            LdMode::Context => (levels.bid_volume(), levels.ask_volume()),
            LdMode::Signal => {
                let range = self
                    .settings
                    .ld_range_pct
                    .min(self.settings.levels.price_range_pct);
                let within = |l: &&Level| l.distance_pct(price) <= range;
                (
                    levels.bids.iter().filter(within).map(|l| l.volume).sum(),
                    levels.asks.iter().filter(within).map(|l| l.volume).sum(),
                )
            }
        }
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new(MetricsSettings::default())
    }
}

/// Bid/ask pressure ratio; an empty ask side maps to 10 (or 1 when both empty)
pub fn pressure_ratio(bid_volume: f64, ask_volume: f64) -> f64 {
    if ask_volume > 0.0 {
        (bid_volume / ask_volume).max(0.0)
    } else if bid_volume > 0.0 {
        10.0
    } else {
        1.0
    }
}

fn split_near_far(levels: &[Level], price: f64) -> (f64, f64) {
    levels.iter().fold((0.0, 0.0), |(near, far), l| {
        if l.distance_pct(price) <= NEAR_BAND_PCT {
            (near + l.volume, far)
        } else {
            (near, far + l.volume)
        }
    })
}

fn weighted_price<'a>(levels: impl Iterator<Item = &'a Level>) -> Option<f64> {
    let (pv, v) = levels.fold((0.0, 0.0), |(pv, v), l| (pv + l.price * l.volume, v + l.volume));
    if v > 0.0 {
        Some(pv / v)
    } else {
        None
    }
}

fn key_level(levels: &[Level], price: f64, range_pct: f64) -> Option<KeyLevel> {
    let total: f64 = levels.iter().map(|l| l.volume).sum();
    let strongest = levels
        .iter()
        .max_by(|a, b| a.volume.partial_cmp(&b.volume).unwrap_or(std::cmp::Ordering::Equal))?;

    let distance_pct = strongest.distance_pct(price);
    let share = safe_pct(strongest.volume, total);
    let proximity = if range_pct > 0.0 {
        (100.0 - distance_pct / range_pct * 100.0).max(0.0)
    } else {
        0.0
    };

    Some(KeyLevel {
        price: strongest.price,
        volume: strongest.volume,
        distance_pct,
        score: (0.6 * share + 0.4 * proximity).clamp(0.0, 100.0),
    })
}

fn mean_gap_pct(levels: &[Level], price: f64) -> f64 {
    let head: Vec<&Level> = levels.iter().take(VACUUM_LEVELS).collect();
    if head.len() < 2 || price <= 0.0 {
        return 0.0;
    }
    let total: f64 = head
        .windows(2)
        .map(|w| (w[0].price - w[1].price).abs())
        .sum();
    total / (head.len() - 1) as f64 / price * 100.0
}
