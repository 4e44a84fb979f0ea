//! Core types used throughout DepthScope
//!
//! Defines the snapshot data model: candles, book levels, raw snapshots,
//! aggregated bars and the small enums shared by every analysis layer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Supported aggregation timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Min1
    }
}

impl Timeframe {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::Min1 => 60,
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Min30 => 30 * 60,
            Timeframe::Hour1 => 60 * 60,
            Timeframe::Hour4 => 4 * 60 * 60,
            Timeframe::Day1 => 24 * 60 * 60,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Some(Timeframe::Min1),
            "5m" | "5min" => Some(Timeframe::Min5),
            "15m" | "15min" => Some(Timeframe::Min15),
            "30m" | "30min" => Some(Timeframe::Min30),
            "1h" | "1hour" | "60m" => Some(Timeframe::Hour1),
            "4h" | "4hour" => Some(Timeframe::Hour4),
            "1d" | "1day" | "d" => Some(Timeframe::Day1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Min1 => write!(f, "1m"),
            Timeframe::Min5 => write!(f, "5m"),
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Min30 => write!(f, "30m"),
            Timeframe::Hour1 => write!(f, "1h"),
            Timeframe::Hour4 => write!(f, "4h"),
            Timeframe::Day1 => write!(f, "1d"),
        }
    }
}

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// OHLCV candle. Accepts both the compact wire names (`o,h,l,c,v`)
/// and the long names.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "o", alias = "open")]
    pub open: f64,
    #[serde(rename = "h", alias = "high")]
    pub high: f64,
    #[serde(rename = "l", alias = "low")]
    pub low: f64,
    #[serde(rename = "c", alias = "close")]
    pub close: f64,
    #[serde(rename = "v", alias = "volume", default)]
    pub volume: f64,
}

impl Candle {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Fold a later candle into this one (first open, max high, min low,
    /// last close, summed volume)
    pub fn merge(&mut self, later: &Candle) {
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.volume += later.volume;
    }

    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
            && self.high >= self.low
    }
}

/// Single raw price level. Serialized on the wire as `[price, size]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    fn is_usable(&self) -> bool {
        self.price.is_finite() && self.size.is_finite() && self.price > 0.0 && self.size > 0.0
    }
}

impl From<(f64, f64)> for BookLevel {
    fn from((price, size): (f64, f64)) -> Self {
        Self { price, size }
    }
}

impl From<BookLevel> for (f64, f64) {
    fn from(level: BookLevel) -> Self {
        (level.price, level.size)
    }
}

/// Raw order book for one snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl Book {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        let mut book = Self { bids, asks };
        book.normalize_levels();
        book
    }

    /// Normalize raw levels:
    /// - keep only finite positive price/size
    /// - sort bids descending (best first)
    /// - sort asks ascending (best first)
    pub fn normalize_levels(&mut self) {
        self.bids.retain(BookLevel::is_usable);
        self.asks.retain(BookLevel::is_usable);

        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// A book is usable for metrics only when both sides have liquidity
    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }
}

/// One periodic (1-minute) snapshot: candle + book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Seconds since epoch
    pub time: i64,
    pub candle: Candle,
    #[serde(default)]
    pub book: Option<Book>,
}

/// Rollup of one or more snapshots into a target interval.
/// The book is the last contributing snapshot's book, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBar {
    /// Bucket start in seconds
    pub time: i64,
    pub timeframe: Timeframe,
    pub candle: Candle,
    pub book: Option<Book>,
    /// Number of raw snapshots folded into this bar
    pub snapshots: usize,
    /// Time of the last contributing snapshot
    pub last_time: i64,
}

impl AggregatedBar {
    pub fn from_snapshot(bucket: i64, timeframe: Timeframe, snapshot: &Snapshot) -> Self {
        Self {
            time: bucket,
            timeframe,
            candle: snapshot.candle,
            book: snapshot.book.clone(),
            snapshots: 1,
            last_time: snapshot.time,
        }
    }

    pub fn absorb(&mut self, snapshot: &Snapshot) {
        self.candle.merge(&snapshot.candle);
        self.book = snapshot.book.clone();
        self.snapshots += 1;
        self.last_time = snapshot.time;
    }

    /// Stable identifier used for once-per-bar throttling
    pub fn bar_id(&self) -> i64 {
        self.time
    }
}

/// Bias direction shared by regime-like classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for Bias {
    fn default() -> Self {
        Bias::Neutral
    }
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Bullish => "bullish",
            Bias::Bearish => "bearish",
            Bias::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Guarded percentage: `num / den * 100`, 0 when the denominator vanishes
pub fn safe_pct(num: f64, den: f64) -> f64 {
    if den.abs() > f64::EPSILON && num.is_finite() && den.is_finite() {
        num / den * 100.0
    } else {
        0.0
    }
}

/// Guarded ratio with a caller-supplied neutral value
pub fn safe_ratio(num: f64, den: f64, neutral: f64) -> f64 {
    if den.abs() > f64::EPSILON && num.is_finite() && den.is_finite() {
        num / den
    } else {
        neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse_roundtrip() {
        for tf in [
            Timeframe::Min1,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Min30,
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Day1,
        ] {
            assert_eq!(Timeframe::from_str(&tf.to_string()), Some(tf));
        }
        assert_eq!(Timeframe::from_str("7m"), None);
    }

    #[test]
    fn test_snapshot_wire_format() {
        let raw = r#"{"time":60,"candle":{"o":1,"h":2,"l":0.5,"c":1.5,"v":10},
            "book":{"bids":[[100,2],[99,5]],"asks":[[101,1],[102,4]]}}"#;
        let snap: Snapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.time, 60);
        assert_eq!(snap.candle.close, 1.5);
        let book = snap.book.unwrap();
        assert_eq!(book.bids[1], BookLevel::new(99.0, 5.0));
        assert_eq!(book.asks[0].price, 101.0);
    }

    #[test]
    fn test_snapshot_without_book() {
        let raw = r#"{"time":60,"candle":{"open":1,"high":2,"low":0.5,"close":1.5,"volume":3},"book":null}"#;
        let snap: Snapshot = serde_json::from_str(raw).unwrap();
        assert!(snap.book.is_none());
        assert_eq!(snap.candle.volume, 3.0);
    }

    #[test]
    fn test_normalize_levels() {
        let book = Book::new(
            vec![
                BookLevel::new(99.0, 1.0),
                BookLevel::new(100.0, 2.0),
                BookLevel::new(f64::NAN, 1.0),
            ],
            vec![BookLevel::new(102.0, 1.0), BookLevel::new(101.0, 0.0)],
        );
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid().unwrap().price, 100.0);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_safe_math_guards() {
        assert_eq!(safe_pct(1.0, 0.0), 0.0);
        assert_eq!(safe_ratio(1.0, 0.0, 50.0), 50.0);
        assert!((safe_pct(1.0, 4.0) - 25.0).abs() < 1e-12);
    }
}
