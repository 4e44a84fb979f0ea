//! Directional Analysis - Multi-range support/resistance bias
//!
//! Splits full-book levels into three exclusive distance bands from price
//! (short, medium, long), scores each band's bid/ask imbalance and combines
//! them into an overall directional bias with a confidence grade.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::levels::Level;
use crate::types::{safe_pct, Bias};

/// Band bias threshold on the imbalance ratio
pub const BAND_BIAS_THRESHOLD: f64 = 15.0;
/// Overall bias threshold on the weighted score
pub const OVERALL_BIAS_THRESHOLD: f64 = 20.0;

/// Distance band from current price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeBand {
    Short,
    Medium,
    Long,
}

impl RangeBand {
    pub const ALL: [RangeBand; 3] = [RangeBand::Short, RangeBand::Medium, RangeBand::Long];

    /// Half-open `[lower, upper)` bounds in percent
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            RangeBand::Short => (0.0, 5.0),
            RangeBand::Medium => (5.0, 15.0),
            RangeBand::Long => (15.0, 30.0),
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            RangeBand::Short => 0.40,
            RangeBand::Medium => 0.35,
            RangeBand::Long => 0.25,
        }
    }

    pub fn contains(&self, distance_pct: f64) -> bool {
        let (lower, upper) = self.bounds();
        distance_pct >= lower && distance_pct < upper
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeBand::Short => "short",
            RangeBand::Medium => "medium",
            RangeBand::Long => "long",
        }
    }
}

/// The band a distance falls into, if any
pub fn band_for(distance_pct: f64) -> Option<RangeBand> {
    if !distance_pct.is_finite() {
        return None;
    }
    RangeBand::ALL.into_iter().find(|b| b.contains(distance_pct))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Strongest level in a band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandLevel {
    pub price: f64,
    pub volume: f64,
    pub distance_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandAnalysis {
    pub band: RangeBand,
    pub support: Option<BandLevel>,
    pub resistance: Option<BandLevel>,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// `(bid - ask) / (bid + ask) * 100`
    pub ratio: f64,
    pub bias: Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionalAnalysis {
    pub bands: Vec<BandAnalysis>,
    /// Weighted band ratios
    pub score: f64,
    pub bias: Bias,
    pub confidence: Confidence,
    pub strongest_support: Option<BandLevel>,
    pub strongest_resistance: Option<BandLevel>,
}

impl DirectionalAnalysis {
    pub fn band(&self, band: RangeBand) -> Option<&BandAnalysis> {
        self.bands.iter().find(|b| b.band == band)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectionalAnalyzer;

impl DirectionalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze full-book levels around `price`
    pub fn analyze(&self, bids: &[Level], asks: &[Level], price: f64) -> Option<DirectionalAnalysis> {
        if !(price.is_finite() && price > 0.0) {
            return None;
        }

        let bid_points: Vec<(RangeBand, BandLevel)> = bids
            .iter()
            .filter_map(|l| Self::place(l, (price - l.price) / price * 100.0))
            .collect();
        let ask_points: Vec<(RangeBand, BandLevel)> = asks
            .iter()
            .filter_map(|l| Self::place(l, (l.price - price) / price * 100.0))
            .collect();

        let bands: Vec<BandAnalysis> = RangeBand::ALL
            .iter()
            .map(|&band| {
                let side = |points: &[(RangeBand, BandLevel)]| {
                    let in_band: Vec<BandLevel> = points
                        .iter()
                        .filter(|(b, _)| *b == band)
                        .map(|(_, l)| *l)
                        .collect();
                    let volume: f64 = in_band.iter().map(|l| l.volume).sum();
                    (strongest(in_band.iter()), volume)
                };
                let (support, bid_volume) = side(&bid_points);
                let (resistance, ask_volume) = side(&ask_points);
                let ratio = safe_pct(bid_volume - ask_volume, bid_volume + ask_volume);
                BandAnalysis {
                    band,
                    support,
                    resistance,
                    bid_volume,
                    ask_volume,
                    ratio,
                    bias: classify(ratio, BAND_BIAS_THRESHOLD),
                }
            })
            .collect();

        let score: f64 = bands.iter().map(|b| b.ratio * b.band.weight()).sum();
        let bias = classify(score, OVERALL_BIAS_THRESHOLD);
        let confidence = Self::confidence(&bands);

        let strongest_support = strongest(bands.iter().filter_map(|b| b.support.as_ref()));
        let strongest_resistance = strongest(bands.iter().filter_map(|b| b.resistance.as_ref()));

        Some(DirectionalAnalysis {
            bands,
            score,
            bias,
            confidence,
            strongest_support,
            strongest_resistance,
        })
    }

    fn place(level: &Level, distance_pct: f64) -> Option<(RangeBand, BandLevel)> {
        if distance_pct < 0.0 {
            return None;
        }
        band_for(distance_pct).map(|band| {
            (
                band,
                BandLevel {
                    price: level.price,
                    volume: level.volume,
                    distance_pct,
                },
            )
        })
    }

    /// Bands agreeing on a direction: 3 high, 2 medium, else low.
    /// Neutral bands never count, so an empty book is low confidence.
    fn confidence(bands: &[BandAnalysis]) -> Confidence {
        let count = |bias: Bias| bands.iter().filter(|b| b.bias == bias).count();
        let agreeing = [Bias::Bullish, Bias::Bearish]
            .into_iter()
            .map(count)
            .max()
            .unwrap_or(0);
        match agreeing {
            3 => Confidence::High,
            2 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

fn strongest<'a>(levels: impl Iterator<Item = &'a BandLevel>) -> Option<BandLevel> {
    levels
        .max_by(|a, b| a.volume.partial_cmp(&b.volume).unwrap_or(Ordering::Equal))
        .copied()
}

fn classify(value: f64, threshold: f64) -> Bias {
    if value > threshold {
        Bias::Bullish
    } else if value < -threshold {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}
