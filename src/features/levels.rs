//! Level Processor - Clusters raw book levels into price buckets
//!
//! Produces two views of the same book:
//! - a filtered/clustered view restricted to a price window, used for signals
//! - a full-book view (unfiltered, unclustered), used where fair-value
//!   accuracy matters more than display simplicity

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{Book, BookLevel, Side};

/// Clustered (or raw) price level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub volume: f64,
    pub side: Side,
    /// Number of raw levels folded into this one
    pub count: usize,
}

impl Level {
    fn raw(level: &BookLevel, side: Side) -> Self {
        Self {
            price: level.price,
            volume: level.size,
            side,
            count: 1,
        }
    }

    /// Distance from a reference price, in percent (always non-negative)
    pub fn distance_pct(&self, price: f64) -> f64 {
        if price > 0.0 {
            (self.price - price).abs() / price * 100.0
        } else {
            0.0
        }
    }
}

/// Level processing settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSettings {
    /// Bucket width as a fraction of price (0.0005 = 5 bps)
    pub cluster_pct: f64,
    /// Maximum clustered levels kept per side
    pub max_levels: usize,
    /// Buckets below this volume are dropped
    pub min_volume: f64,
    /// Window around price for the clustered view, in percent
    pub price_range_pct: f64,
    /// Window around price for full-book fair-value metrics, in percent
    pub fair_value_range_pct: f64,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            cluster_pct: 0.0005,
            max_levels: 50,
            min_volume: 0.0,
            price_range_pct: 5.0,
            fair_value_range_pct: 2.0,
        }
    }
}

/// Both views of one book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedLevels {
    /// Reference price the views were built around
    pub price: f64,
    /// Clustered bids, best (highest) first
    pub bids: Vec<Level>,
    /// Clustered asks, best (lowest) first
    pub asks: Vec<Level>,
    /// Full-book bids, best first
    pub full_bids: Vec<Level>,
    /// Full-book asks, best first
    pub full_asks: Vec<Level>,
}

impl ProcessedLevels {
    pub fn bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.volume).sum()
    }

    pub fn ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.volume).sum()
    }

    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Full-book levels within `range_pct` of price, per side
    pub fn full_within(&self, range_pct: f64) -> (Vec<&Level>, Vec<&Level>) {
        let price = self.price;
        let bids = self
            .full_bids
            .iter()
            .filter(|l| l.distance_pct(price) <= range_pct)
            .collect();
        let asks = self
            .full_asks
            .iter()
            .filter(|l| l.distance_pct(price) <= range_pct)
            .collect();
        (bids, asks)
    }
}

/// Builds clustered and full-book level views
#[derive(Debug, Clone, Default)]
pub struct LevelProcessor {
    settings: LevelSettings,
}

impl LevelProcessor {
    pub fn new(settings: LevelSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LevelSettings {
        &self.settings
    }

    /// Process a book around a reference price
    pub fn process(&self, book: &Book, price: f64) -> ProcessedLevels {
        let full_bids: Vec<Level> = book.bids.iter().map(|l| Level::raw(l, Side::Bid)).collect();
        let full_asks: Vec<Level> = book.asks.iter().map(|l| Level::raw(l, Side::Ask)).collect();

        if !(price.is_finite() && price > 0.0) {
            return ProcessedLevels {
                price: 0.0,
                bids: Vec::new(),
                asks: Vec::new(),
                full_bids,
                full_asks,
            };
        }

        let range = self.settings.price_range_pct / 100.0;
        let lower = price * (1.0 - range);
        let upper = price * (1.0 + range);

        let bids = self.cluster(
            book.bids.iter().filter(|l| l.price > lower && l.price <= price),
            price,
            Side::Bid,
        );
        let asks = self.cluster(
            book.asks.iter().filter(|l| l.price >= price && l.price < upper),
            price,
            Side::Ask,
        );

        ProcessedLevels {
            price,
            bids,
            asks,
            full_bids,
            full_asks,
        }
    }

    /// Bucket levels to the nearest multiple of `price * cluster_pct`
    fn cluster<'a>(
        &self,
        levels: impl Iterator<Item = &'a BookLevel>,
        price: f64,
        side: Side,
    ) -> Vec<Level> {
        let width = price * self.settings.cluster_pct;
        // Keyed by bucket index so float keys never need hashing
        let mut buckets: BTreeMap<i64, Level> = BTreeMap::new();
        let mut passthrough: Vec<Level> = Vec::new();

        for level in levels {
            if width > 0.0 && width.is_finite() {
                let idx = (level.price / width).round() as i64;
                buckets
                    .entry(idx)
                    .and_modify(|b| {
                        b.volume += level.size;
                        b.count += 1;
                    })
                    .or_insert(Level {
                        price: idx as f64 * width,
                        volume: level.size,
                        side,
                        count: 1,
                    });
            } else {
                passthrough.push(Level::raw(level, side));
            }
        }

        let mut out: Vec<Level> = buckets.into_values().chain(passthrough).collect();
        out.retain(|l| l.volume >= self.settings.min_volume);
        match side {
            Side::Bid => {
                out.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal))
            }
            Side::Ask => {
                out.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal))
            }
        }
        out.truncate(self.settings.max_levels);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_book() -> Book {
        Book::new(
            vec![BookLevel::new(100.0, 2.0), BookLevel::new(99.0, 5.0)],
            vec![BookLevel::new(101.0, 1.0), BookLevel::new(102.0, 4.0)],
        )
    }

    #[test]
    fn test_example_book_volumes() {
        let processor = LevelProcessor::new(LevelSettings::default());
        let levels = processor.process(&example_book(), 100.0);

        assert_eq!(levels.bid_volume(), 7.0);
        assert_eq!(levels.ask_volume(), 5.0);
        assert!((levels.bids[0].price - 100.0).abs() < 1e-9);
        assert!((levels.asks[0].price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_clustering_sums_bucket() {
        let settings = LevelSettings {
            cluster_pct: 0.01,
            ..LevelSettings::default()
        };
        let book = Book::new(
            vec![
                BookLevel::new(99.9, 1.0),
                BookLevel::new(99.6, 2.0),
                BookLevel::new(98.1, 3.0),
            ],
            vec![BookLevel::new(100.2, 1.0)],
        );
        let levels = LevelProcessor::new(settings).process(&book, 100.0);

        // width = 1.0: 99.9 and 99.6 both round to 100
        assert_eq!(levels.bids.len(), 2);
        assert_eq!(levels.bids[0].price, 100.0);
        assert_eq!(levels.bids[0].volume, 3.0);
        assert_eq!(levels.bids[0].count, 2);
        assert_eq!(levels.bids[1].price, 98.0);
    }

    #[test]
    fn test_price_range_filter_and_full_book() {
        let settings = LevelSettings {
            price_range_pct: 1.0,
            cluster_pct: 0.0,
            ..LevelSettings::default()
        };
        let book = Book::new(
            vec![BookLevel::new(99.5, 1.0), BookLevel::new(90.0, 50.0)],
            vec![BookLevel::new(100.5, 1.0), BookLevel::new(120.0, 50.0)],
        );
        let levels = LevelProcessor::new(settings).process(&book, 100.0);

        assert_eq!(levels.bids.len(), 1);
        assert_eq!(levels.asks.len(), 1);
        assert_eq!(levels.full_bids.len(), 2);
        assert_eq!(levels.full_asks.len(), 2);
    }

    #[test]
    fn test_min_volume_and_max_levels() {
        let settings = LevelSettings {
            cluster_pct: 0.0,
            min_volume: 2.0,
            max_levels: 2,
            ..LevelSettings::default()
        };
        let bids = (0..6)
            .map(|i| BookLevel::new(100.0 - i as f64 * 0.1, 1.0 + i as f64))
            .collect();
        let book = Book::new(bids, vec![BookLevel::new(100.1, 5.0)]);
        let levels = LevelProcessor::new(settings).process(&book, 100.0);

        assert_eq!(levels.bids.len(), 2);
        assert!(levels.bids.iter().all(|l| l.volume >= 2.0));
        assert!(levels.bids[0].price > levels.bids[1].price);
    }

    #[test]
    fn test_invalid_price_yields_empty_clustered_view() {
        let levels = LevelProcessor::default().process(&example_book(), 0.0);
        assert!(!levels.is_two_sided());
        assert_eq!(levels.full_bids.len(), 2);
    }
}
