//! Read models produced by the engine
//!
//! Flat and serializable; nothing here exposes aggregator internals.

use serde::{Deserialize, Serialize};

use crate::alerts::AlertFired;
use crate::features::{DirectionalAnalysis, Level, MetricsResult, PulseEvent};
use crate::strategy::EntryCertainty;
use crate::types::{Candle, Timeframe};

/// Everything known about one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub instrument: String,
    pub timeframe: Timeframe,
    /// False for in-progress previews
    pub closed: bool,
    pub candle: Candle,
    #[serde(flatten)]
    pub metrics: MetricsResult,
    pub entry: EntryCertainty,
    pub pulse: Option<PulseEvent>,
    pub directional: Option<DirectionalAnalysis>,
}

impl SnapshotView {
    /// Bar start, seconds
    pub fn time(&self) -> i64 {
        self.metrics.time
    }

    pub fn bar_id(&self) -> i64 {
        self.metrics.bar_id
    }
}

/// Clustered depth around the current price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthView {
    pub instrument: String,
    pub time: i64,
    pub price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Output of the engine, FIFO per snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    BarClosed(SnapshotView),
    Live(SnapshotView),
    Depth(DepthView),
    AlertFired(Box<AlertFired>),
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::BarClosed(_) => "bar_closed",
            EngineEvent::Live(_) => "live",
            EngineEvent::Depth(_) => "depth",
            EngineEvent::AlertFired(_) => "alert_fired",
        }
    }
}

#[cfg(test)]
impl SnapshotView {
    /// Balanced two-sided book at price 100 with no walls
    pub(crate) fn sample(bar_id: i64) -> Self {
        use crate::features::{MetricsEngine, MetricsSettings};
        use crate::types::{AggregatedBar, Book, BookLevel, Snapshot};

        let snapshot = Snapshot {
            time: bar_id,
            candle: Candle::new(100.0, 100.0, 100.0, 100.0, 1.0),
            book: Some(Book::new(
                vec![BookLevel::new(99.99, 1.0), BookLevel::new(99.98, 1.0)],
                vec![BookLevel::new(100.01, 1.0), BookLevel::new(100.02, 1.0)],
            )),
        };
        let bar = AggregatedBar::from_snapshot(bar_id, Timeframe::Min1, &snapshot);
        let frame = MetricsEngine::new(MetricsSettings::default())
            .compute(&bar)
            .expect("sample book is two-sided");

        Self {
            instrument: "TEST".to_string(),
            timeframe: Timeframe::Min1,
            closed: true,
            candle: snapshot.candle,
            metrics: frame.metrics,
            entry: EntryCertainty::default(),
            pulse: None,
            directional: None,
        }
    }
}
