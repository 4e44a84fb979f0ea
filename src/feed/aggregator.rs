//! Snapshot Aggregator - Rolls 1-minute snapshots up into bars
//!
//! Keeps a bounded ring buffer of raw snapshots so the target timeframe can
//! be changed at any time; a change rebuilds every bar from the buffer.

use std::collections::VecDeque;
use tracing::{debug, info};

use super::FeedError;
use crate::types::{AggregatedBar, Snapshot, Timeframe};

/// Counters for ingestion health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub bars_closed: u64,
}

/// Aggregates raw snapshots into bars of the selected timeframe
pub struct SnapshotAggregator {
    timeframe: Timeframe,
    /// Raw snapshots, oldest first
    raw: VecDeque<Snapshot>,
    raw_capacity: usize,
    /// Completed bars, oldest first
    bars: VecDeque<AggregatedBar>,
    max_bars: usize,
    /// Bar still receiving snapshots
    current: Option<AggregatedBar>,
    /// Newest accepted snapshot time
    watermark: Option<i64>,
    stats: AggregatorStats,
}

impl SnapshotAggregator {
    pub fn new(timeframe: Timeframe, raw_capacity: usize, max_bars: usize) -> Self {
        Self {
            timeframe,
            raw: VecDeque::with_capacity(raw_capacity.min(4096)),
            raw_capacity: raw_capacity.max(1),
            bars: VecDeque::new(),
            max_bars: max_bars.max(1),
            current: None,
            watermark: None,
            stats: AggregatorStats::default(),
        }
    }

    /// Bucket start for a timestamp in the active timeframe
    pub fn bucket_start(time: i64, timeframe: Timeframe) -> i64 {
        let interval = timeframe.duration_secs();
        time.div_euclid(interval) * interval
    }

    /// Check a snapshot against the dedup watermark
    pub fn check(&self, snapshot: &Snapshot) -> Result<(), FeedError> {
        match self.watermark {
            Some(last) if snapshot.time <= last => Err(FeedError::NonMonotonic {
                time: snapshot.time,
                last,
            }),
            _ => Ok(()),
        }
    }

    /// Add a snapshot; returns the bar it finalized, if any.
    ///
    /// Snapshots at or before the newest accepted time are dropped.
    pub fn push(&mut self, snapshot: Snapshot) -> Option<AggregatedBar> {
        if let Err(e) = self.check(&snapshot) {
            debug!("Dropping snapshot: {}", e);
            self.stats.duplicates += 1;
            return None;
        }

        self.watermark = Some(snapshot.time);
        self.stats.accepted += 1;

        let completed = self.fold(&snapshot);

        self.raw.push_back(snapshot);
        while self.raw.len() > self.raw_capacity {
            self.raw.pop_front();
            self.stats.evicted += 1;
        }

        completed
    }

    /// Fold a snapshot into the in-progress bar, closing it on a new bucket
    fn fold(&mut self, snapshot: &Snapshot) -> Option<AggregatedBar> {
        let bucket = Self::bucket_start(snapshot.time, self.timeframe);

        let completed = match self.current.as_mut() {
            Some(current) if current.time == bucket => {
                current.absorb(snapshot);
                None
            }
            Some(_) => self.current.replace(AggregatedBar::from_snapshot(
                bucket,
                self.timeframe,
                snapshot,
            )),
            None => {
                self.current = Some(AggregatedBar::from_snapshot(
                    bucket,
                    self.timeframe,
                    snapshot,
                ));
                None
            }
        };

        if let Some(ref bar) = completed {
            self.add_to_history(bar.clone());
        }
        completed
    }

    fn add_to_history(&mut self, bar: AggregatedBar) {
        self.stats.bars_closed += 1;
        self.bars.push_back(bar);
        while self.bars.len() > self.max_bars {
            self.bars.pop_front();
        }
    }

    /// Switch timeframe and rebuild every bar from the retained snapshots.
    ///
    /// Returns the rebuilt closed bars in chronological order; the last
    /// bucket stays open as the in-progress bar.
    pub fn set_timeframe(&mut self, timeframe: Timeframe) -> Vec<AggregatedBar> {
        self.timeframe = timeframe;
        self.bars.clear();
        self.current = None;

        let raw: Vec<Snapshot> = self.raw.iter().cloned().collect();
        let mut rebuilt = Vec::new();
        for snapshot in &raw {
            if let Some(bar) = self.fold(snapshot) {
                rebuilt.push(bar);
            }
        }

        info!(
            timeframe = %timeframe,
            raw = raw.len(),
            bars = rebuilt.len(),
            "Rebuilt bars for new timeframe"
        );
        rebuilt
    }

    /// Force-finalize the in-progress bar (e.g., end of replay)
    pub fn flush(&mut self) -> Option<AggregatedBar> {
        let bar = self.current.take()?;
        self.add_to_history(bar.clone());
        Some(bar)
    }

    /// Discard all state (instrument switch)
    pub fn reset(&mut self) {
        self.raw.clear();
        self.bars.clear();
        self.current = None;
        self.watermark = None;
        self.stats = AggregatorStats::default();
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn current(&self) -> Option<&AggregatedBar> {
        self.current.as_ref()
    }

    /// Completed bars, oldest first
    pub fn bars(&self) -> impl Iterator<Item = &AggregatedBar> {
        self.bars.iter()
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }
}

impl Default for SnapshotAggregator {
    fn default() -> Self {
        Self::new(Timeframe::Min1, 1440, 500)
    }
}
