//! Signal Engine - single-instrument orchestration
//!
//! Runs each snapshot to completion before the next one is accepted:
//! aggregate -> cluster -> metrics -> entry/pulse/directional -> alerts.
//!
//! Expensive work on the in-progress bar is throttled with explicit
//! "last processed" timestamps compared against the caller's clock:
//! - live analytics at most every `analytics_interval_ms`
//! - depth views at most every `depth_interval_ms`
//! - alerts re-evaluated at least every `alert_heartbeat_ms` via `heartbeat`
//!
//! Every emitted event is also pushed FIFO onto an unbounded channel for
//! downstream consumers.

mod view;

pub use view::{DepthView, EngineEvent, SnapshotView};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alerts::{AlertManager, MetricRegistry};
use crate::config::AppConfig;
use crate::feed::SnapshotAggregator;
use crate::features::{
    DirectionalAnalyzer, MetricsEngine, MetricsFrame, MetricsSettings, PulseEvent, PulseIndicator,
    PulseSettings, PulseSource,
};
use crate::strategy::EntryCertaintyScorer;
use crate::types::{AggregatedBar, Snapshot, Timeframe};

/// Orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub raw_capacity: usize,
    pub history_capacity: usize,
    pub analytics_interval_ms: i64,
    pub depth_interval_ms: i64,
    pub alert_heartbeat_ms: i64,
    pub log_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            instrument: "BTCUSDT".to_string(),
            timeframe: Timeframe::Min1,
            raw_capacity: 1440,
            history_capacity: 500,
            analytics_interval_ms: 2_000,
            depth_interval_ms: 1_000,
            alert_heartbeat_ms: 10_000,
            log_capacity: 200,
        }
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub snapshots: u64,
    pub rejected: u64,
    pub bars_closed: u64,
    /// Closed bars without a usable book
    pub gaps: u64,
    pub alerts_fired: u64,
}

pub struct SignalEngine {
    settings: EngineSettings,
    metrics_settings: MetricsSettings,
    pulse_settings: PulseSettings,
    registry: Arc<MetricRegistry>,
    aggregator: SnapshotAggregator,
    metrics: MetricsEngine,
    scorer: EntryCertaintyScorer,
    pulse: PulseIndicator,
    directional: DirectionalAnalyzer,
    alerts: AlertManager,
    history: VecDeque<SnapshotView>,
    last_view: Option<SnapshotView>,
    last_live_ms: Option<i64>,
    last_depth_ms: Option<i64>,
    last_alert_ms: Option<i64>,
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    stats: EngineStats,
}

impl SignalEngine {
    pub fn new(
        settings: EngineSettings,
        metrics_settings: MetricsSettings,
        pulse_settings: PulseSettings,
    ) -> Self {
        let registry = Arc::new(MetricRegistry::standard());
        Self {
            aggregator: SnapshotAggregator::new(
                settings.timeframe,
                settings.raw_capacity,
                settings.history_capacity,
            ),
            metrics: MetricsEngine::new(metrics_settings),
            scorer: EntryCertaintyScorer::default(),
            pulse: PulseIndicator::new(pulse_settings),
            directional: DirectionalAnalyzer::new(),
            alerts: AlertManager::new(&settings.instrument, registry.clone(), settings.log_capacity),
            registry,
            history: VecDeque::new(),
            last_view: None,
            last_live_ms: None,
            last_depth_ms: None,
            last_alert_ms: None,
            tx: None,
            stats: EngineStats::default(),
            settings,
            metrics_settings,
            pulse_settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = EngineSettings {
            instrument: config.engine.instrument.clone(),
            timeframe: config.engine.timeframe()?,
            raw_capacity: config.engine.raw_capacity,
            history_capacity: config.engine.history_capacity,
            analytics_interval_ms: config.engine.analytics_interval_ms as i64,
            depth_interval_ms: config.engine.depth_interval_ms as i64,
            alert_heartbeat_ms: config.engine.alert_heartbeat_ms as i64,
            log_capacity: config.alerts.log_capacity,
        };
        Ok(Self::new(
            settings,
            config.metrics_settings()?,
            config.pulse_settings()?,
        ))
    }

    /// Receive every event the engine emits, in order
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn instrument(&self) -> &str {
        &self.settings.instrument
    }

    pub fn timeframe(&self) -> Timeframe {
        self.aggregator.timeframe()
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertManager {
        &mut self.alerts
    }

    /// Closed-bar views, oldest first
    pub fn history(&self) -> impl Iterator<Item = &SnapshotView> {
        self.history.iter()
    }

    pub fn last_view(&self) -> Option<&SnapshotView> {
        self.last_view.as_ref()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Process one raw snapshot to completion
    pub fn on_snapshot(&mut self, snapshot: Snapshot, now_ms: i64) -> Vec<EngineEvent> {
        if let Err(e) = self.aggregator.check(&snapshot) {
            debug!(instrument = %self.settings.instrument, "Rejected snapshot: {}", e);
            self.stats.rejected += 1;
        }
        self.stats.snapshots += 1;

        let mut events = Vec::new();
        if let Some(bar) = self.aggregator.push(snapshot) {
            self.close_bar(&bar, now_ms, &mut events);
        }
        if self.current_is_gap() {
            self.last_view = None;
        }

        if self.due(self.last_live_ms, self.settings.analytics_interval_ms, now_ms) {
            if let Some(view) = self.preview() {
                self.last_live_ms = Some(now_ms);
                self.fire_alerts(&view, now_ms, &mut events);
                self.last_view = Some(view.clone());
                events.push(EngineEvent::Live(view));
            }
        }

        if self.due(self.last_depth_ms, self.settings.depth_interval_ms, now_ms) {
            if let Some(depth) = self.depth() {
                self.last_depth_ms = Some(now_ms);
                events.push(EngineEvent::Depth(depth));
            }
        }

        self.publish(&events);
        events
    }

    /// Re-evaluate alerts against the last view when the heartbeat is due
    pub fn heartbeat(&mut self, now_ms: i64) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !self.due(self.last_alert_ms, self.settings.alert_heartbeat_ms, now_ms) {
            return events;
        }
        if let Some(view) = self.last_view.clone() {
            self.fire_alerts(&view, now_ms, &mut events);
        }
        self.publish(&events);
        events
    }

    /// Finalize the in-progress bar (end of replay)
    pub fn flush(&mut self, now_ms: i64) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(bar) = self.aggregator.flush() {
            self.close_bar(&bar, now_ms, &mut events);
        }
        self.publish(&events);
        events
    }

    /// Rebuild bars for a new timeframe and replay them silently.
    /// Returns the number of rebuilt closed bars.
    pub fn set_timeframe(&mut self, timeframe: Timeframe) -> usize {
        let rebuilt = self.aggregator.set_timeframe(timeframe);
        self.settings.timeframe = timeframe;
        self.clear_derived();
        self.alerts.reset_runtime();

        for bar in &rebuilt {
            if let Some(view) = self.analyze_closed(bar) {
                self.remember(view);
            }
        }
        info!(
            instrument = %self.settings.instrument,
            timeframe = %timeframe,
            bars = rebuilt.len(),
            views = self.history.len(),
            "Timeframe switched"
        );
        rebuilt.len()
    }

    /// Discard all state and start over on another instrument
    pub fn reset_instrument(&mut self, instrument: &str) {
        info!(from = %self.settings.instrument, to = %instrument, "Switching instrument");
        self.settings.instrument = instrument.to_string();
        self.aggregator.reset();
        self.clear_derived();
        self.alerts = AlertManager::new(instrument, self.registry.clone(), self.settings.log_capacity);
        self.stats = EngineStats::default();
    }

    fn clear_derived(&mut self) {
        self.metrics = MetricsEngine::new(self.metrics_settings);
        self.pulse = PulseIndicator::new(self.pulse_settings);
        self.history.clear();
        self.last_view = None;
        self.last_live_ms = None;
        self.last_depth_ms = None;
        self.last_alert_ms = None;
    }

    /// In-progress bar currently lacks a two-sided book
    fn current_is_gap(&self) -> bool {
        self.aggregator
            .current()
            .map_or(false, |bar| !bar.book.as_ref().map_or(false, |b| b.is_two_sided()))
    }

    fn due(&self, last: Option<i64>, interval_ms: i64, now_ms: i64) -> bool {
        last.map_or(true, |t| now_ms - t >= interval_ms)
    }

    fn close_bar(&mut self, bar: &AggregatedBar, now_ms: i64, events: &mut Vec<EngineEvent>) {
        self.stats.bars_closed += 1;
        let view = match self.analyze_closed(bar) {
            Some(view) => view,
            None => {
                self.stats.gaps += 1;
                // Nothing pre-gap may be re-evaluated or crossed against
                self.last_view = None;
                self.alerts.reset_runtime();
                debug!(
                    instrument = %self.settings.instrument,
                    bar = bar.time,
                    "Bar without usable book, no metrics"
                );
                return;
            }
        };

        debug!(
            instrument = %self.settings.instrument,
            bar = view.time(),
            price = view.metrics.price,
            ld_pct = view.metrics.ld_pct,
            signal = %view.entry.signal,
            "Bar closed"
        );
        self.fire_alerts(&view, now_ms, events);
        self.remember(view.clone());
        events.push(EngineEvent::BarClosed(view));
    }

    /// Commit metrics and pulse for a closed bar
    fn analyze_closed(&mut self, bar: &AggregatedBar) -> Option<SnapshotView> {
        let frame = self.metrics.compute(bar);
        let pulse_input = self.pulse_input(bar, frame.as_ref());
        let pulse = pulse_input.and_then(|v| self.pulse.push(v));
        let frame = frame?;
        Some(self.build_view(bar, frame, pulse, true))
    }

    /// Analyze the in-progress bar without committing anything
    fn preview(&self) -> Option<SnapshotView> {
        let bar = self.aggregator.current()?;
        let frame = self.metrics.preview(bar)?;
        let pulse = self
            .pulse_input(bar, Some(&frame))
            .and_then(|v| self.pulse.peek(v));
        Some(self.build_view(bar, frame, pulse, false))
    }

    /// Series value fed to the pulse indicator; gaps only feed the open
    fn pulse_input(&self, bar: &AggregatedBar, frame: Option<&MetricsFrame>) -> Option<f64> {
        match self.pulse_settings.source {
            PulseSource::Open => Some(bar.candle.open),
            PulseSource::Vwmp => frame.map(|f| f.metrics.vwmp),
            PulseSource::Ifv => frame.map(|f| f.metrics.ifv),
            PulseSource::Mid => frame.map(|f| f.metrics.mid),
        }
    }

    fn build_view(
        &self,
        bar: &AggregatedBar,
        frame: MetricsFrame,
        pulse: Option<PulseEvent>,
        closed: bool,
    ) -> SnapshotView {
        let MetricsFrame { metrics, levels } = frame;
        let directional =
            self.directional
                .analyze(&levels.full_bids, &levels.full_asks, metrics.price);
        let entry = self.scorer.score(&metrics);

        SnapshotView {
            instrument: self.settings.instrument.clone(),
            timeframe: bar.timeframe,
            closed,
            candle: bar.candle,
            metrics,
            entry,
            pulse,
            directional,
        }
    }

    fn depth(&self) -> Option<DepthView> {
        let bar = self.aggregator.current()?;
        let book = bar.book.as_ref()?;
        let price = bar.candle.close;
        let levels = crate::features::LevelProcessor::new(self.metrics_settings.levels)
            .process(book, price);

        Some(DepthView {
            instrument: self.settings.instrument.clone(),
            time: bar.last_time,
            price,
            best_bid: book.best_bid().map(|l| l.price),
            best_ask: book.best_ask().map(|l| l.price),
            bid_volume: levels.bid_volume(),
            ask_volume: levels.ask_volume(),
            bids: levels.bids,
            asks: levels.asks,
        })
    }

    fn remember(&mut self, view: SnapshotView) {
        self.history.push_back(view.clone());
        while self.history.len() > self.settings.history_capacity {
            self.history.pop_front();
        }
        self.last_view = Some(view);
    }

    fn fire_alerts(&mut self, view: &SnapshotView, now_ms: i64, events: &mut Vec<EngineEvent>) {
        self.last_alert_ms = Some(now_ms);
        let fired = self.alerts.evaluate(view, now_ms);
        self.stats.alerts_fired += fired.len() as u64;
        events.extend(fired.into_iter().map(|f| EngineEvent::AlertFired(Box::new(f))));
    }

    fn publish(&mut self, events: &[EngineEvent]) {
        let closed = match &self.tx {
            Some(tx) => events.iter().any(|event| tx.send(event.clone()).is_err()),
            None => false,
        };
        if closed {
            warn!("Event channel closed, detaching subscriber");
            self.tx = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertCondition};
    use crate::types::{Book, BookLevel, Candle};

    fn snapshot(time: i64, close: f64, bid_size: f64, ask_size: f64) -> Snapshot {
        Snapshot {
            time,
            candle: Candle::new(close, close + 0.5, close - 0.5, close, 1.0),
            book: Some(Book::new(
                vec![
                    BookLevel::new(close - 0.05, bid_size),
                    BookLevel::new(close - 0.5, bid_size),
                ],
                vec![
                    BookLevel::new(close + 0.05, ask_size),
                    BookLevel::new(close + 0.5, ask_size),
                ],
            )),
        }
    }

    fn engine() -> SignalEngine {
        SignalEngine::new(
            EngineSettings::default(),
            MetricsSettings::default(),
            PulseSettings {
                bbw_len: 3,
                bbb_len: 3,
                pulse_len: 3,
                ..PulseSettings::default()
            },
        )
    }

    fn closed(events: &[EngineEvent]) -> Vec<&SnapshotView> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::BarClosed(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bar_closes_on_next_bucket() {
        let mut e = engine();
        let first = e.on_snapshot(snapshot(60, 100.0, 2.0, 1.0), 0);
        assert!(closed(&first).is_empty());
        assert!(first.iter().any(|ev| matches!(ev, EngineEvent::Live(_))));
        assert!(first.iter().any(|ev| matches!(ev, EngineEvent::Depth(_))));

        let second = e.on_snapshot(snapshot(120, 101.0, 2.0, 1.0), 500);
        let bars = closed(&second);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time(), 60);
        assert!(bars[0].closed);
        assert!(bars[0].metrics.ld_pct > 0.0);
        // live and depth throttled
        assert!(!second.iter().any(|ev| matches!(ev, EngineEvent::Live(_))));
        assert!(!second.iter().any(|ev| matches!(ev, EngineEvent::Depth(_))));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut e = engine();
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 10);
        e.on_snapshot(snapshot(30, 100.0, 1.0, 1.0), 20);
        assert_eq!(e.stats().rejected, 2);
        assert_eq!(e.stats().snapshots, 3);
    }

    #[test]
    fn test_gap_bar_yields_no_view() {
        let mut e = engine();
        e.on_snapshot(
            Snapshot {
                time: 60,
                candle: Candle::new(100.0, 100.0, 100.0, 100.0, 1.0),
                book: None,
            },
            0,
        );
        let events = e.on_snapshot(snapshot(120, 100.0, 1.0, 1.0), 5_000);
        assert!(closed(&events).is_empty());
        assert_eq!(e.stats().gaps, 1);
        assert_eq!(e.stats().bars_closed, 1);
    }

    #[test]
    fn test_gap_drops_last_view_and_runtime() {
        let mut e = engine();
        e.alerts_mut()
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0))
            .unwrap();
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        assert!(e.last_view().is_some());

        let bookless = |time| Snapshot {
            time,
            candle: Candle::new(100.0, 100.0, 100.0, 100.0, 1.0),
            book: None,
        };
        // in-progress bar without a book
        e.on_snapshot(bookless(120), 100);
        assert!(e.last_view().is_none());

        // bar 120 closes as a gap
        e.on_snapshot(bookless(180), 200);
        assert!(e.last_view().is_none());
        assert!(e.alerts().alerts()[0].runtime.last_value.is_none());
        assert!(e.heartbeat(60_000).is_empty());
    }

    #[test]
    fn test_channel_receives_events_in_order() {
        let mut e = engine();
        let mut rx = e.subscribe();
        let mut emitted = Vec::new();
        for i in 1..=4 {
            emitted.extend(e.on_snapshot(snapshot(i * 60, 100.0, 1.0, 1.0), i * 3_000));
        }
        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event.kind());
        }
        let expected: Vec<&str> = emitted.iter().map(|ev| ev.kind()).collect();
        assert_eq!(received, expected);
        assert_eq!(closed(&emitted).len(), 3);
    }

    #[test]
    fn test_alert_fires_on_closed_bar_crossing() {
        let mut e = engine();
        e.alerts_mut()
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0))
            .unwrap();

        // balanced bar, then bid-heavy bar; live previews are throttled away
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        e.on_snapshot(snapshot(120, 100.0, 5.0, 1.0), 100);
        let events = e.on_snapshot(snapshot(180, 100.0, 5.0, 1.0), 200);

        let fired: Vec<_> = events
            .iter()
            .filter(|ev| matches!(ev, EngineEvent::AlertFired(_)))
            .collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(e.alerts().log().len(), 1);
        assert_eq!(e.stats().alerts_fired, 1);
    }

    #[test]
    fn test_heartbeat_reevaluates_last_view() {
        let mut e = engine();
        e.on_snapshot(snapshot(60, 100.0, 5.0, 1.0), 0);
        e.alerts_mut()
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 10.0))
            .unwrap();

        assert!(e.heartbeat(5_000).is_empty());
        let events = e.heartbeat(10_000);
        assert_eq!(events.len(), 1);
        // same bar: once_per_bar holds
        assert!(e.heartbeat(20_000).is_empty());
    }

    #[test]
    fn test_set_timeframe_replays_silently() {
        let mut e = engine();
        e.alerts_mut()
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, -100.0))
            .unwrap();
        for i in 0..30 {
            e.on_snapshot(snapshot(i * 60, 100.0 + i as f64 * 0.1, 2.0, 1.0), i * 3_000);
        }
        let logged = e.alerts().log().len();

        let rebuilt = e.set_timeframe(Timeframe::Min5);
        assert_eq!(rebuilt, 5);
        assert_eq!(e.history().count(), 5);
        assert!(e.history().all(|v| v.timeframe == Timeframe::Min5));
        assert_eq!(e.alerts().log().len(), logged);
        assert_eq!(e.timeframe(), Timeframe::Min5);
    }

    #[test]
    fn test_reset_instrument_discards_state() {
        let mut e = engine();
        e.alerts_mut()
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 10.0))
            .unwrap();
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        e.on_snapshot(snapshot(120, 100.0, 1.0, 1.0), 0);

        e.reset_instrument("ETHUSDT");
        assert_eq!(e.instrument(), "ETHUSDT");
        assert_eq!(e.history().count(), 0);
        assert!(e.last_view().is_none());
        assert!(e.alerts().alerts().is_empty());
        // earlier times accepted again
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        assert_eq!(e.stats().rejected, 0);
    }

    #[test]
    fn test_flush_closes_in_progress_bar() {
        let mut e = engine();
        e.on_snapshot(snapshot(60, 100.0, 1.0, 1.0), 0);
        let events = e.flush(1_000);
        assert_eq!(closed(&events).len(), 1);
        assert!(e.flush(2_000).is_empty());
    }
}
