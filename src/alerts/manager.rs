//! Alert Manager - owns the alert list, firing log and sinks for one
//! instrument, and applies `evaluate` results back onto the list.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::engine::{evaluate, EvalContext};
use super::log::{AlertLog, AlertLogEntry, ChartMarker, MarkerPosition};
use super::registry::{MetricKind, MetricRegistry};
use super::sinks::AlertSink;
use super::{Alert, AlertCondition, AlertError, AlertFired};
use crate::engine::SnapshotView;

pub struct AlertManager {
    instrument: String,
    registry: Arc<MetricRegistry>,
    alerts: Vec<Alert>,
    log: AlertLog,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl AlertManager {
    pub fn new(instrument: &str, registry: Arc<MetricRegistry>, log_capacity: usize) -> Self {
        Self {
            instrument: instrument.to_string(),
            registry,
            alerts: Vec::new(),
            log: AlertLog::new(log_capacity),
            sinks: Vec::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Check a definition against the registry
    pub fn validate(&self, alert: &Alert) -> Result<(), AlertError> {
        let descriptor = self
            .registry
            .get(&alert.section, &alert.metric_key)
            .ok_or_else(|| AlertError::UnknownMetric(alert.metric_path()))?;

        let condition = alert.condition;
        if condition.is_numeric() && descriptor.kind != MetricKind::Number {
            return Err(AlertError::IncompatibleCondition {
                condition,
                kind: descriptor.kind,
                metric: alert.metric_path(),
            });
        }
        if condition.needs_threshold() && alert.threshold.is_none() {
            return Err(AlertError::MissingField {
                condition,
                field: "threshold",
            });
        }
        if condition.needs_target() && alert.target.is_none() {
            return Err(AlertError::MissingField {
                condition,
                field: "target",
            });
        }
        if condition.needs_compare_metric() {
            let (section, key) = alert.compare_path().ok_or(AlertError::MissingField {
                condition,
                field: "compare metric",
            })?;
            let other = self
                .registry
                .get(section, key)
                .ok_or_else(|| AlertError::UnknownMetric(format!("{}.{}", section, key)))?;
            if other.kind != MetricKind::Number {
                return Err(AlertError::IncompatibleCondition {
                    condition,
                    kind: other.kind,
                    metric: other.path(),
                });
            }
        }
        Ok(())
    }

    /// Insert or replace by id; assigns a UUID when the id is empty
    pub fn upsert(&mut self, mut alert: Alert) -> Result<String, AlertError> {
        self.validate(&alert)?;
        if alert.id.is_empty() {
            alert.id = Uuid::new_v4().to_string();
        }
        let id = alert.id.clone();

        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(existing) => *existing = alert,
            None => self.alerts.push(alert),
        }
        debug!(alert_id = %id, instrument = %self.instrument, "Alert upserted");
        Ok(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.alerts.len();
        self.alerts.retain(|a| a.id != id);
        self.alerts.len() != before
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Replace the whole list (restore from storage); invalid entries are dropped
    pub fn replace_alerts(&mut self, alerts: Vec<Alert>) -> usize {
        self.alerts.clear();
        for alert in alerts {
            if let Err(e) = self.upsert(alert) {
                debug!(instrument = %self.instrument, "Dropping stored alert: {}", e);
            }
        }
        self.alerts.len()
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }

    pub fn replace_log(&mut self, entries: Vec<AlertLogEntry>) {
        self.log = AlertLog::from_entries(self.log.capacity(), entries);
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Forget cross-bar values so a rebuilt series cannot fake a crossing
    pub fn reset_runtime(&mut self) {
        for alert in &mut self.alerts {
            alert.runtime.last_value = None;
            alert.runtime.last_diff = None;
        }
    }

    /// Evaluate every alert against `view`; returns the firings in list order
    pub fn evaluate(&mut self, view: &SnapshotView, now_ms: i64) -> Vec<AlertFired> {
        let ctx = EvalContext {
            registry: &self.registry,
            view,
            now_ms,
        };

        let mut fired = Vec::new();
        for slot in self.alerts.iter_mut() {
            let eval = evaluate(slot, &ctx);
            *slot = eval.alert;
            if !eval.triggered {
                continue;
            }
            let (value, formatted, message) = match (eval.value, eval.formatted_value, eval.message) {
                (Some(v), Some(f), Some(m)) => (v, f, m),
                _ => continue,
            };

            let marker = ChartMarker {
                time: view.time(),
                price: view.metrics.price,
                label: slot.metric_key.clone(),
                position: marker_position(slot.condition),
            };
            let context = snapshot_context(&self.registry, view);

            fired.push(AlertFired {
                alert: slot.clone(),
                metric: slot.metric_path(),
                value,
                formatted_value: formatted,
                message,
                instrument: self.instrument.clone(),
                bar_id: view.bar_id(),
                ts: now_ms,
                notify: slot.notify,
                sound: slot.sound,
                marker: Some(marker),
                context,
                snapshot: view.clone(),
            });
        }

        for event in &fired {
            self.log.push(AlertLogEntry {
                ts: event.ts,
                alert_id: event.alert.id.clone(),
                message: event.message.clone(),
                context: event.context.clone(),
                marker: event.marker.clone(),
            });
            for sink in &self.sinks {
                sink.deliver(event);
            }
        }
        if !fired.is_empty() {
            info!(
                instrument = %self.instrument,
                bar_id = view.bar_id(),
                count = fired.len(),
                "Alerts fired"
            );
        }
        fired
    }
}

fn marker_position(condition: AlertCondition) -> MarkerPosition {
    match condition {
        AlertCondition::Above
        | AlertCondition::CrossesAbove
        | AlertCondition::AboveMetric
        | AlertCondition::CrossesAboveMetric => MarkerPosition::BelowBar,
        _ => MarkerPosition::AboveBar,
    }
}

/// Metrics recorded alongside each log entry
const CONTEXT_METRICS: [(&str, &str); 8] = [
    ("orderbook", "price"),
    ("orderbook", "bpr"),
    ("orderbook", "ld_pct"),
    ("fair_value", "vwmp"),
    ("fair_value", "ifv"),
    ("regime", "regime"),
    ("entry", "signal"),
    ("directional", "bias"),
];

fn snapshot_context(registry: &MetricRegistry, view: &SnapshotView) -> BTreeMap<String, String> {
    CONTEXT_METRICS
        .iter()
        .filter_map(|(section, key)| {
            let d = registry.get(section, key)?;
            let value = d.value(view)?;
            Some((d.path(), d.format_value(&value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::sinks::MockAlertSink;
    use crate::alerts::AlertFrequency;

    fn manager() -> AlertManager {
        AlertManager::new("BTCUSDT", Arc::new(MetricRegistry::standard()), 3)
    }

    fn view(bar_id: i64, ld_pct: f64) -> SnapshotView {
        let mut v = SnapshotView::sample(bar_id);
        v.metrics.ld_pct = ld_pct;
        v
    }

    #[test]
    fn test_upsert_assigns_id_and_replaces() {
        let mut m = manager();
        let id = m
            .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 5.0))
            .unwrap();
        assert_eq!(id.len(), 36);

        let mut edited = m.get(&id).unwrap().clone();
        edited.threshold = Some(10.0);
        assert_eq!(m.upsert(edited).unwrap(), id);
        assert_eq!(m.alerts().len(), 1);
        assert_eq!(m.get(&id).unwrap().threshold, Some(10.0));

        assert!(m.remove(&id));
        assert!(!m.remove(&id));
    }

    #[test]
    fn test_validation_errors() {
        let m = manager();
        assert_eq!(
            m.validate(&Alert::threshold("orderbook", "nope", AlertCondition::Above, 1.0)),
            Err(AlertError::UnknownMetric("orderbook.nope".into()))
        );
        assert!(matches!(
            m.validate(&Alert::threshold("regime", "regime", AlertCondition::Above, 1.0)),
            Err(AlertError::IncompatibleCondition { .. })
        ));
        assert!(matches!(
            m.validate(&Alert::bare("orderbook", "ld_pct", AlertCondition::CrossesAbove)),
            Err(AlertError::MissingField { field: "threshold", .. })
        ));
        assert!(matches!(
            m.validate(&Alert::compare("orderbook", "price", AlertCondition::AboveMetric, "regime.regime")),
            Err(AlertError::IncompatibleCondition { .. })
        ));
        assert!(m
            .validate(&Alert::compare("orderbook", "price", AlertCondition::AboveMetric, "vwmp"))
            .is_err());
        assert!(m
            .validate(&Alert::compare("fair_value", "ifv", AlertCondition::AboveMetric, "vwmp"))
            .is_ok());
    }

    #[test]
    fn test_firing_logs_and_delivers_once() {
        let mut sink = MockAlertSink::new();
        sink.expect_deliver()
            .withf(|fired| fired.metric == "orderbook.ld_pct" && fired.marker.is_some())
            .times(1)
            .return_const(());

        let mut m = manager();
        m.add_sink(Box::new(sink));
        m.upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0))
            .unwrap();

        assert!(m.evaluate(&view(60, 5.0), 0).is_empty());
        let fired = m.evaluate(&view(120, 15.0), 1_000);
        assert_eq!(fired.len(), 1);
        assert!(m.evaluate(&view(180, 20.0), 2_000).is_empty());

        assert_eq!(m.log().len(), 1);
        let entry = m.log().latest().unwrap();
        assert_eq!(entry.ts, 1_000);
        assert!(entry.context.contains_key("orderbook.price"));
        assert_eq!(entry.marker.as_ref().unwrap().position, MarkerPosition::BelowBar);
    }

    #[test]
    fn test_one_time_alert_stays_disabled() {
        let mut m = manager();
        let id = m
            .upsert(
                Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0)
                    .with_frequency(AlertFrequency::OneTime),
            )
            .unwrap();

        assert_eq!(m.evaluate(&view(60, 5.0), 0).len(), 1);
        assert!(!m.get(&id).unwrap().enabled);
        for bar in 2..6 {
            assert!(m.evaluate(&view(bar * 60, 5.0), bar * 60_000).is_empty());
        }

        assert!(m.set_enabled(&id, true));
        assert_eq!(m.evaluate(&view(600, 5.0), 600_000).len(), 1);
    }

    #[test]
    fn test_log_capped() {
        let mut m = manager();
        m.upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0))
            .unwrap();
        for bar in 1..=5 {
            m.evaluate(&view(bar * 60, 5.0), bar * 60_000);
        }
        assert_eq!(m.log().len(), 3);
    }

    #[test]
    fn test_reset_runtime_blocks_stale_cross() {
        let mut m = manager();
        m.upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0))
            .unwrap();
        m.evaluate(&view(60, 5.0), 0);
        m.reset_runtime();
        assert!(m.evaluate(&view(120, 15.0), 1_000).is_empty());
    }
}
