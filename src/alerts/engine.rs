//! Pure alert transition: `evaluate(alert, ctx) -> Evaluation`
//!
//! The caller owns persistence of the returned alert. Nothing here mutates
//! shared state.

use super::registry::{MetricDescriptor, MetricRegistry, MetricValue};
use super::{Alert, AlertCondition, AlertFrequency};
use crate::engine::SnapshotView;

/// Minimum spacing for `once_per_minute`
pub const MINUTE_MS: i64 = 60_000;

/// Everything an evaluation reads
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub registry: &'a MetricRegistry,
    pub view: &'a SnapshotView,
    pub now_ms: i64,
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub triggered: bool,
    /// The alert with runtime updated; identical to the input when skipped
    pub alert: Alert,
    pub value: Option<MetricValue>,
    pub formatted_value: Option<String>,
    pub message: Option<String>,
}

impl Evaluation {
    fn skipped(alert: &Alert) -> Self {
        Self {
            triggered: false,
            alert: alert.clone(),
            value: None,
            formatted_value: None,
            message: None,
        }
    }

    /// Not evaluable, but the primary value is defined and still tracked
    fn observed(alert: &Alert, descriptor: &MetricDescriptor, value: MetricValue) -> Self {
        let mut updated = alert.clone();
        updated.runtime.last_value = Some(value.clone());
        Self {
            triggered: false,
            alert: updated,
            formatted_value: Some(descriptor.format_value(&value)),
            value: Some(value),
            message: None,
        }
    }
}

/// Evaluate one alert against one view
pub fn evaluate(alert: &Alert, ctx: &EvalContext<'_>) -> Evaluation {
    if !alert.enabled {
        return Evaluation::skipped(alert);
    }

    let descriptor = match ctx.registry.get(&alert.section, &alert.metric_key) {
        Some(d) => d,
        None => return Evaluation::skipped(alert),
    };
    let value = match descriptor.value(ctx.view) {
        Some(v) if v.is_valid() => v,
        _ => return Evaluation::skipped(alert),
    };

    let prev = alert.runtime.last_value.as_ref();
    let mut diff: Option<f64> = None;

    let met = match alert.condition {
        AlertCondition::Above
        | AlertCondition::Below
        | AlertCondition::CrossesAbove
        | AlertCondition::CrossesBelow => {
            let (cur, threshold) = match (value.as_number(), alert.threshold) {
                (Some(cur), Some(t)) if t.is_finite() => (cur, t),
                _ => return Evaluation::skipped(alert),
            };
            let prev = prev.and_then(MetricValue::as_number);
            compare(alert.condition, prev, cur, threshold)
        }
        AlertCondition::AboveMetric
        | AlertCondition::BelowMetric
        | AlertCondition::CrossesAboveMetric
        | AlertCondition::CrossesBelowMetric => {
            let cur = match value.as_number() {
                Some(cur) => cur,
                None => return Evaluation::skipped(alert),
            };
            let other = match compare_value(alert, ctx) {
                Some(other) => other,
                None => return Evaluation::observed(alert, descriptor, value),
            };
            let d = cur - other;
            diff = Some(d);
            compare(alert.condition, alert.runtime.last_diff, d, 0.0)
        }
        AlertCondition::Is => match alert.target.as_deref() {
            Some(target) => value.matches(target),
            None => return Evaluation::skipped(alert),
        },
        AlertCondition::Changes => prev.map_or(false, |p| *p != value),
        AlertCondition::ChangesTo => match alert.target.as_deref() {
            Some(target) => prev.map_or(false, |p| !p.matches(target)) && value.matches(target),
            None => return Evaluation::skipped(alert),
        },
    };

    let mut updated = alert.clone();
    updated.runtime.last_value = Some(value.clone());
    if diff.is_some() {
        updated.runtime.last_diff = diff;
    }

    let triggered = met && throttle_allows(alert, ctx);
    let formatted = descriptor.format_value(&value);
    let mut message = None;

    if triggered {
        updated.runtime.last_fired_bar_id = Some(ctx.view.bar_id());
        updated.runtime.last_fired_ts = Some(ctx.now_ms);
        if alert.frequency == AlertFrequency::OneTime {
            updated.enabled = false;
        }
        message = Some(describe(alert, descriptor, &formatted));
    }

    Evaluation {
        triggered,
        alert: updated,
        value: Some(value),
        formatted_value: Some(formatted),
        message,
    }
}

/// Threshold rule; cross rules need a previous value on the other side
fn compare(condition: AlertCondition, prev: Option<f64>, cur: f64, boundary: f64) -> bool {
    match condition {
        AlertCondition::Above | AlertCondition::AboveMetric => cur > boundary,
        AlertCondition::Below | AlertCondition::BelowMetric => cur < boundary,
        AlertCondition::CrossesAbove | AlertCondition::CrossesAboveMetric => {
            prev.map_or(false, |p| p <= boundary && cur > boundary)
        }
        AlertCondition::CrossesBelow | AlertCondition::CrossesBelowMetric => {
            prev.map_or(false, |p| p >= boundary && cur < boundary)
        }
        _ => false,
    }
}

fn compare_value(alert: &Alert, ctx: &EvalContext<'_>) -> Option<f64> {
    let (section, key) = alert.compare_path()?;
    let other = ctx.registry.get(section, key)?.value(ctx.view)?;
    other.as_number().filter(|n| n.is_finite())
}

fn throttle_allows(alert: &Alert, ctx: &EvalContext<'_>) -> bool {
    match alert.frequency {
        AlertFrequency::OneTime => true,
        AlertFrequency::OncePerBar => alert.runtime.last_fired_bar_id != Some(ctx.view.bar_id()),
        AlertFrequency::OncePerMinute => alert
            .runtime
            .last_fired_ts
            .map_or(true, |ts| ctx.now_ms - ts >= MINUTE_MS),
    }
}

fn describe(alert: &Alert, descriptor: &MetricDescriptor, formatted: &str) -> String {
    let rule = match alert.condition {
        AlertCondition::Above => format!("above {}", fmt_threshold(alert)),
        AlertCondition::Below => format!("below {}", fmt_threshold(alert)),
        AlertCondition::CrossesAbove => format!("crossed above {}", fmt_threshold(alert)),
        AlertCondition::CrossesBelow => format!("crossed below {}", fmt_threshold(alert)),
        AlertCondition::AboveMetric => format!("above {}", compare_label(alert)),
        AlertCondition::BelowMetric => format!("below {}", compare_label(alert)),
        AlertCondition::CrossesAboveMetric => format!("crossed above {}", compare_label(alert)),
        AlertCondition::CrossesBelowMetric => format!("crossed below {}", compare_label(alert)),
        AlertCondition::Is => format!("is {}", alert.target.as_deref().unwrap_or("")),
        AlertCondition::Changes => "changed".to_string(),
        AlertCondition::ChangesTo => {
            format!("changed to {}", alert.target.as_deref().unwrap_or(""))
        }
    };
    format!("{} {} ({})", descriptor.label, rule, formatted)
}

fn fmt_threshold(alert: &Alert) -> String {
    alert.threshold.map(|t| t.to_string()).unwrap_or_default()
}

fn compare_label(alert: &Alert) -> String {
    alert.compare_metric_key.clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SnapshotView;

    fn view_with_ld(bar_id: i64, ld_pct: f64) -> SnapshotView {
        let mut view = SnapshotView::sample(bar_id);
        view.metrics.ld_pct = ld_pct;
        view
    }

    fn run(alert: &Alert, registry: &MetricRegistry, view: &SnapshotView, now_ms: i64) -> Evaluation {
        evaluate(
            alert,
            &EvalContext {
                registry,
                view,
                now_ms,
            },
        )
    }

    #[test]
    fn test_crosses_above_needs_prior_below() {
        let registry = MetricRegistry::standard();
        let alert = Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0);

        // single bar with no prior value
        let first = run(&alert, &registry, &view_with_ld(60, 11.0), 0);
        assert!(!first.triggered);
        assert_eq!(first.alert.runtime.last_value, Some(MetricValue::Number(11.0)));

        // already above
        let second = run(&first.alert, &registry, &view_with_ld(120, 12.0), 0);
        assert!(!second.triggered);

        // [T-1, T+1]
        let below = run(&alert, &registry, &view_with_ld(60, 9.0), 0);
        let cross = run(&below.alert, &registry, &view_with_ld(120, 11.0), 0);
        assert!(cross.triggered);
        assert_eq!(cross.alert.runtime.last_fired_bar_id, Some(120));
        assert!(cross.message.unwrap().contains("crossed above 10"));
    }

    #[test]
    fn test_crosses_below_boundary_inclusive_on_prev() {
        let registry = MetricRegistry::standard();
        let alert = Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesBelow, 0.0);
        let at = run(&alert, &registry, &view_with_ld(60, 0.0), 0);
        let cross = run(&at.alert, &registry, &view_with_ld(120, -1.0), 0);
        assert!(cross.triggered);
    }

    #[test]
    fn test_nan_skips_without_runtime_update() {
        let registry = MetricRegistry::standard();
        let alert = Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0);
        let eval = run(&alert, &registry, &view_with_ld(60, f64::NAN), 0);
        assert!(!eval.triggered);
        assert_eq!(eval.alert, alert);
    }

    #[test]
    fn test_disabled_alert_untouched() {
        let registry = MetricRegistry::standard();
        let mut alert = Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0);
        alert.enabled = false;
        let eval = run(&alert, &registry, &view_with_ld(60, 50.0), 0);
        assert!(!eval.triggered);
        assert_eq!(eval.alert.runtime.last_value, None);
    }

    #[test]
    fn test_one_time_disables() {
        let registry = MetricRegistry::standard();
        let alert = Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0)
            .with_frequency(AlertFrequency::OneTime);
        let eval = run(&alert, &registry, &view_with_ld(60, 5.0), 0);
        assert!(eval.triggered);
        assert!(!eval.alert.enabled);

        let again = run(&eval.alert, &registry, &view_with_ld(120, 5.0), 0);
        assert!(!again.triggered);
    }

    #[test]
    fn test_once_per_bar_and_minute() {
        let registry = MetricRegistry::standard();
        let per_bar = Alert::threshold("orderbook", "ld_pct", AlertCondition::Above, 1.0);
        let a = run(&per_bar, &registry, &view_with_ld(60, 5.0), 0);
        let b = run(&a.alert, &registry, &view_with_ld(60, 6.0), 1_000);
        let c = run(&b.alert, &registry, &view_with_ld(120, 6.0), 2_000);
        assert!(a.triggered);
        assert!(!b.triggered);
        // throttled trigger still tracks the value
        assert_eq!(b.alert.runtime.last_value, Some(MetricValue::Number(6.0)));
        assert!(c.triggered);

        let per_minute = per_bar.clone().with_frequency(AlertFrequency::OncePerMinute);
        let a = run(&per_minute, &registry, &view_with_ld(60, 5.0), 0);
        let b = run(&a.alert, &registry, &view_with_ld(120, 5.0), 59_999);
        let c = run(&b.alert, &registry, &view_with_ld(180, 5.0), 60_000);
        assert!(a.triggered);
        assert!(!b.triggered);
        assert!(c.triggered);
    }

    #[test]
    fn test_metric_vs_metric_cross() {
        let registry = MetricRegistry::standard();
        let alert = Alert::compare("orderbook", "price", AlertCondition::CrossesAboveMetric, "fair_value.vwmp");

        let mut below = SnapshotView::sample(60);
        below.metrics.price = 99.0;
        below.metrics.vwmp = 100.0;
        let mut above = SnapshotView::sample(120);
        above.metrics.price = 101.0;
        above.metrics.vwmp = 100.0;

        let first = run(&alert, &registry, &below, 0);
        assert_eq!(first.alert.runtime.last_diff, Some(-1.0));
        let second = run(&first.alert, &registry, &above, 0);
        assert!(second.triggered);
        assert_eq!(second.alert.runtime.last_diff, Some(1.0));
    }

    #[test]
    fn test_enum_conditions() {
        let registry = MetricRegistry::standard();
        let mut acc = SnapshotView::sample(60);
        acc.metrics.regime = crate::features::Regime::Accumulation;
        let neutral = SnapshotView::sample(120);

        let is = Alert::target("regime", "regime", AlertCondition::Is, "accumulation");
        assert!(run(&is, &registry, &acc, 0).triggered);
        assert!(!run(&is, &registry, &neutral, 0).triggered);

        let changes = Alert::bare("regime", "regime", AlertCondition::Changes);
        let first = run(&changes, &registry, &neutral, 0);
        assert!(!first.triggered);
        let second = run(&first.alert, &registry, &acc, 0);
        assert!(second.triggered);

        let changes_to = Alert::target("regime", "regime", AlertCondition::ChangesTo, "neutral");
        let first = run(&changes_to, &registry, &acc, 0);
        assert!(!first.triggered);
        let second = run(&first.alert, &registry, &neutral, 0);
        assert!(second.triggered);
    }

    #[test]
    fn test_missing_metric_value_skips() {
        let registry = MetricRegistry::standard();
        // sample views carry no wall
        let alert = Alert::threshold("walls", "bid_wall_price", AlertCondition::Above, 1.0);
        let eval = run(&alert, &registry, &SnapshotView::sample(60), 0);
        assert!(!eval.triggered);
        assert_eq!(eval.alert, alert);
    }

    #[test]
    fn test_missing_compare_metric_tracks_value() {
        let registry = MetricRegistry::standard();
        let alert = Alert::compare("orderbook", "price", AlertCondition::AboveMetric, "walls.bid_wall_price");
        // sample views carry no wall
        let mut view = SnapshotView::sample(60);
        view.metrics.price = 101.0;
        let eval = run(&alert, &registry, &view, 0);

        assert!(!eval.triggered);
        assert_eq!(eval.alert.runtime.last_value, Some(MetricValue::Number(101.0)));
        assert_eq!(eval.alert.runtime.last_diff, None);
    }
}
