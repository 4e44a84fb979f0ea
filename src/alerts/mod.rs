//! Alert Evaluation Engine
//!
//! User-defined rules over the metric registry, evaluated against each
//! snapshot view with exactly-once firing per qualifying transition.
//!
//! - `registry`: typed `(section, key)` -> metric descriptor table
//! - `engine`: pure `evaluate(alert, ctx)` transition
//! - `log`: capped per-instrument firing log with chart markers
//! - `sinks`: delivery collaborators (tracing, channel)
//! - `manager`: owns the alert list, log and sinks for one instrument

pub mod engine;
pub mod log;
pub mod manager;
pub mod registry;
pub mod sinks;

pub use engine::{evaluate, EvalContext, Evaluation};
pub use log::{AlertLog, AlertLogEntry, ChartMarker, MarkerPosition};
pub use manager::AlertManager;
pub use registry::{MetricDescriptor, MetricFormat, MetricKind, MetricRegistry, MetricValue};
pub use sinks::{AlertSink, ChannelSink, TracingSink};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::engine::SnapshotView;

/// Rule applied to a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Above,
    Below,
    CrossesAbove,
    CrossesBelow,
    AboveMetric,
    BelowMetric,
    CrossesAboveMetric,
    CrossesBelowMetric,
    Is,
    Changes,
    ChangesTo,
}

impl AlertCondition {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "above" => Some(AlertCondition::Above),
            "below" => Some(AlertCondition::Below),
            "crosses_above" => Some(AlertCondition::CrossesAbove),
            "crosses_below" => Some(AlertCondition::CrossesBelow),
            "above_metric" => Some(AlertCondition::AboveMetric),
            "below_metric" => Some(AlertCondition::BelowMetric),
            "crosses_above_metric" => Some(AlertCondition::CrossesAboveMetric),
            "crosses_below_metric" => Some(AlertCondition::CrossesBelowMetric),
            "is" => Some(AlertCondition::Is),
            "changes" => Some(AlertCondition::Changes),
            "changes_to" => Some(AlertCondition::ChangesTo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
            AlertCondition::CrossesAbove => "crosses_above",
            AlertCondition::CrossesBelow => "crosses_below",
            AlertCondition::AboveMetric => "above_metric",
            AlertCondition::BelowMetric => "below_metric",
            AlertCondition::CrossesAboveMetric => "crosses_above_metric",
            AlertCondition::CrossesBelowMetric => "crosses_below_metric",
            AlertCondition::Is => "is",
            AlertCondition::Changes => "changes",
            AlertCondition::ChangesTo => "changes_to",
        }
    }

    /// Threshold-based numeric condition
    pub fn needs_threshold(&self) -> bool {
        matches!(
            self,
            AlertCondition::Above
                | AlertCondition::Below
                | AlertCondition::CrossesAbove
                | AlertCondition::CrossesBelow
        )
    }

    /// Compares against a second registry metric
    pub fn needs_compare_metric(&self) -> bool {
        matches!(
            self,
            AlertCondition::AboveMetric
                | AlertCondition::BelowMetric
                | AlertCondition::CrossesAboveMetric
                | AlertCondition::CrossesBelowMetric
        )
    }

    pub fn needs_target(&self) -> bool {
        matches!(self, AlertCondition::Is | AlertCondition::ChangesTo)
    }

    pub fn is_numeric(&self) -> bool {
        self.needs_threshold() || self.needs_compare_metric()
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Throttling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFrequency {
    /// Disable after the first firing
    OneTime,
    OncePerBar,
    OncePerMinute,
}

impl Default for AlertFrequency {
    fn default() -> Self {
        AlertFrequency::OncePerBar
    }
}

/// Mutable evaluation state carried between evaluations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRuntime {
    pub last_value: Option<MetricValue>,
    /// Last `value - compare` for metric-vs-metric conditions
    pub last_diff: Option<f64>,
    pub last_fired_bar_id: Option<i64>,
    /// Milliseconds
    pub last_fired_ts: Option<i64>,
}

/// Alert definition plus runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    pub section: String,
    pub metric_key: String,
    pub condition: AlertCondition,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub target: Option<String>,
    /// `key` in the same section or `section.key`
    #[serde(default)]
    pub compare_metric_key: Option<String>,
    #[serde(default)]
    pub frequency: AlertFrequency,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default)]
    pub sound: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub runtime: AlertRuntime,
}

fn default_true() -> bool {
    true
}

impl Alert {
    pub fn threshold(section: &str, key: &str, condition: AlertCondition, threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::bare(section, key, condition)
        }
    }

    pub fn target(section: &str, key: &str, condition: AlertCondition, target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..Self::bare(section, key, condition)
        }
    }

    pub fn compare(section: &str, key: &str, condition: AlertCondition, other: &str) -> Self {
        Self {
            compare_metric_key: Some(other.to_string()),
            ..Self::bare(section, key, condition)
        }
    }

    pub fn bare(section: &str, key: &str, condition: AlertCondition) -> Self {
        Self {
            id: String::new(),
            section: section.to_string(),
            metric_key: key.to_string(),
            condition,
            threshold: None,
            target: None,
            compare_metric_key: None,
            frequency: AlertFrequency::default(),
            notify: true,
            sound: false,
            enabled: true,
            runtime: AlertRuntime::default(),
        }
    }

    pub fn with_frequency(mut self, frequency: AlertFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// `section.key`
    pub fn metric_path(&self) -> String {
        format!("{}.{}", self.section, self.metric_key)
    }

    /// Resolve the compare metric to `(section, key)`
    pub fn compare_path(&self) -> Option<(&str, &str)> {
        let other = self.compare_metric_key.as_deref()?;
        Some(match other.split_once('.') {
            Some((section, key)) => (section, key),
            None => (self.section.as_str(), other),
        })
    }
}

/// Definition problems caught at upsert
#[derive(Debug, Error, PartialEq)]
pub enum AlertError {
    #[error("unknown metric {0}")]
    UnknownMetric(String),

    #[error("condition {condition} needs a {field}")]
    MissingField {
        condition: AlertCondition,
        field: &'static str,
    },

    #[error("condition {condition} does not apply to {kind} metric {metric}")]
    IncompatibleCondition {
        condition: AlertCondition,
        kind: MetricKind,
        metric: String,
    },
}

/// Emitted once per firing and handed to delivery sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertFired {
    /// Alert state after the firing
    pub alert: Alert,
    /// `section.key`
    pub metric: String,
    pub value: MetricValue,
    pub formatted_value: String,
    pub message: String,
    pub instrument: String,
    pub bar_id: i64,
    pub ts: i64,
    pub notify: bool,
    pub sound: bool,
    pub marker: Option<ChartMarker>,
    /// Formatted key metrics at firing time
    pub context: BTreeMap<String, String>,
    pub snapshot: SnapshotView,
}
