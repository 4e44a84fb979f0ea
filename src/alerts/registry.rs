//! Metric Registry - `(section, key)` -> typed descriptor
//!
//! Built once at startup. Each descriptor carries a getter over the
//! snapshot view, a display format and the metric kind, so alert
//! evaluation never walks the view by string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::engine::SnapshotView;
use crate::features::RangeBand;

/// Number or enum/string value read from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }

    /// Usable for evaluation (NaN and infinities are not)
    pub fn is_valid(&self) -> bool {
        match self {
            MetricValue::Number(n) => n.is_finite(),
            MetricValue::Text(_) => true,
        }
    }

    /// Equality against a user-supplied target
    pub fn matches(&self, target: &str) -> bool {
        match self {
            MetricValue::Number(n) => target
                .trim()
                .parse::<f64>()
                .map(|t| (t - n).abs() < 1e-9)
                .unwrap_or(false),
            MetricValue::Text(s) => s.eq_ignore_ascii_case(target.trim()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Number,
    Enum,
    String,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Number => write!(f, "number"),
            MetricKind::Enum => write!(f, "enum"),
            MetricKind::String => write!(f, "string"),
        }
    }
}

/// Display format for a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFormat {
    Price,
    Percent,
    Ratio,
    Score,
    Volume,
    Bps,
    Label,
}

impl MetricFormat {
    pub fn apply(&self, value: &MetricValue) -> String {
        let n = match value {
            MetricValue::Number(n) => *n,
            MetricValue::Text(s) => return s.clone(),
        };
        match self {
            MetricFormat::Price => format!("{:.2}", n),
            MetricFormat::Percent => format!("{:.2}%", n),
            MetricFormat::Ratio => format!("{:.2}", n),
            MetricFormat::Score => format!("{:.0}", n),
            MetricFormat::Volume => format!("{:.4}", n),
            MetricFormat::Bps => format!("{:.1} bps", n),
            MetricFormat::Label => n.to_string(),
        }
    }
}

#[derive(Clone, Copy)]
enum Getter {
    Number(fn(&SnapshotView) -> Option<f64>),
    Text(fn(&SnapshotView) -> Option<String>),
}

/// One registered metric
#[derive(Clone)]
pub struct MetricDescriptor {
    pub section: &'static str,
    pub key: &'static str,
    pub label: &'static str,
    pub kind: MetricKind,
    pub format: MetricFormat,
    getter: Getter,
}

impl MetricDescriptor {
    fn number(
        section: &'static str,
        key: &'static str,
        label: &'static str,
        format: MetricFormat,
        get: fn(&SnapshotView) -> Option<f64>,
    ) -> Self {
        Self {
            section,
            key,
            label,
            kind: MetricKind::Number,
            format,
            getter: Getter::Number(get),
        }
    }

    fn enumeration(
        section: &'static str,
        key: &'static str,
        label: &'static str,
        get: fn(&SnapshotView) -> Option<String>,
    ) -> Self {
        Self {
            section,
            key,
            label,
            kind: MetricKind::Enum,
            format: MetricFormat::Label,
            getter: Getter::Text(get),
        }
    }

    /// Read the metric from a view; None when undefined for this bar
    pub fn value(&self, view: &SnapshotView) -> Option<MetricValue> {
        match self.getter {
            Getter::Number(get) => get(view).map(MetricValue::Number),
            Getter::Text(get) => get(view).map(MetricValue::Text),
        }
    }

    pub fn format_value(&self, value: &MetricValue) -> String {
        self.format.apply(value)
    }

    pub fn path(&self) -> String {
        format!("{}.{}", self.section, self.key)
    }
}

impl fmt::Debug for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricDescriptor")
            .field("section", &self.section)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Dispatch table keyed by section then metric key
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    descriptors: Vec<MetricDescriptor>,
    index: HashMap<&'static str, HashMap<&'static str, usize>>,
}

impl MetricRegistry {
    pub fn from_descriptors(descriptors: Vec<MetricDescriptor>) -> Self {
        let mut index: HashMap<&'static str, HashMap<&'static str, usize>> = HashMap::new();
        for (i, d) in descriptors.iter().enumerate() {
            index.entry(d.section).or_default().insert(d.key, i);
        }
        Self { descriptors, index }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&MetricDescriptor> {
        let i = *self.index.get(section)?.get(key)?;
        self.descriptors.get(i)
    }

    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    pub fn sections(&self) -> Vec<&'static str> {
        let mut sections: Vec<&'static str> = Vec::new();
        for d in &self.descriptors {
            if !sections.contains(&d.section) {
                sections.push(d.section);
            }
        }
        sections
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Every metric the engine exposes
    pub fn standard() -> Self {
        use MetricFormat::*;
        let n = MetricDescriptor::number;
        let e = MetricDescriptor::enumeration;

        Self::from_descriptors(vec![
            // Order book
            n("orderbook", "price", "Price", Price, |v| Some(v.metrics.price)),
            n("orderbook", "mid", "Mid", Price, |v| Some(v.metrics.mid)),
            n("orderbook", "spread", "Spread", Price, |v| Some(v.metrics.spread)),
            n("orderbook", "spread_pct", "Spread %", Percent, |v| Some(v.metrics.spread_pct)),
            n("orderbook", "spread_bps", "Spread", Bps, |v| Some(v.metrics.spread_bps)),
            n("orderbook", "bid_volume", "Bid volume", Volume, |v| Some(v.metrics.bid_volume)),
            n("orderbook", "ask_volume", "Ask volume", Volume, |v| Some(v.metrics.ask_volume)),
            n("orderbook", "bpr", "BPR", Ratio, |v| Some(v.metrics.bpr)),
            n("orderbook", "ld", "LD", Volume, |v| Some(v.metrics.ld)),
            n("orderbook", "ld_pct", "LD %", Percent, |v| Some(v.metrics.ld_pct)),
            n("orderbook", "ld_pct_delta", "LD % change", Percent, |v| {
                v.metrics.deltas.map(|d| d.ld_pct)
            }),
            n("orderbook", "near_delta", "Near delta", Volume, |v| Some(v.metrics.near_delta)),
            n("orderbook", "far_delta", "Far delta", Volume, |v| Some(v.metrics.far_delta)),
            n("orderbook", "near_ratio", "Near ratio", Ratio, |v| Some(v.metrics.near_ratio)),
            n("orderbook", "far_ratio", "Far ratio", Ratio, |v| Some(v.metrics.far_ratio)),
            n("orderbook", "near_pressure_pct", "Near pressure", Percent, |v| {
                Some(v.metrics.near_pressure_pct)
            }),
            e("orderbook", "ld_momentum", "LD momentum", |v| {
                Some(v.metrics.ld_momentum.as_str().to_string())
            }),
            e("orderbook", "spread_state", "Spread state", |v| {
                Some(v.metrics.spread_state.as_str().to_string())
            }),
            e("orderbook", "spread_direction", "Spread direction", |v| {
                Some(v.metrics.spread_direction.as_str().to_string())
            }),
            // Fair value
            n("fair_value", "vwmp", "VWMP", Price, |v| Some(v.metrics.vwmp)),
            n("fair_value", "ifv", "IFV", Price, |v| Some(v.metrics.ifv)),
            n("fair_value", "vs_vwmp_pct", "vs VWMP", Percent, |v| Some(v.metrics.vs_vwmp_pct)),
            n("fair_value", "vs_ifv_pct", "vs IFV", Percent, |v| Some(v.metrics.vs_ifv_pct)),
            n("fair_value", "bid_avg_price", "Bid avg", Price, |v| Some(v.metrics.bid_avg_price)),
            n("fair_value", "ask_avg_price", "Ask avg", Price, |v| Some(v.metrics.ask_avg_price)),
            n("fair_value", "depth_imbalance_pct", "Depth imbalance", Percent, |v| {
                Some(v.metrics.depth_imbalance_pct)
            }),
            // Walls and structure
            n("walls", "bid_wall_price", "Bid wall", Price, |v| {
                v.metrics.bid_wall.map(|w| w.price)
            }),
            n("walls", "ask_wall_price", "Ask wall", Price, |v| {
                v.metrics.ask_wall.map(|w| w.price)
            }),
            n("walls", "bid_wall_ratio", "Bid wall ratio", Ratio, |v| {
                v.metrics.bid_wall.map(|w| w.ratio)
            }),
            n("walls", "ask_wall_ratio", "Ask wall ratio", Ratio, |v| {
                v.metrics.ask_wall.map(|w| w.ratio)
            }),
            n("walls", "bid_wall_proximity", "Bid wall proximity", Score, |v| {
                Some(v.metrics.bid_wall_proximity)
            }),
            n("walls", "ask_wall_proximity", "Ask wall proximity", Score, |v| {
                Some(v.metrics.ask_wall_proximity)
            }),
            n("walls", "support_price", "Support", Price, |v| {
                v.metrics.support.map(|l| l.price)
            }),
            n("walls", "resistance_price", "Resistance", Price, |v| {
                v.metrics.resistance.map(|l| l.price)
            }),
            n("walls", "support_score", "Support score", Score, |v| Some(v.metrics.support_score)),
            n("walls", "resistance_score", "Resistance score", Score, |v| {
                Some(v.metrics.resistance_score)
            }),
            // Alpha
            n("alpha", "mm", "Alpha MM", Score, |v| Some(v.metrics.alpha.mm)),
            n("alpha", "swing", "Alpha Swing", Score, |v| Some(v.metrics.alpha.swing)),
            n("alpha", "htf", "Alpha HTF", Score, |v| Some(v.metrics.alpha.htf)),
            n("alpha", "mcs", "MCS", Ratio, |v| Some(v.metrics.mcs)),
            // Regime
            e("regime", "regime", "Regime", |v| Some(v.metrics.regime.as_str().to_string())),
            n("regime", "regime_score", "Regime score", Percent, |v| Some(v.metrics.regime_score)),
            n("regime", "next_regime_prob", "Next regime", Score, |v| {
                Some(v.metrics.next_regime_prob)
            }),
            // Entry
            n("entry", "long_certainty", "Long certainty", Score, |v| Some(v.entry.long)),
            n("entry", "short_certainty", "Short certainty", Score, |v| Some(v.entry.short)),
            e("entry", "signal", "Entry signal", |v| Some(v.entry.signal.as_str().to_string())),
            // Pulse
            n("pulse", "pulse", "Pulse", Ratio, |v| v.pulse.map(|p| p.pulse)),
            n("pulse", "bbw", "BBW", Ratio, |v| v.pulse.map(|p| p.bbw)),
            n("pulse", "bbb", "BB%B", Ratio, |v| v.pulse.map(|p| p.bbb)),
            n("pulse", "bbb_smoothed", "BB%B smoothed", Ratio, |v| {
                v.pulse.map(|p| p.bbb_smoothed)
            }),
            e("pulse", "state", "Pulse state", |v| {
                v.pulse.map(|p| {
                    if p.top_touch {
                        "top".to_string()
                    } else if p.bottom_touch {
                        "bottom".to_string()
                    } else {
                        "inside".to_string()
                    }
                })
            }),
            e("pulse", "signal", "Pulse signal", |v| {
                v.pulse.map(|p| {
                    if p.first_up {
                        "first_up".to_string()
                    } else if p.first_down {
                        "first_down".to_string()
                    } else if p.greedy {
                        "greedy".to_string()
                    } else {
                        "none".to_string()
                    }
                })
            }),
            // Directional
            e("directional", "bias", "Directional bias", |v| {
                v.directional.as_ref().map(|d| d.bias.as_str().to_string())
            }),
            e("directional", "confidence", "Directional confidence", |v| {
                v.directional.as_ref().map(|d| d.confidence.as_str().to_string())
            }),
            n("directional", "score", "Directional score", Ratio, |v| {
                v.directional.as_ref().map(|d| d.score)
            }),
            e("directional", "short_bias", "Short-range bias", |v| band_bias(v, RangeBand::Short)),
            e("directional", "medium_bias", "Medium-range bias", |v| {
                band_bias(v, RangeBand::Medium)
            }),
            e("directional", "long_bias", "Long-range bias", |v| band_bias(v, RangeBand::Long)),
            n("directional", "strongest_support", "Strongest support", Price, |v| {
                v.directional
                    .as_ref()
                    .and_then(|d| d.strongest_support.map(|l| l.price))
            }),
            n("directional", "strongest_resistance", "Strongest resistance", Price, |v| {
                v.directional
                    .as_ref()
                    .and_then(|d| d.strongest_resistance.map(|l| l.price))
            }),
        ])
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn band_bias(view: &SnapshotView, band: RangeBand) -> Option<String> {
    view.directional
        .as_ref()
        .and_then(|d| d.band(band))
        .map(|b| b.bias.as_str().to_string())
}
