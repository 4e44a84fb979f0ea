//! Alpha scores, market consensus and regime classification
//!
//! Alpha MM / Swing / HTF map a signed pressure signal onto 0-100 around a
//! neutral 50, scaled by a per-mode sensitivity control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alpha gains per mode
pub const MM_GAIN: f64 = 0.8;
pub const SWING_GAIN: f64 = 0.6;
pub const HTF_GAIN: f64 = 0.5;

/// LD% beyond which the regime leaves neutral
pub const REGIME_THRESHOLD: f64 = 5.0;

/// Per-mode sensitivity controls (0-100, 50 = unit gain)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaSensitivity {
    pub mm: f64,
    pub swing: f64,
    pub htf: f64,
}

impl Default for AlphaSensitivity {
    fn default() -> Self {
        Self {
            mm: 50.0,
            swing: 50.0,
            htf: 50.0,
        }
    }
}

/// Map the 0-100 control to a multiplier.
///
/// Up to 50 a cubic ease from 0.001 to 1.0, above 50 linear from 1.0 to 2.0.
pub fn sensitivity_multiplier(control: f64) -> f64 {
    let s = if control.is_finite() {
        control.clamp(0.0, 100.0)
    } else {
        50.0
    };
    if s <= 50.0 {
        let t = s / 50.0;
        0.001 + (1.0 - 0.001) * t * t * t
    } else {
        1.0 + (s - 50.0) / 50.0
    }
}

/// `clamp(50 + signal * multiplier * gain, 0, 100)`
pub fn alpha_score(signal: f64, sensitivity: f64, gain: f64) -> f64 {
    if !signal.is_finite() {
        return 50.0;
    }
    (50.0 + signal * sensitivity_multiplier(sensitivity) * gain).clamp(0.0, 100.0)
}

/// The three alpha scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaScores {
    pub mm: f64,
    pub swing: f64,
    pub htf: f64,
}

impl AlphaScores {
    pub fn compute(
        near_pressure_pct: f64,
        ld_pct: f64,
        depth_imbalance_pct: f64,
        sensitivity: &AlphaSensitivity,
    ) -> Self {
        Self {
            mm: alpha_score(near_pressure_pct, sensitivity.mm, MM_GAIN),
            swing: alpha_score(ld_pct, sensitivity.swing, SWING_GAIN),
            htf: alpha_score(depth_imbalance_pct, sensitivity.htf, HTF_GAIN),
        }
    }
}

/// Market consensus signal: mean of the three timeframe biases
pub fn market_consensus(vs_vwmp_pct: f64, ld_pct: f64, vs_ifv_pct: f64) -> f64 {
    let mm_bias = -vs_vwmp_pct * 10.0;
    let swing_bias = ld_pct * 0.5;
    let htf_bias = -vs_ifv_pct * 5.0;
    (mm_bias + swing_bias + htf_bias) / 3.0
}

/// Order-flow regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Accumulation,
    Distribution,
    Neutral,
}

impl Default for Regime {
    fn default() -> Self {
        Regime::Neutral
    }
}

impl Regime {
    pub fn classify(ld_pct: f64) -> Self {
        if ld_pct > REGIME_THRESHOLD {
            Regime::Accumulation
        } else if ld_pct < -REGIME_THRESHOLD {
            Regime::Distribution
        } else {
            Regime::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Accumulation => "accumulation",
            Regime::Distribution => "distribution",
            Regime::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inputs to the next-regime probability
#[derive(Debug, Clone, Copy)]
pub struct RegimeInputs {
    pub near_ratio: f64,
    pub far_ratio: f64,
    pub bpr: f64,
    pub vs_vwmp_pct: f64,
    pub spread_pct: f64,
}

/// Probability (0-100) that the next regime is accumulation
pub fn next_regime_probability(inputs: &RegimeInputs) -> f64 {
    let momentum_signal = (inputs.near_ratio - inputs.far_ratio) * 25.0;
    let bpr_signal = ((inputs.bpr - 1.0) * 20.0).clamp(-20.0, 20.0);
    let fair_value_signal = -inputs.vs_vwmp_pct * 5.0;
    let spread_signal = if inputs.spread_pct < 0.05 {
        5.0
    } else if inputs.spread_pct > 0.2 {
        -5.0
    } else {
        0.0
    };

    let raw = 50.0 + momentum_signal + bpr_signal + fair_value_signal + spread_signal;
    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        50.0
    }
}
