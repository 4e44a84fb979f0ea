//! Pulse Indicator - Normalized oscillator from inverted Bollinger Band Width
//!
//! Three stages over any price series:
//! 1. BBW (inverted band width) and BB%B from SMA/STDEV windows
//! 2. Pulse: BBW normalized into `[bottom, top]` over a rolling min/max window
//! 3. Zero-lag smoothing of BB%B: `2*EMA(x) - EMA(EMA(x))`
//!
//! The three windows differ in length, so the output series start at
//! different input indices. Pulse index `k` maps to BB%B index
//! `k + pulse_offset` where
//! `pulse_offset = (bbw_len-1) + (pulse_len-1) - (bbb_len-1)`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Guard for the rolling min/max normalization
pub const NORMALIZE_EPSILON: f64 = 1e-10;
/// Fraction of the pulse range counted as touching a bound
pub const TOUCH_TOLERANCE: f64 = 1e-3;

/// Series the pulse is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseSource {
    Open,
    Vwmp,
    Ifv,
    Mid,
}

impl Default for PulseSource {
    fn default() -> Self {
        PulseSource::Open
    }
}

impl PulseSource {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(PulseSource::Open),
            "vwmp" => Some(PulseSource::Vwmp),
            "ifv" => Some(PulseSource::Ifv),
            "mid" => Some(PulseSource::Mid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseSettings {
    pub source: PulseSource,
    /// BBW window
    pub bbw_len: usize,
    /// BB%B window
    pub bbb_len: usize,
    /// Rolling min/max window for normalization
    pub pulse_len: usize,
    /// Band multiplier
    pub mult: f64,
    pub top: f64,
    pub bottom: f64,
    /// Zero-lag EMA length for BB%B
    pub smoothing_len: usize,
    /// Input values retained for incremental updates
    pub history: usize,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            source: PulseSource::Open,
            bbw_len: 20,
            bbb_len: 20,
            pulse_len: 50,
            mult: 2.0,
            top: 100.0,
            bottom: 0.0,
            smoothing_len: 9,
            history: 500,
        }
    }
}

impl PulseSettings {
    /// BB%B index offset of pulse index 0
    pub fn pulse_offset(&self) -> isize {
        (self.bbw_len.max(1) as isize - 1) + (self.pulse_len.max(1) as isize - 1)
            - (self.bbb_len.max(1) as isize - 1)
    }

    /// Input index of pulse index 0
    pub fn pulse_start(&self) -> usize {
        (self.bbw_len.max(1) - 1) + (self.pulse_len.max(1) - 1)
    }
}

/// Per-bar pulse output with its signal flags
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseEvent {
    /// Index into the input series
    pub index: usize,
    pub value: f64,
    pub bbw: f64,
    pub bbb: f64,
    pub bbb_smoothed: f64,
    pub pulse: f64,
    pub top_touch: bool,
    pub bottom_touch: bool,
    /// Pulse left the bottom bound this bar
    pub first_up: bool,
    /// Pulse left the top bound this bar
    pub first_down: bool,
    /// Pulse held the same bound as the previous bar
    pub greedy: bool,
}

fn window_stats(window: &[f64]) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Inverted band width per window; index `i` maps to input `i + len - 1`
pub fn bbw_series(values: &[f64], len: usize, mult: f64) -> Vec<f64> {
    let len = len.max(1);
    if values.len() < len {
        return Vec::new();
    }
    values
        .windows(len)
        .map(|w| {
            let (basis, dev) = window_stats(w);
            let upper = basis + mult * dev;
            let lower = basis - mult * dev;
            if basis.abs() > f64::EPSILON {
                -((upper - lower) / basis * 100.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// BB%B per window; index `i` maps to input `i + len - 1`
pub fn bbb_series(values: &[f64], len: usize, mult: f64) -> Vec<f64> {
    let len = len.max(1);
    if values.len() < len {
        return Vec::new();
    }
    values
        .windows(len)
        .map(|w| {
            let (basis, dev) = window_stats(w);
            let upper = basis + mult * dev;
            let lower = basis - mult * dev;
            let value = w[w.len() - 1];
            if (upper - lower).abs() > f64::EPSILON {
                (value - lower) / (upper - lower)
            } else {
                0.5
            }
        })
        .collect()
}

/// Rolling min/max normalization into `[bottom, top]`
pub fn normalize_series(values: &[f64], len: usize, bottom: f64, top: f64) -> Vec<f64> {
    let len = len.max(1);
    if values.len() < len {
        return Vec::new();
    }
    values
        .windows(len)
        .map(|w| {
            let min = w.iter().copied().fold(f64::INFINITY, f64::min);
            let max = w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let current = w[w.len() - 1];
            bottom + (current - min) / (max - min + NORMALIZE_EPSILON) * (top - bottom)
        })
        .collect()
}

/// EMA seeded with the first value
pub fn ema_series(values: &[f64], len: usize) -> Vec<f64> {
    let alpha = 2.0 / (len.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = match values.first() {
        Some(&v) => v,
        None => return out,
    };
    for &v in values {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Zero-lag smoothing: `2*EMA(x,n) - EMA(EMA(x,n),n)`
pub fn zero_lag_series(values: &[f64], len: usize) -> Vec<f64> {
    let e1 = ema_series(values, len);
    let e2 = ema_series(&e1, len);
    e1.iter().zip(e2.iter()).map(|(a, b)| 2.0 * a - b).collect()
}

/// Running state of `zero_lag_series`; stepping it yields the same values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ZeroLagState {
    e1: Option<f64>,
    e2: Option<f64>,
}

impl ZeroLagState {
    fn step(self, value: f64, len: usize) -> Self {
        let alpha = 2.0 / (len.max(1) as f64 + 1.0);
        let ema = |prev: Option<f64>, v: f64| alpha * v + (1.0 - alpha) * prev.unwrap_or(v);
        let e1 = ema(self.e1, value);
        let e2 = ema(self.e2, e1);
        Self {
            e1: Some(e1),
            e2: Some(e2),
        }
    }

    fn value(&self) -> Option<f64> {
        Some(2.0 * self.e1? - self.e2?)
    }
}

/// Pulse indicator over a bounded input history.
///
/// Windowed stages are recomputed over the retained history. The BB%B
/// smoothing runs on its own state and is not limited to that history.
#[derive(Debug, Clone)]
pub struct PulseIndicator {
    settings: PulseSettings,
    history: VecDeque<f64>,
    smoothing: ZeroLagState,
}

impl PulseIndicator {
    pub fn new(settings: PulseSettings) -> Self {
        Self {
            settings,
            history: VecDeque::new(),
            smoothing: ZeroLagState::default(),
        }
    }

    pub fn settings(&self) -> &PulseSettings {
        &self.settings
    }

    /// Evaluate a full series; one event per bar where all stages are defined
    pub fn compute(&self, values: &[f64]) -> Vec<PulseEvent> {
        let s = &self.settings;
        let bbw = bbw_series(values, s.bbw_len, s.mult);
        let pulse = normalize_series(&bbw, s.pulse_len, s.bottom, s.top);
        let bbb = bbb_series(values, s.bbb_len, s.mult);
        let smoothed = zero_lag_series(&bbb, s.smoothing_len);

        let offset = s.pulse_offset();
        let start = s.pulse_start();
        let bbw_skip = s.pulse_len.max(1) - 1;
        let tolerance = (s.top - s.bottom).abs() * TOUCH_TOLERANCE;

        let mut events: Vec<PulseEvent> = Vec::with_capacity(pulse.len());
        for (k, &p) in pulse.iter().enumerate() {
            let j = k as isize + offset;
            if j < 0 || j as usize >= bbb.len() {
                continue;
            }
            let j = j as usize;
            let index = k + start;

            let top_touch = p >= s.top - tolerance;
            let bottom_touch = p <= s.bottom + tolerance;
            let prev = events.last().filter(|e| e.index + 1 == index);
            let (first_up, first_down, greedy) = match prev {
                Some(prev) => (
                    prev.bottom_touch && !bottom_touch,
                    prev.top_touch && !top_touch,
                    (prev.top_touch && top_touch) || (prev.bottom_touch && bottom_touch),
                ),
                None => (false, false, false),
            };

            events.push(PulseEvent {
                index,
                value: values[index],
                bbw: bbw[k + bbw_skip],
                bbb: bbb[j],
                bbb_smoothed: smoothed[j],
                pulse: p,
                top_touch,
                bottom_touch,
                first_up,
                first_down,
                greedy,
            });
        }
        events
    }

    /// Append a value and return the event for it, once enough history exists
    pub fn push(&mut self, value: f64) -> Option<PulseEvent> {
        if !value.is_finite() {
            return None;
        }
        self.history.push_back(value);
        while self.history.len() > self.capacity() {
            self.history.pop_front();
        }

        let values: Vec<f64> = self.history.iter().copied().collect();
        if let Some(bbb) = self.latest_bbb(&values) {
            self.smoothing = self.smoothing.step(bbb, self.settings.smoothing_len);
        }
        self.latest_event(&values, self.smoothing)
    }

    /// Latest event for the current history without appending
    pub fn peek(&self, value: f64) -> Option<PulseEvent> {
        if !value.is_finite() {
            return None;
        }
        let mut values: Vec<f64> = self.history.iter().copied().collect();
        values.push(value);
        let smoothing = match self.latest_bbb(&values) {
            Some(bbb) => self.smoothing.step(bbb, self.settings.smoothing_len),
            None => self.smoothing,
        };
        self.latest_event(&values, smoothing)
    }

    /// Retained inputs: enough for every window plus the previous event
    fn capacity(&self) -> usize {
        let s = &self.settings;
        s.history.max(s.pulse_start() + 2).max(s.bbb_len.max(1) + 1)
    }

    fn latest_bbb(&self, values: &[f64]) -> Option<f64> {
        let len = self.settings.bbb_len.max(1);
        let window = values.get(values.len().checked_sub(len)?..)?;
        bbb_series(window, len, self.settings.mult).last().copied()
    }

    fn latest_event(&self, values: &[f64], smoothing: ZeroLagState) -> Option<PulseEvent> {
        let last = values.len().checked_sub(1)?;
        let mut event = self.compute(values).into_iter().last().filter(|e| e.index == last)?;
        event.bbb_smoothed = smoothing.value()?;
        Some(event)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothing = ZeroLagState::default();
    }
}

impl Default for PulseIndicator {
    fn default() -> Self {
        Self::new(PulseSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> PulseSettings {
        PulseSettings {
            bbw_len: 3,
            bbb_len: 2,
            pulse_len: 2,
            smoothing_len: 3,
            ..PulseSettings::default()
        }
    }

    #[test]
    fn test_offset_arithmetic() {
        let s = small_settings();
        assert_eq!(s.pulse_offset(), 2);
        assert_eq!(s.pulse_start(), 3);

        let d = PulseSettings::default();
        assert_eq!(d.pulse_offset(), 19 + 49 - 19);
    }

    #[test]
    fn test_events_align_with_bbb() {
        let s = small_settings();
        let values: Vec<f64> = (0..12).map(|i| 100.0 + (i as f64 * 0.9).sin() * 3.0).collect();
        let events = PulseIndicator::new(s).compute(&values);
        let bbb = bbb_series(&values, s.bbb_len, s.mult);
        let bbw = bbw_series(&values, s.bbw_len, s.mult);

        assert_eq!(events.len(), 12 - 3);
        for e in &events {
            assert_eq!(e.value, values[e.index]);
            assert_eq!(e.bbb, bbb[e.index - (s.bbb_len - 1)]);
            assert_eq!(e.bbw, bbw[e.index - (s.bbw_len - 1)]);
        }
    }

    #[test]
    fn test_bbw_inverted_and_bbb_guard() {
        let bbw = bbw_series(&[99.0, 101.0, 99.0, 101.0], 2, 2.0);
        assert!(bbw.iter().all(|v| *v < 0.0));

        let bbb = bbb_series(&[5.0, 5.0, 5.0], 2, 2.0);
        assert!(bbb.iter().all(|v| *v == 0.5));
    }

    #[test]
    fn test_squeeze_touches_top_then_first_down() {
        let mut values = Vec::new();
        for i in 0..30 {
            values.push(if i % 2 == 0 { 90.0 } else { 110.0 });
        }
        values.extend(std::iter::repeat(100.0).take(10));
        for i in 0..5 {
            values.push(if i % 2 == 0 { 90.0 } else { 110.0 });
        }

        let settings = PulseSettings {
            bbw_len: 5,
            bbb_len: 5,
            pulse_len: 20,
            ..PulseSettings::default()
        };
        let events = PulseIndicator::new(settings).compute(&values);

        assert!(events.iter().any(|e| e.top_touch));
        assert!(events.iter().any(|e| e.greedy && e.top_touch));
        let down = events.iter().find(|e| e.first_down).expect("first_down after squeeze");
        assert!(down.index >= 40);
        assert!(events.iter().all(|e| e.pulse >= -1e-9 && e.pulse <= 100.0 + 1e-9));
    }

    #[test]
    fn test_zero_lag_tracks_trend_faster() {
        let values: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let ema = ema_series(&values, 9);
        let zl = zero_lag_series(&values, 9);
        let last = 49.0;
        assert!((last - zl[49]).abs() < (last - ema[49]).abs());

        let flat = zero_lag_series(&[3.0; 10], 4);
        assert!(flat.iter().all(|v| (*v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_push_matches_batch() {
        let s = small_settings();
        let values: Vec<f64> = (0..15).map(|i| 50.0 + (i as f64).cos() * 2.0).collect();
        let batch = PulseIndicator::new(s).compute(&values);

        let mut incremental = PulseIndicator::new(s);
        let mut last = None;
        for &v in &values {
            last = incremental.push(v);
        }
        let last = last.unwrap();
        assert_eq!(last.pulse, batch.last().unwrap().pulse);
        assert_eq!(last.first_up, batch.last().unwrap().first_up);
    }

    #[test]
    fn test_push_smoothing_survives_trimmed_history() {
        let s = PulseSettings {
            history: 6,
            ..small_settings()
        };
        let values: Vec<f64> = (0..40).map(|i| 50.0 + (i as f64 * 0.7).sin() * 4.0 + i as f64 * 0.1).collect();
        let batch = PulseIndicator::new(s).compute(&values);

        let mut incremental = PulseIndicator::new(s);
        let mut last = None;
        for &v in &values {
            last = incremental.push(v);
        }
        assert_eq!(incremental.len(), 6);

        let last = last.unwrap();
        let expected = batch.last().unwrap();
        assert_eq!(last.index, 5);
        assert_eq!(last.bbb, expected.bbb);
        assert_eq!(last.bbb_smoothed, expected.bbb_smoothed);
        assert_eq!(last.pulse, expected.pulse);

        // peek steps the same state without committing it
        let peeked = incremental.peek(52.0).unwrap();
        let mut extended = values.clone();
        extended.push(52.0);
        let expected = *PulseIndicator::new(s).compute(&extended).last().unwrap();
        assert_eq!(peeked.bbb_smoothed, expected.bbb_smoothed);
        assert_eq!(incremental.len(), 6);
    }

    #[test]
    fn test_reset_clears_smoothing() {
        let s = small_settings();
        let mut ind = PulseIndicator::new(s);
        for i in 0..10 {
            ind.push(100.0 + i as f64);
        }
        ind.reset();
        assert!(ind.is_empty());

        let values = [10.0, 12.0, 11.0, 13.0, 12.5, 14.0];
        let mut last = None;
        for &v in &values {
            last = ind.push(v);
        }
        let expected = *PulseIndicator::new(s).compute(&values).last().unwrap();
        assert_eq!(last.unwrap().bbb_smoothed, expected.bbb_smoothed);
    }

    #[test]
    fn test_not_enough_history() {
        let mut ind = PulseIndicator::default();
        for i in 0..10 {
            assert!(ind.push(100.0 + i as f64).is_none());
        }
        assert!(ind.push(f64::NAN).is_none());
        assert_eq!(ind.len(), 10);
    }
}
