//! Configuration sections and their conversions into engine settings

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::features::{
    AlphaSensitivity, LdMode, LevelSettings, MetricsSettings, PulseSettings, PulseSource,
};
use crate::types::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instrument label used for persisted alert keys
    pub instrument: String,
    /// Target timeframe (1m, 5m, 15m, 30m, 1h, 4h, 1d)
    pub timeframe: String,
    /// Raw 1-minute snapshots retained for timeframe rebuilds
    pub raw_capacity: usize,
    /// Closed bars and views retained
    pub history_capacity: usize,
    /// Minimum spacing of live (in-progress bar) analytics
    pub analytics_interval_ms: u64,
    /// Minimum spacing of depth views
    pub depth_interval_ms: u64,
    /// Maximum spacing of alert re-evaluation
    pub alert_heartbeat_ms: u64,
}

impl EngineConfig {
    pub fn timeframe(&self) -> Result<Timeframe> {
        Timeframe::from_str(&self.timeframe)
            .ok_or_else(|| anyhow!("Unknown timeframe: {}", self.timeframe))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// Bucket width as a fraction of price
    pub cluster_pct: f64,
    pub max_levels: usize,
    pub min_volume: f64,
    /// Clustered view window, percent
    pub price_range_pct: f64,
    /// Full-book fair-value window, percent
    pub fair_value_range_pct: f64,
}

impl From<&LevelsConfig> for LevelSettings {
    fn from(c: &LevelsConfig) -> Self {
        LevelSettings {
            cluster_pct: c.cluster_pct,
            max_levels: c.max_levels,
            min_volume: c.min_volume,
            price_range_pct: c.price_range_pct,
            fair_value_range_pct: c.fair_value_range_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    /// signal | context
    pub ld_mode: String,
    /// LD window in percent for signal mode
    pub ld_range: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaConfig {
    pub mm_sensitivity: f64,
    pub swing_sensitivity: f64,
    pub htf_sensitivity: f64,
}

impl From<&AlphaConfig> for AlphaSensitivity {
    fn from(c: &AlphaConfig) -> Self {
        AlphaSensitivity {
            mm: c.mm_sensitivity,
            swing: c.swing_sensitivity,
            htf: c.htf_sensitivity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// open | vwmp | ifv | mid
    pub source: String,
    pub bbw_len: usize,
    pub bbb_len: usize,
    pub pulse_len: usize,
    pub mult: f64,
    pub top: f64,
    pub bottom: f64,
    pub smoothing_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Log entries kept per instrument
    pub log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

impl super::AppConfig {
    pub fn metrics_settings(&self) -> Result<MetricsSettings> {
        let ld_mode = LdMode::from_str(&self.liquidity.ld_mode)
            .ok_or_else(|| anyhow!("Unknown ld_mode: {}", self.liquidity.ld_mode))?;
        Ok(MetricsSettings {
            levels: LevelSettings::from(&self.levels),
            ld_mode,
            ld_range_pct: self.liquidity.ld_range,
            sensitivity: AlphaSensitivity::from(&self.alpha),
        })
    }

    pub fn pulse_settings(&self) -> Result<PulseSettings> {
        let source = PulseSource::from_str(&self.pulse.source)
            .ok_or_else(|| anyhow!("Unknown pulse source: {}", self.pulse.source))?;
        Ok(PulseSettings {
            source,
            bbw_len: self.pulse.bbw_len,
            bbb_len: self.pulse.bbb_len,
            pulse_len: self.pulse.pulse_len,
            mult: self.pulse.mult,
            top: self.pulse.top,
            bottom: self.pulse.bottom,
            smoothing_len: self.pulse.smoothing_len,
            history: self.engine.history_capacity,
        })
    }
}
