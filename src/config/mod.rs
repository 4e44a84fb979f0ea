//! Configuration management for DepthScope
//!
//! Loads defaults, optional YAML files and environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub levels: LevelsConfig,
    pub liquidity: LiquidityConfig,
    pub alpha: AlphaConfig,
    pub pulse: PulseConfig,
    pub alerts: AlertsConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Load configuration from `config/` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config"))
    }

    /// Load configuration from `<dir>/default`, `<dir>/local` and the environment
    pub fn load_from(dir: &Path) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let default_path = dir.join("default");
        let local_path = dir.join("local");

        let config = Self::builder()?
            .add_source(File::with_name(&default_path.to_string_lossy()).required(false))
            .add_source(File::with_name(&local_path.to_string_lossy()).required(false))
            // Override with environment variables (DEPTHSCOPE__*)
            .add_source(Environment::with_prefix("DEPTHSCOPE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Engine defaults
            .set_default("engine.instrument", "BTCUSDT")?
            .set_default("engine.timeframe", "1m")?
            .set_default("engine.raw_capacity", 1440)?
            .set_default("engine.history_capacity", 500)?
            .set_default("engine.analytics_interval_ms", 2000)?
            .set_default("engine.depth_interval_ms", 1000)?
            .set_default("engine.alert_heartbeat_ms", 10000)?
            // Level processing defaults
            .set_default("levels.cluster_pct", 0.0005)?
            .set_default("levels.max_levels", 50)?
            .set_default("levels.min_volume", 0.0)?
            .set_default("levels.price_range_pct", 5.0)?
            .set_default("levels.fair_value_range_pct", 2.0)?
            // Liquidity delta defaults
            .set_default("liquidity.ld_mode", "context")?
            .set_default("liquidity.ld_range", 1.5)?
            // Alpha sensitivity defaults
            .set_default("alpha.mm_sensitivity", 50.0)?
            .set_default("alpha.swing_sensitivity", 50.0)?
            .set_default("alpha.htf_sensitivity", 50.0)?
            // Pulse defaults
            .set_default("pulse.source", "open")?
            .set_default("pulse.bbw_len", 20)?
            .set_default("pulse.bbb_len", 20)?
            .set_default("pulse.pulse_len", 50)?
            .set_default("pulse.mult", 2.0)?
            .set_default("pulse.top", 100.0)?
            .set_default("pulse.bottom", 0.0)?
            .set_default("pulse.smoothing_len", 9)?
            // Alert defaults
            .set_default("alerts.log_capacity", 200)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?;
        Ok(builder)
    }

    /// Range checks that deserialization cannot express
    pub fn validate(&self) -> Result<()> {
        self.engine.timeframe()?;
        self.metrics_settings()?;
        self.pulse_settings()?;

        if self.engine.instrument.trim().is_empty() {
            bail!("engine.instrument must not be empty");
        }
        if self.engine.raw_capacity == 0 || self.engine.history_capacity == 0 {
            bail!("engine capacities must be positive");
        }
        if !(self.levels.cluster_pct >= 0.0 && self.levels.cluster_pct < 1.0) {
            bail!("levels.cluster_pct must be in [0, 1)");
        }
        if self.levels.price_range_pct <= 0.0 || self.levels.fair_value_range_pct <= 0.0 {
            bail!("levels ranges must be positive");
        }
        if self.levels.max_levels == 0 {
            bail!("levels.max_levels must be positive");
        }
        if !(self.levels.min_volume >= 0.0) {
            bail!("levels.min_volume must be non-negative, got {}", self.levels.min_volume);
        }
        for (name, value) in [
            ("alpha.mm_sensitivity", self.alpha.mm_sensitivity),
            ("alpha.swing_sensitivity", self.alpha.swing_sensitivity),
            ("alpha.htf_sensitivity", self.alpha.htf_sensitivity),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be within 0-100, got {}", name, value);
            }
        }
        if self.pulse.bbw_len < 2 || self.pulse.bbb_len < 2 || self.pulse.pulse_len < 1 {
            bail!("pulse window lengths too short");
        }
        if self.pulse.top <= self.pulse.bottom {
            bail!("pulse.top must exceed pulse.bottom");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "instrument={} tf={} cluster={} range={}% ld_mode={} pulse={} raw_cap={}",
            self.engine.instrument,
            self.engine.timeframe,
            self.levels.cluster_pct,
            self.levels.price_range_pct,
            self.liquidity.ld_mode,
            self.pulse.source,
            self.engine.raw_capacity
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{LdMode, PulseSource};
    use crate::types::Timeframe;

    #[test]
    fn test_defaults() {
        let config = AppConfig::defaults().unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.timeframe().unwrap(), Timeframe::Min1);
        assert_eq!(config.engine.raw_capacity, 1440);
        assert_eq!(config.alerts.log_capacity, 200);

        let metrics = config.metrics_settings().unwrap();
        assert_eq!(metrics.ld_mode, LdMode::Context);
        assert_eq!(metrics.levels.max_levels, 50);
        assert_eq!(config.pulse_settings().unwrap().source, PulseSource::Open);
        assert!(config.digest().contains("tf=1m"));
    }

    #[test]
    fn test_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "engine:\n  timeframe: 15m\nliquidity:\n  ld_mode: signal\npulse:\n  source: vwmp\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.engine.timeframe().unwrap(), Timeframe::Min15);
        assert_eq!(config.metrics_settings().unwrap().ld_mode, LdMode::Signal);
        assert_eq!(config.pulse_settings().unwrap().source, PulseSource::Vwmp);
        // untouched keys keep defaults
        assert_eq!(config.levels.price_range_pct, 5.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::defaults().unwrap();
        config.engine.timeframe = "7m".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::defaults().unwrap();
        config.alpha.mm_sensitivity = 120.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::defaults().unwrap();
        config.pulse.top = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::defaults().unwrap();
        config.levels.max_levels = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::defaults().unwrap();
        config.levels.min_volume = -1.0;
        assert!(config.validate().is_err());
    }
}
