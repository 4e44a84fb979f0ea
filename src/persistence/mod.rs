//! Persistence Module
//!
//! Key-value configuration store plus the alert/alert-log storage built on it.
//!
//! Stored collections are read defensively: malformed data is logged and
//! treated as empty, never propagated as a failure to the stream.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::alerts::{Alert, AlertLog, AlertLogEntry, AlertManager};

/// Injected key-value store for persisted state
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("config store lock poisoned")
}

/// In-memory store (tests, ephemeral runs)
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file, rewritten on every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open (or create on first write) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create store directory")?;
            }
        }

        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<BTreeMap<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), "Malformed store file, starting empty: {}", e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), keys = values.len(), "📂 Config store opened");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(values).context("Failed to serialize store")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.insert(key.to_string(), value);
        self.write(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        if values.remove(key).is_some() {
            self.write(&values)?;
        }
        Ok(())
    }
}

/// Alert definitions and firing logs, keyed per instrument
#[derive(Clone)]
pub struct AlertStore {
    store: Arc<dyn ConfigStore>,
}

impl AlertStore {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    fn alerts_key(instrument: &str) -> String {
        format!("alerts.{}", instrument)
    }

    fn log_key(instrument: &str) -> String {
        format!("alert_log.{}", instrument)
    }

    /// Stored alerts; malformed or missing data yields an empty list
    pub fn load_alerts(&self, instrument: &str) -> Vec<Alert> {
        self.load_list(&Self::alerts_key(instrument))
    }

    pub fn save_alerts(&self, instrument: &str, alerts: &[Alert]) -> Result<()> {
        let value = serde_json::to_value(alerts).context("Failed to serialize alerts")?;
        self.store.set(&Self::alerts_key(instrument), value)
    }

    /// Stored log entries, oldest first; malformed data yields an empty log
    pub fn load_log(&self, instrument: &str) -> Vec<AlertLogEntry> {
        self.load_list(&Self::log_key(instrument))
    }

    pub fn save_log(&self, instrument: &str, log: &AlertLog) -> Result<()> {
        let value = serde_json::to_value(log.to_vec()).context("Failed to serialize alert log")?;
        self.store.set(&Self::log_key(instrument), value)
    }

    pub fn clear(&self, instrument: &str) -> Result<()> {
        self.store.remove(&Self::alerts_key(instrument))?;
        self.store.remove(&Self::log_key(instrument))
    }

    /// Load alerts and log into a manager; returns the number of alerts kept
    pub fn restore(&self, manager: &mut AlertManager) -> usize {
        let instrument = manager.instrument().to_string();
        let alerts = self.load_alerts(&instrument);
        let stored = alerts.len();
        let kept = manager.replace_alerts(alerts);
        manager.replace_log(self.load_log(&instrument));
        info!(
            instrument = %instrument,
            stored,
            kept,
            log = manager.log().len(),
            "Alerts restored"
        );
        kept
    }

    /// Save a manager's alerts and log
    pub fn persist(&self, manager: &AlertManager) -> Result<()> {
        self.save_alerts(manager.instrument(), manager.alerts())?;
        self.save_log(manager.instrument(), manager.log())?;
        info!(
            instrument = %manager.instrument(),
            alerts = manager.alerts().len(),
            log = manager.log().len(),
            "💾 Alerts saved"
        );
        Ok(())
    }

    fn load_list<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let value = match self.store.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, "Failed to read stored collection: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_value::<Vec<T>>(value) {
            Ok(items) => items,
            Err(e) => {
                warn!(key, "Malformed stored collection, treating as empty: {}", e);
                Vec::new()
            }
        }
    }
}

/// Parse alert definitions from YAML (a list of alerts)
pub fn parse_alerts_yaml(content: &str) -> Result<Vec<Alert>> {
    serde_yaml::from_str(content).context("Failed to parse alert definitions")
}

/// Read alert definitions from a YAML file
pub fn import_alerts_yaml(path: impl AsRef<Path>) -> Result<Vec<Alert>> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let alerts = parse_alerts_yaml(&content)?;
    info!(path = %path.display(), count = alerts.len(), "Imported alert definitions");
    Ok(alerts)
}

/// Write an alert log to a CSV file
pub fn export_log_csv(log: &AlertLog, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    log.write_csv(file)?;
    info!(path = %path.display(), entries = log.len(), "Exported alert log");
    Ok(())
}
