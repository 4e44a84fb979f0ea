//! Alert log - capped FIFO of firings per instrument

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;

/// Default number of entries kept per instrument
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

/// Chart annotation handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartMarker {
    /// Bar time, seconds
    pub time: i64,
    pub price: f64,
    pub label: String,
    pub position: MarkerPosition,
}

/// Immutable record of one firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLogEntry {
    /// Milliseconds
    pub ts: i64,
    pub alert_id: String,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub marker: Option<ChartMarker>,
}

/// Flat row for CSV export
#[derive(Debug, Serialize)]
struct LogRow<'a> {
    ts: i64,
    alert_id: &'a str,
    message: &'a str,
    context: String,
    marker_time: Option<i64>,
    marker_price: Option<f64>,
    marker_label: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct AlertLog {
    capacity: usize,
    entries: VecDeque<AlertLogEntry>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Restore from persisted entries, keeping the newest `capacity`
    pub fn from_entries(capacity: usize, entries: Vec<AlertLogEntry>) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn push(&mut self, entry: AlertLogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &AlertLogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<AlertLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&AlertLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write the log as CSV, oldest first
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            let context = entry
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(";");
            wtr.serialize(LogRow {
                ts: entry.ts,
                alert_id: &entry.alert_id,
                message: &entry.message,
                context,
                marker_time: entry.marker.as_ref().map(|m| m.time),
                marker_price: entry.marker.as_ref().map(|m| m.price),
                marker_label: entry.marker.as_ref().map(|m| m.label.as_str()),
            })
            .context("Failed to write alert log row")?;
        }
        wtr.flush().context("Failed to flush alert log CSV")?;
        Ok(())
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
