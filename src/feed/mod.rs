//! Feed module - Snapshot ingestion
//!
//! Decodes newline-delimited JSON snapshot records and rolls them up into
//! the selected timeframe.

mod aggregator;

pub use aggregator::{AggregatorStats, SnapshotAggregator};

use thiserror::Error;

use crate::types::Snapshot;

/// Errors raised while decoding a single feed record
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed snapshot record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid candle at time {time}")]
    InvalidCandle { time: i64 },

    #[error("Snapshot time {time} is not after last accepted time {last}")]
    NonMonotonic { time: i64, last: i64 },
}

/// Decode one NDJSON line into a normalized snapshot.
///
/// Returns `Ok(None)` for blank lines.
pub fn decode_line(line: &str) -> Result<Option<Snapshot>, FeedError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut snapshot: Snapshot = serde_json::from_str(trimmed)?;
    if !snapshot.candle.is_valid() {
        return Err(FeedError::InvalidCandle {
            time: snapshot.time,
        });
    }
    if let Some(book) = snapshot.book.as_mut() {
        book.normalize_levels();
    }
    Ok(Some(snapshot))
}
