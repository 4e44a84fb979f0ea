//! DepthScope Library
//!
//! Order-book signal engine for a single instrument: snapshot aggregation,
//! level clustering, liquidity/fair-value metrics, entry certainty, pulse
//! and directional analysis, and rule-based alerts.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod features;
pub mod feed;
pub mod persistence;
pub mod strategy;
pub mod types;
