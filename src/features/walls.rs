//! Wall detection
//!
//! A wall is a single level whose size is an outlier relative to the levels
//! near it on the same side.

use serde::{Deserialize, Serialize};

use super::levels::Level;

/// Levels considered per side when computing the local average
pub const WALL_SAMPLE_LEVELS: usize = 20;
/// Search band around price, in percent
pub const WALL_BAND_PCT: f64 = 0.5;
/// Minimum size / average ratio for a wall
pub const WALL_MIN_RATIO: f64 = 1.8;

/// Detected wall on one side of the book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub price: f64,
    pub size: f64,
    /// Size relative to the local average
    pub ratio: f64,
    /// Distance from price in percent
    pub distance_pct: f64,
}

/// Find the wall among `levels` (best first) around `price`
pub fn detect_wall(levels: &[Level], price: f64) -> Option<Wall> {
    if price <= 0.0 {
        return None;
    }

    let sample: Vec<&Level> = levels
        .iter()
        .filter(|l| l.distance_pct(price) <= WALL_BAND_PCT)
        .take(WALL_SAMPLE_LEVELS)
        .collect();
    if sample.is_empty() {
        return None;
    }

    let avg = sample.iter().map(|l| l.volume).sum::<f64>() / sample.len() as f64;
    if avg <= 0.0 {
        return None;
    }

    sample
        .iter()
        .map(|l| Wall {
            price: l.price,
            size: l.volume,
            ratio: l.volume / avg,
            distance_pct: l.distance_pct(price),
        })
        .filter(|w| w.ratio >= WALL_MIN_RATIO)
        .max_by(|a, b| a.ratio.partial_cmp(&b.ratio).unwrap_or(std::cmp::Ordering::Equal))
}

/// Proximity score (0-100) of a wall to price; 0 without a wall
pub fn wall_proximity(wall: Option<&Wall>) -> f64 {
    let wall = match wall {
        Some(w) => w,
        None => return 0.0,
    };
    let dist = wall.distance_pct;

    let score = if dist < 0.3 {
        let base = 100.0 - (dist / 0.3 * 50.0);
        let bonus = ((wall.ratio - WALL_MIN_RATIO) * 15.0).min(30.0);
        (base + bonus).min(100.0)
    } else if dist < 0.5 {
        50.0 - (dist - 0.3) / 0.2 * 30.0
    } else {
        0.0
    };
    score.clamp(0.0, 100.0)
}
