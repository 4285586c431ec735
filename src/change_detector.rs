// src/change_detector.rs
//! Baseline comparison. Every tracked value is compared against the last
//! persisted value for its (key, direction) and then becomes the new baseline.

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `1 base -> x key`, or the plain value for single-direction datasets.
    Forward,
    /// `1 key -> x base`, i.e. `1 / value`.
    Inverse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedDelta {
    pub key: String,
    pub direction: Direction,
    pub previous: f64,
    pub current: f64,
    pub percent_change: f64,
}

impl FlaggedDelta {
    pub fn is_rise(&self) -> bool {
        self.percent_change > 0.0
    }
}

/// `(current - previous) / previous * 100`; `None` when `previous` is zero or
/// either side is not finite.
pub fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

fn parse_baseline(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v != 0.0)
}

pub struct DeltaTracker<'a> {
    store: &'a dyn KvStore,
    threshold_pct: f64,
    prefix: String,
}

impl<'a> DeltaTracker<'a> {
    /// `threshold_pct` is symmetric: 1.0 flags any move of 1% or more either way.
    pub fn new(store: &'a dyn KvStore, threshold_pct: f64, prefix: impl Into<String>) -> Self {
        Self {
            store,
            threshold_pct: threshold_pct.abs(),
            prefix: prefix.into(),
        }
    }

    pub fn baseline_key(&self, key: &str, direction: Direction) -> String {
        match direction {
            Direction::Forward => format!("{}{key}", self.prefix),
            Direction::Inverse => format!("{}inverse_{key}", self.prefix),
        }
    }

    /// Compare `current` with the stored baseline, then store `current`.
    ///
    /// No baseline (or an unreadable one) means first observation: nothing is
    /// flagged. Store failures are logged and otherwise ignored.
    pub async fn track(&self, key: &str, direction: Direction, current: f64) -> Option<FlaggedDelta> {
        let store_key = self.baseline_key(key, direction);

        let previous = match self.store.get(&store_key).await {
            Ok(raw) => raw.as_deref().and_then(parse_baseline),
            Err(e) => {
                counter!("watch_store_errors_total", "op" => "read").increment(1);
                tracing::warn!(key = %store_key, error = %e, "baseline read failed");
                None
            }
        };

        if let Err(e) = self.store.set(&store_key, &current.to_string()).await {
            counter!("watch_store_errors_total", "op" => "write").increment(1);
            tracing::warn!(key = %store_key, error = %e, "baseline write failed");
        }

        let Some(previous) = previous else {
            tracing::debug!(key = %store_key, current, "first observation, baseline established");
            return None;
        };
        let pct = percent_change(previous, current)?;
        if pct.abs() < self.threshold_pct {
            tracing::trace!(key = %store_key, pct, "within threshold");
            return None;
        }

        counter!("watch_flags_total").increment(1);
        tracing::info!(key = %store_key, previous, current, pct, "threshold crossed");
        Some(FlaggedDelta {
            key: key.to_string(),
            direction,
            previous,
            current,
            percent_change: pct,
        })
    }

    /// Track the forward value and, when `with_inverse`, its reciprocal.
    pub async fn track_value(&self, key: &str, value: f64, with_inverse: bool) -> Vec<FlaggedDelta> {
        let mut out = Vec::new();
        if let Some(d) = self.track(key, Direction::Forward, value).await {
            out.push(d);
        }
        if with_inverse && value != 0.0 {
            if let Some(d) = self.track(key, Direction::Inverse, 1.0 / value).await {
                out.push(d);
            }
        }
        out
    }
}
