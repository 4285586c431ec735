// src/ingest/types.rs
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single value read from one upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    /// `None` when the upstream does not say when the value was quoted.
    pub observed_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(value: f64, observed_at: Option<DateTime<Utc>>) -> Self {
        Self { value, observed_at }
    }
}

/// What one source yielded for the keys it was asked about.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub values: HashMap<String, Observation>,
    /// Keys the payload mentioned but with an unusable value (non-numeric, non-finite, <= 0).
    pub invalid: HashSet<String>,
}

impl PartialResult {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Final value for one key in one run. At most one per key; the first source
/// in configured order that supplies the key wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub key: String,
    pub value: f64,
    pub observed_at: Option<DateTime<Utc>>,
    /// Position of the winning source in the dataset's source list.
    /// Keys seeded without a request (the base key) carry `None`.
    pub source_index: Option<usize>,
}

/// Bookkeeping for one source visited during resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttempt {
    pub source: String,
    pub index: usize,
    pub requested: Vec<String>,
    pub resolved: Vec<String>,
    pub errors: Vec<String>,
}
