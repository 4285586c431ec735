// src/ingest/mod.rs
pub mod parse;
pub mod providers;
pub mod transport;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::ingest::providers::{BatchApiSource, ScrapeSource, Source};
use crate::ingest::transport::{HttpRequest, HttpResponse, Transport};
use crate::ingest::types::{Observation, PartialResult, ResolvedValue, SourceAttempt};

/// Soft per-run budget after which remaining sources are skipped.
pub const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(60);

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "watch_source_requests_total",
            "Requests issued to upstream sources."
        );
        describe_counter!(
            "watch_source_errors_total",
            "Source failures (transport/status/parse/payload)."
        );
        describe_counter!("watch_keys_resolved_total", "Keys resolved by a source.");
        describe_counter!(
            "watch_keys_unresolved_total",
            "Keys left unresolved after all sources."
        );
        describe_counter!("watch_flags_total", "Flagged deltas emitted.");
        describe_counter!("watch_store_errors_total", "Baseline read/write failures.");
        describe_histogram!("watch_source_ms", "Wall time per source in milliseconds.");
    });
}

/// Outcome of walking a dataset's fallback chain.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub values: HashMap<String, ResolvedValue>,
    /// Still missing after every source, in configured order.
    pub unresolved: Vec<String>,
    /// Unresolved keys that some source mentioned with an unusable value.
    pub invalid: HashSet<String>,
    pub attempts: Vec<SourceAttempt>,
    /// Sources never visited because the run budget ran out.
    pub skipped_sources: Vec<String>,
}

impl Resolution {
    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.values.get(key)
    }

    pub fn resolved_count(&self) -> usize {
        self.values.len()
    }

    /// Values some upstream actually supplied; the seeded base key is not one.
    pub fn source_resolved_count(&self) -> usize {
        self.values
            .values()
            .filter(|v| v.source_index.is_some())
            .count()
    }

    /// Most recent upstream timestamp among resolved values.
    pub fn latest_observed_at(&self) -> Option<DateTime<Utc>> {
        self.values.values().filter_map(|v| v.observed_at).max()
    }

    /// Keys that were sent to the source at `index`.
    pub fn requested_from(&self, index: usize) -> &[String] {
        self.attempts
            .iter()
            .find(|a| a.index == index)
            .map(|a| a.requested.as_slice())
            .unwrap_or(&[])
    }
}

/// Walk `sources` in order, asking each only for keys no earlier source
/// supplied. Source failures are logged and never abort the walk.
///
/// A key equal to `base` resolves to `1.0` without any request.
pub async fn resolve(
    transport: &dyn Transport,
    keys: &[String],
    base: Option<&str>,
    sources: &[Source],
    budget: Duration,
) -> Resolution {
    ensure_metrics_described();

    let started = Instant::now();
    let mut res = Resolution::default();
    let mut pending: Vec<String> = Vec::with_capacity(keys.len());

    for key in keys {
        if base == Some(key.as_str()) {
            res.values.insert(
                key.clone(),
                ResolvedValue {
                    key: key.clone(),
                    value: 1.0,
                    observed_at: None,
                    source_index: None,
                },
            );
        } else if !pending.contains(key) {
            pending.push(key.clone());
        }
    }

    for (index, source) in sources.iter().enumerate() {
        if pending.is_empty() {
            break;
        }
        let elapsed = started.elapsed();
        if elapsed >= budget {
            tracing::warn!(
                source = source.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "run budget exhausted, skipping source"
            );
            res.skipped_sources.push(source.name().to_string());
            continue;
        }
        let remaining_budget = budget - elapsed;

        let t0 = Instant::now();
        let (partial, errors) = match source {
            Source::Scrape(s) => resolve_scrape(transport, s, &pending, remaining_budget).await,
            Source::Batch(b) => resolve_batch(transport, b, &pending, remaining_budget).await,
        };
        histogram!("watch_source_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        for err in &errors {
            counter!("watch_source_errors_total", "kind" => err.kind()).increment(1);
        }

        let mut resolved_here = Vec::new();
        for key in &pending {
            if let Some(obs) = partial.values.get(key) {
                res.values.insert(
                    key.clone(),
                    ResolvedValue {
                        key: key.clone(),
                        value: obs.value,
                        observed_at: obs.observed_at,
                        source_index: Some(index),
                    },
                );
                res.invalid.remove(key);
                resolved_here.push(key.clone());
            } else if partial.invalid.contains(key) {
                res.invalid.insert(key.clone());
            }
        }
        counter!("watch_keys_resolved_total").increment(resolved_here.len() as u64);

        tracing::info!(
            source = source.name(),
            kind = source.kind(),
            requested = pending.len(),
            resolved = resolved_here.len(),
            errors = errors.len(),
            "source visited"
        );

        res.attempts.push(SourceAttempt {
            source: source.name().to_string(),
            index,
            requested: pending.clone(),
            resolved: resolved_here,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        });

        pending.retain(|k| !res.values.contains_key(k));
    }

    counter!("watch_keys_unresolved_total").increment(pending.len() as u64);
    if !pending.is_empty() {
        tracing::warn!(missing = %pending.join(","), "keys unresolved after all sources");
    }
    res.unresolved = pending;
    res
}

/// Send with the request's own timeout, independent of the transport.
async fn send_bounded(
    transport: &dyn Transport,
    req: &HttpRequest,
    cap: Duration,
) -> Result<HttpResponse, SourceError> {
    counter!("watch_source_requests_total").increment(1);
    let limit = req.timeout.min(cap);
    match tokio::time::timeout(limit, transport.send(req)).await {
        Ok(r) => r,
        Err(_) => Err(SourceError::Transport(format!(
            "timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

async fn resolve_scrape(
    transport: &dyn Transport,
    source: &ScrapeSource,
    keys: &[String],
    budget: Duration,
) -> (PartialResult, Vec<SourceError>) {
    let requests = keys.iter().map(|key| async move {
        let req = source.locate(key);
        let outcome = match send_bounded(transport, &req, budget).await {
            Ok(resp) => source.parse(&resp),
            Err(e) => Err(e),
        };
        (key, outcome)
    });

    let mut partial = PartialResult::default();
    let mut errors = Vec::new();
    for (key, outcome) in join_all(requests).await {
        match outcome {
            Ok(obs) => {
                partial.values.insert(key.clone(), obs);
            }
            Err(e) => {
                tracing::warn!(source = %source.name, key = %key, error = %e, "scrape failed");
                errors.push(e);
            }
        }
    }
    (partial, errors)
}

async fn resolve_batch(
    transport: &dyn Transport,
    source: &BatchApiSource,
    keys: &[String],
    budget: Duration,
) -> (PartialResult, Vec<SourceError>) {
    let req = source.locate(keys, Utc::now().timestamp_millis());
    let outcome = match send_bounded(transport, &req, budget).await {
        Ok(resp) => source.parse(&resp, keys),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(partial) => (partial, Vec::new()),
        Err(e) => {
            tracing::warn!(source = %source.name, error = %e, "batch source failed");
            (PartialResult::default(), vec![e])
        }
    }
}

/// Convenience for callers holding observations from elsewhere (tests, replays).
pub fn resolution_from(values: impl IntoIterator<Item = (String, Observation)>) -> Resolution {
    let mut res = Resolution::default();
    for (key, obs) in values {
        res.values.insert(
            key.clone(),
            ResolvedValue {
                key,
                value: obs.value,
                observed_at: obs.observed_at,
                source_index: Some(0),
            },
        );
    }
    res
}
