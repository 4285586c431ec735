//! # Run Engine
//! One invocation: for each dataset resolve → track → format → dispatch.
//!
//! Nothing here keeps state between runs except what goes through the
//! [`KvStore`]. A dataset that fails (no key resolved, or a panic inside a
//! stage) becomes an error notification; it never aborts the other datasets.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::change_detector::{DeltaTracker, FlaggedDelta};
use crate::config::Dataset;
use crate::error::DatasetExhausted;
use crate::ingest::{resolve, transport::Transport, Resolution};
use crate::notify::NotifierMux;
use crate::report::{self, Clock, Message, Report};
use crate::store::KvStore;

/// Collaborators and clock for one run.
pub struct RunContext<'a> {
    pub transport: &'a dyn Transport,
    pub store: &'a dyn KvStore,
    pub clock: Clock,
    /// Soft budget for the whole run; each dataset gets what is left.
    pub budget: Duration,
}

#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub resolution: Resolution,
    pub flags: Vec<FlaggedDelta>,
    pub report: Report,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub datasets: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub flags: usize,
    pub failed: Vec<String>,
}

/// Resolve, track and format one dataset. Sends nothing.
pub async fn run_dataset(ctx: &RunContext<'_>, ds: &Dataset) -> Result<DatasetOutcome, DatasetExhausted> {
    let keys = ds.key_names();
    let resolution = resolve(ctx.transport, &keys, ds.base.as_deref(), &ds.sources, ctx.budget).await;

    if resolution.source_resolved_count() == 0 {
        return Err(DatasetExhausted {
            dataset: ds.name.clone(),
            tried: resolution.attempts.len(),
        });
    }

    let tracker = DeltaTracker::new(ctx.store, ds.threshold_pct, ds.baseline_prefix.as_str());
    let mut flags = Vec::new();
    for key in &keys {
        // the base key is 1 by definition
        if ds.base.as_deref() == Some(key.as_str()) {
            continue;
        }
        if let Some(rv) = resolution.get(key) {
            flags.extend(tracker.track_value(key, rv.value, ds.track_inverse).await);
        }
    }

    let report = report::format_report(ds, &resolution, &flags, &ctx.clock);
    tracing::info!(
        dataset = %ds.name,
        resolved = resolution.source_resolved_count(),
        unresolved = resolution.unresolved.len(),
        flags = flags.len(),
        "dataset processed"
    );

    Ok(DatasetOutcome {
        dataset: ds.name.clone(),
        resolution,
        flags,
        report,
    })
}

/// Run every dataset and deliver the results.
///
/// Alerts go out first, then the main report. With `combined_title`, main
/// reports are merged into one message sent after all datasets ran.
/// `ctx.budget` covers the whole run, not each dataset.
pub async fn run(
    ctx: &RunContext<'_>,
    datasets: &[Dataset],
    notifier: &NotifierMux,
    combined_title: Option<&str>,
) -> RunSummary {
    let mut summary = RunSummary {
        datasets: datasets.len(),
        ..Default::default()
    };
    let mut mains: Vec<Message> = Vec::new();
    let deadline = Instant::now() + ctx.budget;

    for ds in datasets {
        let ds_ctx = RunContext {
            budget: deadline.saturating_duration_since(Instant::now()),
            ..*ctx
        };
        let outcome = AssertUnwindSafe(run_dataset(&ds_ctx, ds)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(out)) => {
                summary.resolved += out.resolution.source_resolved_count();
                summary.unresolved += out.resolution.unresolved.len();
                summary.flags += out.flags.len();

                if let Some(alert) = &out.report.alert {
                    notifier.notify(&alert.title, &alert.body).await;
                }
                match combined_title {
                    Some(_) => mains.push(out.report.main),
                    None => notifier.notify(&out.report.main.title, &out.report.main.body).await,
                }
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(msg) = failure {
            tracing::error!(dataset = %ds.name, error = %msg, "dataset failed");
            summary.failed.push(ds.name.clone());
            let m = report::error_report(&ds.title, &msg);
            notifier.notify(&m.title, &m.body).await;
        }
    }

    if let Some(title) = combined_title {
        if !mains.is_empty() {
            let m = report::combine(title, &ctx.clock, &mains);
            notifier.notify(&m.title, &m.body).await;
        }
    }

    tracing::info!(
        datasets = summary.datasets,
        resolved = summary.resolved,
        unresolved = summary.unresolved,
        flags = summary.flags,
        failed = summary.failed.len(),
        "run finished"
    );
    summary
}

fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        format!("internal error: {s}")
    } else if let Some(s) = p.downcast_ref::<String>() {
        format!("internal error: {s}")
    } else {
        "internal error".to_string()
    }
}
