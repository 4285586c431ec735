// src/ingest/providers/mod.rs
pub mod batch;
pub mod scrape;

use crate::error::SourceError;
use crate::ingest::transport::HttpResponse;

pub use batch::{BatchApiSource, Extract, PayloadFormat};
pub use scrape::ScrapeSource;

/// One upstream in a dataset's fallback chain.
#[derive(Debug, Clone)]
pub enum Source {
    /// One request per key, value pulled out of page text.
    Scrape(ScrapeSource),
    /// One request for all remaining keys, structured payload.
    Batch(BatchApiSource),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::Scrape(s) => &s.name,
            Source::Batch(b) => &b.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Source::Scrape(_) => "scrape",
            Source::Batch(_) => "batch",
        }
    }
}

/// Substitute `{name}` placeholders in a URL template.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Some upstreams send usable bodies with odd status codes. A body that
/// parsed is kept regardless of status; a failed parse on a non-2xx
/// response is reported as the status failure.
pub(crate) fn gate_status<T>(
    source: &str,
    resp: &HttpResponse,
    parsed: Result<T, SourceError>,
) -> Result<T, SourceError> {
    match parsed {
        Ok(v) => {
            if !resp.is_success() {
                tracing::debug!(source, status = resp.status, "accepted body despite non-2xx status");
            }
            Ok(v)
        }
        Err(e) if resp.is_success() => Err(e),
        Err(_) => Err(SourceError::Status {
            status: resp.status,
        }),
    }
}
