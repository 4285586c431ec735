// src/ingest/providers/batch.rs
use std::time::Duration;

use serde_json::Value;

use super::{gate_status, render_template};
use crate::error::SourceError;
use crate::ingest::parse::{
    check_payload_flags, lookup_path, number_from, parse_json, parse_observed_at,
    parse_wrapped_json,
};
use crate::ingest::transport::{HttpRequest, HttpResponse};
use crate::ingest::types::{Observation, PartialResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    /// Script literal / JSONP; see [`parse_wrapped_json`].
    Wrapped { prefix: String },
}

/// Where the per-key numbers live in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// `{"rates": {"USD": 0.14, ...}}` with `path = "rates"`.
    MapAt { path: String },
    /// `{"JO_1": {"q63": 912.0, "time": 1760...}}`: each key holds an object.
    PerKey {
        path: String,
        value_field: String,
        time_field: Option<String>,
    },
}

/// One request for the whole remaining key set.
#[derive(Debug, Clone)]
pub struct BatchApiSource {
    pub name: String,
    /// May use `{keys}`, `{base}` and `{nonce}` (epoch millis, cache buster).
    pub url_template: String,
    pub key_separator: String,
    pub format: PayloadFormat,
    pub extract: Extract,
    /// Payload-wide timestamp fields, first parseable wins.
    pub time_fields: Vec<String>,
    /// Check `flag` / `errorCode` after parsing.
    pub check_flags: bool,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub base: Option<String>,
}

impl BatchApiSource {
    pub fn locate(&self, keys: &[String], nonce: i64) -> HttpRequest {
        let joined = keys.join(&self.key_separator);
        let nonce = nonce.to_string();
        let url = render_template(
            &self.url_template,
            &[
                ("keys", joined.as_str()),
                ("base", self.base.as_deref().unwrap_or_default()),
                ("nonce", nonce.as_str()),
            ],
        );
        HttpRequest::get(url, self.timeout).with_headers(&self.headers)
    }

    /// Values for as many of `keys` as the payload holds. Keys absent from
    /// the payload are simply not in the result.
    pub fn parse(&self, resp: &HttpResponse, keys: &[String]) -> Result<PartialResult, SourceError> {
        let doc = gate_status(&self.name, resp, self.decode(&resp.body))?;
        if self.check_flags {
            check_payload_flags(&doc)?;
        }
        Ok(self.extract_values(&doc, keys))
    }

    fn decode(&self, body: &str) -> Result<Value, SourceError> {
        match &self.format {
            PayloadFormat::Json => parse_json(body),
            PayloadFormat::Wrapped { prefix } => parse_wrapped_json(body, prefix),
        }
    }

    fn extract_values(&self, doc: &Value, keys: &[String]) -> PartialResult {
        let batch_ts = self
            .time_fields
            .iter()
            .find_map(|f| lookup_path(doc, f).and_then(parse_observed_at));

        let mut out = PartialResult::default();
        let (path, per_key) = match &self.extract {
            Extract::MapAt { path } => (path, None),
            Extract::PerKey {
                path,
                value_field,
                time_field,
            } => (path, Some((value_field, time_field))),
        };

        let Some(root) = lookup_path(doc, path).filter(|v| v.is_object()) else {
            tracing::debug!(source = %self.name, path = %path, "payload has no object at path");
            return out;
        };

        for key in keys {
            let Some(entry) = root.get(key) else {
                continue;
            };
            let (raw, ts) = match per_key {
                None => (Some(entry), batch_ts),
                Some((value_field, time_field)) => (
                    lookup_path(entry, value_field),
                    time_field
                        .as_ref()
                        .and_then(|f| lookup_path(entry, f))
                        .and_then(parse_observed_at)
                        .or(batch_ts),
                ),
            };
            match raw.and_then(number_from).filter(|v| *v > 0.0) {
                Some(value) => {
                    out.values.insert(key.clone(), Observation::new(value, ts));
                }
                None => {
                    out.invalid.insert(key.clone());
                }
            }
        }
        out
    }
}
