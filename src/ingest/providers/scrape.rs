// src/ingest/providers/scrape.rs
use std::time::Duration;

use regex::Regex;

use super::{gate_status, render_template};
use crate::error::SourceError;
use crate::ingest::parse::scrape_value;
use crate::ingest::transport::{HttpRequest, HttpResponse};
use crate::ingest::types::Observation;

/// Per-key page scrape (e.g. a finance quote page).
#[derive(Debug, Clone)]
pub struct ScrapeSource {
    pub name: String,
    /// May use `{key}` and `{base}`.
    pub url_template: String,
    pub pattern: Regex,
    /// Store `1 / scraped` (the page quotes the pair the other way round).
    pub invert: bool,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub base: Option<String>,
}

impl ScrapeSource {
    pub fn locate(&self, key: &str) -> HttpRequest {
        let url = render_template(
            &self.url_template,
            &[("key", key), ("base", self.base.as_deref().unwrap_or_default())],
        );
        HttpRequest::get(url, self.timeout).with_headers(&self.headers)
    }

    pub fn parse(&self, resp: &HttpResponse) -> Result<Observation, SourceError> {
        gate_status(&self.name, resp, self.parse_body(&resp.body))
    }

    fn parse_body(&self, body: &str) -> Result<Observation, SourceError> {
        let scraped = scrape_value(&self.pattern, body)?;
        if scraped.value <= 0.0 {
            return Err(SourceError::Parse(format!(
                "non-positive value {}",
                scraped.value
            )));
        }
        let value = if self.invert {
            1.0 / scraped.value
        } else {
            scraped.value
        };
        Ok(Observation::new(value, scraped.timestamp))
    }
}
