// src/ingest/parse.rs
//! Pure body parsers shared by all sources. Nothing here does I/O.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

use crate::error::SourceError;

/// Characters of the raw body quoted in parse diagnostics.
pub const SNIPPET_CHARS: usize = 100;

/// Unix values above this are milliseconds, below are seconds.
const MILLIS_CUTOFF: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scraped {
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// First `n` characters of `s`, for operator-facing error messages.
pub fn snippet(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Extract one number (and optionally a unix timestamp) from page text.
///
/// The pattern must capture the number either as the named group `value` or
/// as group 1. A named group `ts` is read as unix seconds/milliseconds.
pub fn scrape_value(pattern: &Regex, text: &str) -> Result<Scraped, SourceError> {
    let caps = pattern.captures(text).ok_or_else(|| {
        SourceError::Parse(format!(
            "marker not found, first {SNIPPET_CHARS} chars: {}",
            snippet(text, SNIPPET_CHARS)
        ))
    })?;

    let raw = caps
        .name("value")
        .or_else(|| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| SourceError::Parse("pattern has no value group".to_string()))?;

    let value = parse_number_str(raw)
        .ok_or_else(|| SourceError::Parse(format!("captured value `{raw}` is not a finite number")))?;

    let timestamp = caps
        .name("ts")
        .and_then(|m| m.as_str().trim().parse::<i64>().ok())
        .and_then(unix_to_datetime);

    Ok(Scraped { value, timestamp })
}

/// Parse the whole body as JSON.
pub fn parse_json(text: &str) -> Result<Value, SourceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Parse("empty body".to_string()));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Parse JSON wrapped in a script literal such as `var quote_json = {...};`
/// or a JSONP call `cb({...})`.
///
/// The prefix is matched ASCII case-insensitively anywhere in the body. When
/// it is absent a body starting with `{` is parsed as bare JSON; anything
/// else fails with a snippet of the body.
pub fn parse_wrapped_json(text: &str, prefix: &str) -> Result<Value, SourceError> {
    let raw = text.trim();
    let needle = prefix.trim_end();

    let json_str = match find_ascii_case_insensitive(raw, needle) {
        Some(idx) if !needle.is_empty() => {
            let mut inner = raw[idx + needle.len()..].trim();
            inner = inner.strip_suffix(';').unwrap_or(inner).trim_end();
            if needle.ends_with('(') {
                inner = inner.strip_suffix(')').unwrap_or(inner).trim_end();
            }
            inner
        }
        _ if raw.starts_with('{') => raw,
        _ => {
            return Err(SourceError::Parse(format!(
                "unrecognized payload, first {SNIPPET_CHARS} chars: {}",
                snippet(raw, SNIPPET_CHARS)
            )))
        }
    };

    serde_json::from_str(json_str).map_err(|e| {
        SourceError::Parse(format!(
            "invalid json after unwrapping: {e}; content: {}...",
            snippet(json_str, SNIPPET_CHARS * 2)
        ))
    })
}

/// Upstream-level error signal carried inside an otherwise valid payload:
/// `flag` missing or falsy, or a non-empty `errorCode`.
pub fn check_payload_flags(v: &Value) -> Result<(), SourceError> {
    let codes: Vec<String> = match v.get("errorCode") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };

    let flag_ok = match v.get("flag") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        _ => false,
    };

    if !flag_ok || !codes.is_empty() {
        return Err(SourceError::Payload(format!(
            "flag={}, errorCode={}",
            v.get("flag").map(|f| f.to_string()).unwrap_or_else(|| "missing".into()),
            codes.join(",")
        )));
    }
    Ok(())
}

/// Walk a dotted path (`"data.rates"`). An empty path returns `v` itself.
pub fn lookup_path<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(v);
    }
    path.split('.').try_fold(v, |cur, seg| cur.get(seg))
}

/// A finite number from a JSON number or a numeric string.
pub fn number_from(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        Value::String(s) => parse_number_str(s),
        _ => None,
    }
}

fn parse_number_str(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Interpret an upstream time field: unix seconds/millis (number or string),
/// RFC 3339, RFC 2822 or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_observed_at(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(unix_to_datetime),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(n) = s.parse::<i64>() {
                return unix_to_datetime(n);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

pub fn unix_to_datetime(n: i64) -> Option<DateTime<Utc>> {
    if n <= 0 {
        return None;
    }
    if n >= MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    h.windows(n.len()).position(|w| w.eq_ignore_ascii_case(n))
}
