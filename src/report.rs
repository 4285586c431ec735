// src/report.rs
//! Text rendering for notifications. Pure: takes resolved values and flags,
//! returns strings.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};

use crate::change_detector::{Direction, FlaggedDelta};
use crate::config::{Dataset, KeyMeta, LineStyle};
use crate::ingest::Resolution;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub main: Message,
    /// Threshold alerts, sent before `main` when present.
    pub alert: Option<Message>,
}

/// Clock and zone used for dates in titles and `HH:MM` stamps.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
}

impl Clock {
    pub fn date(&self) -> String {
        self.now.with_timezone(&self.offset).format("%Y-%m-%d").to_string()
    }

    pub fn hhmm(&self, t: DateTime<Utc>) -> String {
        t.with_timezone(&self.offset).format("%H:%M").to_string()
    }
}

/// Exactly one line per configured key, in configured order.
pub fn key_lines(ds: &Dataset, res: &Resolution, clock: &Clock) -> Vec<String> {
    ds.keys.iter().map(|meta| key_line(ds, meta, res, clock)).collect()
}

fn key_line(ds: &Dataset, meta: &KeyMeta, res: &Resolution, clock: &Clock) -> String {
    let KeyMeta {
        key,
        label,
        icon,
        decimals,
        ..
    } = meta;
    let p = *decimals;

    let Some(rv) = res.get(key) else {
        let status = if res.invalid.contains(key) {
            "invalid price"
        } else {
            "no data"
        };
        return format!("{icon} {label}: {status}");
    };

    match ds.style {
        LineStyle::Pair => {
            let base = ds.base.as_deref().unwrap_or_default();
            format!(
                "{icon} {label}: 1{base}≈{:.p$}{key} | 1{key}≈{:.p$}{base}",
                rv.value,
                1.0 / rv.value
            )
        }
        LineStyle::Plain => match rv.observed_at {
            Some(t) => format!("{icon} {label}: {:.p$} ({} updated)", rv.value, clock.hhmm(t)),
            None => format!("{icon} {label}: {:.p$}", rv.value),
        },
    }
}

/// Key lines framed by the optional header, group sub-headers and footer.
pub fn body(ds: &Dataset, res: &Resolution, clock: &Clock) -> String {
    let mut out = Vec::with_capacity(ds.keys.len() + 2);
    if let Some(h) = &ds.header {
        out.push(h.clone());
    }
    let mut seen_groups = HashSet::new();
    for (meta, line) in ds.keys.iter().zip(key_lines(ds, res, clock)) {
        if let Some(g) = &meta.group {
            if seen_groups.insert(g.as_str()) {
                out.push(format!("[{g}]"));
            }
        }
        out.push(line);
    }
    if let Some(f) = &ds.footer {
        out.push(f.clone());
    }
    out.join("\n")
}

fn flag_part(ds: &Dataset, meta: &KeyMeta, d: &FlaggedDelta) -> String {
    let arrow = if d.is_rise() { "↑" } else { "↓" };
    let p = meta.decimals;
    let key = &meta.key;
    let detail = match (ds.style, d.direction) {
        (LineStyle::Pair, Direction::Forward) => {
            let base = ds.base.as_deref().unwrap_or_default();
            format!("1{base}→{:.p$}{key}", d.current)
        }
        (LineStyle::Pair, Direction::Inverse) => {
            let base = ds.base.as_deref().unwrap_or_default();
            format!("1{key}→{:.p$}{base}", d.current)
        }
        (LineStyle::Plain, _) => format!("{:.p$}→{:.p$}", d.previous, d.current),
    };
    format!("{arrow}{:.2}% ({detail})", d.percent_change.abs())
}

/// One line per flagged key; both directions of a key share the line.
/// Repeated (key, direction) pairs are collapsed.
pub fn alert_lines(ds: &Dataset, flags: &[FlaggedDelta]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for meta in &ds.keys {
        let parts: Vec<String> = flags
            .iter()
            .filter(|d| d.key == meta.key && seen.insert((d.key.as_str(), d.direction)))
            .map(|d| flag_part(ds, meta, d))
            .collect();
        if !parts.is_empty() {
            lines.push(format!("{} {} {}", meta.icon, meta.label, parts.join(" · ")));
        }
    }
    lines
}

fn trim_pct(v: f64) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn format_report(ds: &Dataset, res: &Resolution, flags: &[FlaggedDelta], clock: &Clock) -> Report {
    let mut title = format!("{} {}", ds.title, clock.date());
    if let Some(t) = res.latest_observed_at() {
        title.push_str(&format!(" (updated {})", clock.hhmm(t)));
    }

    let lines = alert_lines(ds, flags);
    let alert = (!lines.is_empty()).then(|| Message {
        title: format!("📈 {} moves (≥{}%)", ds.title, trim_pct(ds.threshold_pct)),
        body: lines.join("\n"),
    });

    Report {
        main: Message {
            title,
            body: body(ds, res, clock),
        },
        alert,
    }
}

/// Single notification for a dataset that could not run.
pub fn error_report(title: &str, error: &str) -> Message {
    Message {
        title: format!("❌ {title} failed"),
        body: format!("error: {error}"),
    }
}

/// Several main messages under one title, separated by one blank line.
pub fn combine(title: &str, clock: &Clock, parts: &[Message]) -> Message {
    Message {
        title: format!("{title} {}", clock.date()),
        body: parts
            .iter()
            .map(|m| m.body.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::ingest::resolution_from;
    use crate::ingest::types::Observation;
    use chrono::TimeZone;

    fn clock() -> Clock {
        Clock {
            now: Utc.with_ymd_and_hms(2025, 10, 16, 23, 30, 0).unwrap(),
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
        }
    }

    fn dataset(name: &str) -> Dataset {
        MonitorConfig::builtin()
            .unwrap()
            .datasets(&[name.to_string()])
            .unwrap()
            .remove(0)
    }

    #[test]
    fn every_key_gets_exactly_one_line() {
        let ds = dataset("rates");
        let res = resolution_from([("USD".to_string(), Observation::new(0.14, None))]);
        let lines = key_lines(&ds, &res, &clock());
        assert_eq!(lines.len(), ds.keys.len());
        assert_eq!(lines[0], "🇺🇸 US dollar: 1CNY≈0.1400USD | 1USD≈7.1429CNY");
        assert!(lines[1..].iter().all(|l| l.ends_with("no data")));
    }

    #[test]
    fn plain_line_carries_local_time() {
        let ds = dataset("gold");
        let t = Utc.with_ymd_and_hms(2025, 10, 16, 2, 5, 0).unwrap();
        let mut res = resolution_from([("JO_52678".to_string(), Observation::new(1105.0, Some(t)))]);
        res.invalid.insert("JO_42653".to_string());
        let text = body(&ds, &res, &clock());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "💎 Domestic gold (CNY/g)");
        assert_eq!(lines[1], "👑 Chow Tai Seng: 1105.00 (10:05 updated)");
        assert_eq!(lines[2], "🌟 Zhou Liu Fu: invalid price");
        assert_eq!(lines[3], "🐦 Lao Feng Xiang: no data");
    }

    #[test]
    fn title_uses_local_date_and_latest_stamp() {
        let ds = dataset("gold");
        let t = Utc.with_ymd_and_hms(2025, 10, 16, 23, 10, 0).unwrap();
        let res = resolution_from([("JO_52678".to_string(), Observation::new(1105.0, Some(t)))]);
        let r = format_report(&ds, &res, &[], &clock());
        assert_eq!(r.main.title, "Gold prices 2025-10-17 (updated 07:10)");
        assert!(r.alert.is_none());
    }

    #[test]
    fn both_directions_share_one_alert_line() {
        let ds = dataset("rates");
        let flags = vec![
            FlaggedDelta {
                key: "USD".into(),
                direction: Direction::Forward,
                previous: 0.14,
                current: 0.1428,
                percent_change: 2.0,
            },
            FlaggedDelta {
                key: "USD".into(),
                direction: Direction::Inverse,
                previous: 7.142857,
                current: 7.002801,
                percent_change: -1.96,
            },
            FlaggedDelta {
                key: "USD".into(),
                direction: Direction::Forward,
                previous: 0.14,
                current: 0.1428,
                percent_change: 2.0,
            },
        ];
        let lines = alert_lines(&ds, &flags);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            "🇺🇸 US dollar ↑2.00% (1CNY→0.1428USD) · ↓1.96% (1USD→7.0028CNY)"
        );
        let r = format_report(&ds, &Resolution::default(), &flags, &clock());
        assert_eq!(r.alert.unwrap().title, "📈 Exchange rates moves (≥1%)");
    }

    #[test]
    fn groups_and_footer_frame_lines() {
        let mut ds = dataset("gold");
        ds.header = None;
        ds.footer = Some("note".into());
        ds.keys.truncate(3);
        ds.keys[0].group = Some("HK".into());
        ds.keys[1].group = Some("HK".into());
        ds.keys[2].group = Some("Mainland".into());
        let text = body(&ds, &Resolution::default(), &clock());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "[HK]");
        assert_eq!(lines[3], "[Mainland]");
        assert_eq!(lines[5], "note");
    }

    #[test]
    fn combined_bodies_are_blank_line_separated() {
        let a = Message {
            title: "a".into(),
            body: "x\ny".into(),
        };
        let b = Message {
            title: "b".into(),
            body: "z".into(),
        };
        let m = combine("Rates & gold", &clock(), &[a, b]);
        assert_eq!(m.body, "x\ny\n\nz");
        assert_eq!(m.title, "Rates & gold 2025-10-17");
    }

    #[test]
    fn error_report_shape() {
        let m = error_report("Gold prices", "boom");
        assert_eq!(m.title, "❌ Gold prices failed");
        assert_eq!(m.body, "error: boom");
    }
}
