// src/config/mod.rs
//! Dataset configuration: keys with display metadata, the ordered source
//! chain, threshold and report options. Loaded once at start-up.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ingest::providers::{BatchApiSource, Extract, PayloadFormat, ScrapeSource, Source};

pub const ENV_CONFIG_PATH: &str = "PRICE_WATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/price_watch.toml";

/// Compiled into the binary; used when no config file is found.
const BUILTIN_TOML: &str = include_str!("../../config/builtin.toml");

const MAX_DECIMALS: u8 = 8;

fn default_offset_hours() -> i32 {
    8
}
fn default_budget_secs() -> u64 {
    60
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_threshold() -> f64 {
    1.0
}
fn default_decimals() -> u8 {
    2
}
fn default_separator() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub settings: Settings,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Offset used for dates/times in report text.
    #[serde(default = "default_offset_hours")]
    pub utc_offset_hours: i32,
    /// Soft budget per dataset; sources not started by then are skipped.
    #[serde(default = "default_budget_secs")]
    pub run_budget_secs: u64,
    /// Request timeout for sources that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub store_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_offset_hours(),
            run_budget_secs: default_budget_secs(),
            default_timeout_secs: default_timeout_secs(),
            store_path: None,
        }
    }
}

impl Settings {
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    /// `icon label: value (HH:MM updated)`
    #[default]
    Plain,
    /// `icon label: 1BASE≈x KEY | 1KEY≈y BASE`
    Pair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub title: String,
    #[serde(default = "default_threshold")]
    pub threshold_pct: f64,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub track_inverse: bool,
    #[serde(default)]
    pub style: LineStyle,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    /// Defaults to `"{name}_"`.
    #[serde(default)]
    pub baseline_prefix: Option<String>,
    pub keys: Vec<KeyConfig>,
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Scrape(ScrapeSpec),
    Batch(BatchSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSpec {
    pub name: String,
    pub url: String,
    pub pattern: String,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    pub name: String,
    pub url: String,
    #[serde(default = "default_separator")]
    pub key_separator: String,
    /// Set for script-literal / JSONP payloads, e.g. `"var quote_json = "`.
    #[serde(default)]
    pub wrapper_prefix: Option<String>,
    /// Dotted path to the object holding the keys; empty means the root.
    #[serde(default)]
    pub values_at: String,
    /// When set, each key maps to an object and the number is this field.
    #[serde(default)]
    pub value_field: Option<String>,
    #[serde(default)]
    pub time_field: Option<String>,
    #[serde(default)]
    pub time_fields: Vec<String>,
    #[serde(default)]
    pub check_flags: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Display metadata for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMeta {
    pub key: String,
    pub label: String,
    pub icon: String,
    pub decimals: usize,
    pub group: Option<String>,
}

/// A dataset ready to run: regexes compiled, defaults applied.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub title: String,
    pub threshold_pct: f64,
    pub base: Option<String>,
    pub track_inverse: bool,
    pub style: LineStyle,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub baseline_prefix: String,
    pub keys: Vec<KeyMeta>,
    pub sources: Vec<Source>,
}

impl Dataset {
    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.key.clone()).collect()
    }
}

impl MonitorConfig {
    pub fn builtin() -> Result<Self> {
        let cfg: Self = toml::from_str(BUILTIN_TOML).context("parsing built-in config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    /// 1) `$PRICE_WATCH_CONFIG` (must exist)
    /// 2) `config/price_watch.toml`
    /// 3) built-in datasets
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        let local = PathBuf::from(DEFAULT_CONFIG_PATH);
        if local.exists() {
            return Self::load_from(&local);
        }
        Self::builtin()
    }

    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            bail!("no datasets configured");
        }
        if !(-23..=23).contains(&self.settings.utc_offset_hours) {
            bail!("utc_offset_hours out of range: {}", self.settings.utc_offset_hours);
        }
        let mut names = HashSet::new();
        for ds in &self.datasets {
            if !names.insert(ds.name.as_str()) {
                bail!("duplicate dataset name `{}`", ds.name);
            }
            if !ds.threshold_pct.is_finite() {
                bail!("dataset `{}`: threshold must be finite", ds.name);
            }
            if ds.keys.is_empty() {
                bail!("dataset `{}` has no keys", ds.name);
            }
            if ds.sources.is_empty() {
                bail!("dataset `{}` has no sources", ds.name);
            }
            let mut keys = HashSet::new();
            for k in &ds.keys {
                if k.key.trim().is_empty() {
                    bail!("dataset `{}` has an empty key", ds.name);
                }
                if !keys.insert(k.key.as_str()) {
                    bail!("dataset `{}`: duplicate key `{}`", ds.name, k.key);
                }
            }
            for src in &ds.sources {
                if let SourceSpec::Scrape(s) = src {
                    Regex::new(&s.pattern).with_context(|| {
                        format!("dataset `{}`, source `{}`: bad pattern", ds.name, s.name)
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Compile every dataset, or only those named in `only` (in that order).
    pub fn datasets(&self, only: &[String]) -> Result<Vec<Dataset>> {
        if only.is_empty() {
            return self.datasets.iter().map(|d| self.compile(d)).collect();
        }
        only.iter()
            .map(|name| {
                let ds = self
                    .datasets
                    .iter()
                    .find(|d| &d.name == name)
                    .ok_or_else(|| anyhow!("unknown dataset `{name}`"))?;
                self.compile(ds)
            })
            .collect()
    }

    fn compile(&self, ds: &DatasetConfig) -> Result<Dataset> {
        let default_timeout = Duration::from_secs(self.settings.default_timeout_secs);
        let sources = ds
            .sources
            .iter()
            .map(|s| compile_source(s, ds.base.as_deref(), default_timeout))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("dataset `{}`", ds.name))?;

        let keys = ds
            .keys
            .iter()
            .map(|k| {
                if k.decimals > MAX_DECIMALS {
                    tracing::warn!(key = %k.key, decimals = k.decimals, "decimals capped at {MAX_DECIMALS}");
                }
                KeyMeta {
                    key: k.key.clone(),
                    label: k.label.clone().unwrap_or_else(|| k.key.clone()),
                    icon: k.icon.clone().unwrap_or_else(|| "•".to_string()),
                    decimals: usize::from(k.decimals.min(MAX_DECIMALS)),
                    group: k.group.clone(),
                }
            })
            .collect();

        Ok(Dataset {
            name: ds.name.clone(),
            title: ds.title.clone(),
            threshold_pct: ds.threshold_pct.abs(),
            base: ds.base.clone(),
            track_inverse: ds.track_inverse,
            style: ds.style,
            header: ds.header.clone(),
            footer: ds.footer.clone(),
            baseline_prefix: ds
                .baseline_prefix
                .clone()
                .unwrap_or_else(|| format!("{}_", ds.name)),
            keys,
            sources,
        })
    }
}

fn header_pairs(h: &BTreeMap<String, String>) -> Vec<(String, String)> {
    h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn compile_source(spec: &SourceSpec, base: Option<&str>, default_timeout: Duration) -> Result<Source> {
    let timeout = |secs: Option<u64>| secs.map(Duration::from_secs).unwrap_or(default_timeout);
    Ok(match spec {
        SourceSpec::Scrape(s) => Source::Scrape(ScrapeSource {
            name: s.name.clone(),
            url_template: s.url.clone(),
            pattern: Regex::new(&s.pattern)
                .with_context(|| format!("source `{}`: bad pattern", s.name))?,
            invert: s.invert,
            timeout: timeout(s.timeout_secs),
            headers: header_pairs(&s.headers),
            base: base.map(str::to_string),
        }),
        SourceSpec::Batch(b) => Source::Batch(BatchApiSource {
            name: b.name.clone(),
            url_template: b.url.clone(),
            key_separator: b.key_separator.clone(),
            format: match &b.wrapper_prefix {
                Some(prefix) => PayloadFormat::Wrapped {
                    prefix: prefix.clone(),
                },
                None => PayloadFormat::Json,
            },
            extract: match &b.value_field {
                Some(field) => Extract::PerKey {
                    path: b.values_at.clone(),
                    value_field: field.clone(),
                    time_field: b.time_field.clone(),
                },
                None => Extract::MapAt {
                    path: b.values_at.clone(),
                },
            },
            time_fields: b.time_fields.clone(),
            check_flags: b.check_flags,
            timeout: timeout(b.timeout_secs),
            headers: header_pairs(&b.headers),
            base: base.map(str::to_string),
        }),
    })
}
