//! price-watch — one-shot run entrypoint (cron / scheduler friendly).
//! Loads datasets, resolves values, compares with stored baselines and
//! pushes the report through every configured notification channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use price_watch::config::MonitorConfig;
use price_watch::engine::{run, RunContext};
use price_watch::ingest::transport::ReqwestTransport;
use price_watch::notify::NotifierMux;
use price_watch::report::{error_report, Clock};
use price_watch::store::{DryRunStore, JsonFileStore, KvStore, DEFAULT_STATE_PATH};

#[derive(Debug, Parser)]
#[command(name = "price-watch", version, about = "Rate and price monitor with threshold alerts")]
struct Cli {
    /// Config file (TOML). Falls back to config/price_watch.toml, then built-in datasets.
    #[arg(long, env = "PRICE_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Baseline state file.
    #[arg(long, env = "PRICE_WATCH_STATE")]
    state: Option<PathBuf>,

    /// Only run these datasets (repeatable). Default: all.
    #[arg(long = "dataset", short = 'd')]
    datasets: Vec<String>,

    /// Send all main reports as one notification with this title.
    #[arg(long, value_name = "TITLE", num_args = 0..=1, default_missing_value = "Price watch")]
    combined: Option<String>,

    /// Read baselines but never write them.
    #[arg(long)]
    dry_run: bool,

    /// Print the effective config as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

/// Compact logs by default, JSON lines with LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("price_watch=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact().with_target(false)).init();
    }
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    match &cli.config {
        Some(p) => MonitorConfig::load_from(p),
        None => MonitorConfig::load_default(),
    }
}

async fn execute(cli: Cli, mux: &NotifierMux) -> Result<()> {
    let cfg = load_config(&cli)?;
    if cli.print_config {
        println!("{}", toml::to_string_pretty(&cfg).context("serializing config")?);
        return Ok(());
    }
    let datasets = cfg.datasets(&cli.datasets)?;

    let state_path = cli
        .state
        .clone()
        .or_else(|| cfg.settings.store_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));
    let file_store = JsonFileStore::open(&state_path)
        .await
        .with_context(|| format!("opening state {}", state_path.display()))?;
    let store: Box<dyn KvStore> = if cli.dry_run {
        tracing::info!("dry run: baselines will not be written");
        Box::new(DryRunStore::new(file_store))
    } else {
        Box::new(file_store)
    };

    let transport = ReqwestTransport::new().context("building http client")?;
    let ctx = RunContext {
        transport: &transport,
        store: store.as_ref(),
        clock: Clock {
            now: Utc::now(),
            offset: cfg.settings.utc_offset(),
        },
        budget: cfg.settings.run_budget(),
    };

    let summary = run(&ctx, &datasets, mux, cli.combined.as_deref()).await;
    if !summary.failed.is_empty() {
        tracing::warn!(failed = %summary.failed.join(","), "some datasets failed (operator notified)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "price-watch starting");

    let mux = NotifierMux::from_env();
    if let Err(e) = execute(cli, &mux).await {
        tracing::error!(error = %format!("{e:#}"), "run aborted");
        let m = error_report("price-watch", &format!("{e:#}"));
        mux.notify(&m.title, &m.body).await;
        return Err(e);
    }
    tracing::info!("price-watch finished");
    Ok(())
}
