// tests/resolver_chain.rs
// Fallback chain against a scripted transport: which source is asked for
// what, and what the report says about keys nobody could price.

mod common;

use std::time::Duration;

use common::{clock, Reply, ScriptedTransport};
use price_watch::config::MonitorConfig;
use price_watch::ingest::providers::{ScrapeSource, Source};
use price_watch::ingest::{resolve, DEFAULT_RUN_BUDGET};
use price_watch::report;
use regex::Regex;

const THREE_SOURCES: &str = r#"
    [[datasets]]
    name = "abc"
    title = "ABC"

    [[datasets.keys]]
    key = "A"
    [[datasets.keys]]
    key = "B"
    [[datasets.keys]]
    key = "C"

    [[datasets.sources]]
    kind = "scrape"
    name = "page"
    url = "https://s1.test/{key}"
    pattern = 'price=(?P<value>[\d.]+)'

    [[datasets.sources]]
    kind = "batch"
    name = "quotes"
    url = "https://s2.test/q?codes={keys}"
    wrapper_prefix = "var quote_json = "

    [[datasets.sources]]
    kind = "batch"
    name = "spare"
    url = "https://s3.test/{keys}"
"#;

fn abc_transport() -> ScriptedTransport {
    ScriptedTransport::new()
        .ok("https://s1.test/A", "<p>price=7.5</p>")
        .status("https://s1.test/B", 404, "not here")
        .route("https://s1.test/C", Reply::Fail("connection reset".into()))
        .ok("https://s2.test/", r#"var quote_json = {"B":10};"#)
        .status("https://s3.test/", 500, "oops")
}

fn abc_dataset() -> price_watch::Dataset {
    let cfg: MonitorConfig = toml::from_str(THREE_SOURCES).unwrap();
    cfg.validate().unwrap();
    cfg.datasets(&[]).unwrap().remove(0)
}

#[tokio::test]
async fn later_sources_only_see_what_is_still_missing() {
    let transport = abc_transport();
    let ds = abc_dataset();

    let res = resolve(&transport, &ds.key_names(), None, &ds.sources, DEFAULT_RUN_BUDGET).await;

    assert_eq!(res.get("A").unwrap().value, 7.5);
    assert_eq!(res.get("A").unwrap().source_index, Some(0));
    assert_eq!(res.get("B").unwrap().value, 10.0);
    assert_eq!(res.get("B").unwrap().source_index, Some(1));
    assert!(res.get("C").is_none());
    assert_eq!(res.unresolved, vec!["C".to_string()]);

    assert_eq!(res.requested_from(0), ["A", "B", "C"]);
    assert_eq!(res.requested_from(1), ["B", "C"]);
    assert_eq!(res.requested_from(2), ["C"]);

    let s2 = transport.requests_to("https://s2.test/");
    assert_eq!(s2, vec!["https://s2.test/q?codes=B,C".to_string()]);
    assert_eq!(transport.requests_to("https://s3.test/"), vec!["https://s3.test/C".to_string()]);

    // one failure per scrape miss, one for the 500
    assert_eq!(res.attempts[0].errors.len(), 2);
    assert!(res.attempts[1].errors.is_empty());
    assert_eq!(res.attempts[2].errors.len(), 1);
}

#[tokio::test]
async fn report_has_one_line_per_key_even_when_unresolved() {
    let transport = abc_transport();
    let ds = abc_dataset();
    let res = resolve(&transport, &ds.key_names(), None, &ds.sources, DEFAULT_RUN_BUDGET).await;

    let lines = report::key_lines(&ds, &res, &clock());
    assert_eq!(lines, vec!["• A: 7.50", "• B: 10.00", "• C: no data"]);
}

#[tokio::test]
async fn chain_stops_once_everything_is_resolved() {
    let transport = ScriptedTransport::new()
        .ok("https://s1.test/", "price=1.25")
        .ok("https://s2.test/", r#"var quote_json = {"A":1,"B":2,"C":3};"#);
    let ds = abc_dataset();

    let res = resolve(&transport, &ds.key_names(), None, &ds.sources, DEFAULT_RUN_BUDGET).await;

    assert_eq!(res.resolved_count(), 3);
    assert_eq!(res.attempts.len(), 1);
    assert!(transport.requests_to("https://s2.test/").is_empty());
    assert!(transport.requests_to("https://s3.test/").is_empty());
}

#[tokio::test]
async fn payload_error_falls_through_to_next_source() {
    let cfg: MonitorConfig = toml::from_str(
        r#"
        [[datasets]]
        name = "gold"
        title = "Gold"

        [[datasets.keys]]
        key = "JO_1"

        [[datasets.sources]]
        kind = "batch"
        name = "quote-center"
        url = "https://qc.test/?codes={keys}&_={nonce}"
        wrapper_prefix = "var quote_json = "
        value_field = "q63"
        check_flags = true

        [[datasets.sources]]
        kind = "batch"
        name = "mirror"
        url = "https://mirror.test/{keys}"
        values_at = "data"
    "#,
    )
    .unwrap();
    let ds = cfg.datasets(&[]).unwrap().remove(0);
    let transport = ScriptedTransport::new()
        .ok("https://qc.test/", common::fixture("jijinhao_error.js"))
        .ok("https://mirror.test/", r#"{"data":{"JO_1":"912.5"}}"#);

    let res = resolve(&transport, &ds.key_names(), None, &ds.sources, DEFAULT_RUN_BUDGET).await;

    assert_eq!(res.get("JO_1").unwrap().value, 912.5);
    assert_eq!(res.get("JO_1").unwrap().source_index, Some(1));
    assert!(res.attempts[0].errors[0].contains("E1"), "{:?}", res.attempts[0].errors);
}

fn scrape(name: &str, timeout: Duration) -> Source {
    Source::Scrape(ScrapeSource {
        name: name.to_string(),
        url_template: format!("https://{name}.test/{{key}}"),
        pattern: Regex::new(r"price=(?P<value>[\d.]+)").unwrap(),
        invert: false,
        timeout,
        headers: Vec::new(),
        base: None,
    })
}

#[tokio::test]
async fn slow_request_is_cut_off_without_blocking_siblings() {
    let transport = ScriptedTransport::new()
        .route(
            "https://page.test/X",
            Reply::Slow(Duration::from_secs(5), 200, "price=1".into()),
        )
        .ok("https://page.test/Y", "price=2");
    let keys = vec!["X".to_string(), "Y".to_string()];
    let started = std::time::Instant::now();

    let res = resolve(
        &transport,
        &keys,
        None,
        &[scrape("page", Duration::from_millis(50))],
        DEFAULT_RUN_BUDGET,
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(res.get("Y").unwrap().value, 2.0);
    assert_eq!(res.unresolved, vec!["X".to_string()]);
    assert!(res.attempts[0].errors[0].contains("timed out"));
}

#[tokio::test]
async fn exhausted_budget_skips_remaining_sources() {
    let transport = ScriptedTransport::new().ok("https://", "price=1");
    let keys = vec!["X".to_string()];
    let sources = [
        scrape("first", Duration::from_secs(1)),
        scrape("second", Duration::from_secs(1)),
    ];

    let res = resolve(&transport, &keys, None, &sources, Duration::ZERO).await;

    assert!(transport.requests().is_empty());
    assert_eq!(res.skipped_sources, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(res.unresolved, keys);
}

#[tokio::test]
async fn base_key_needs_no_request() {
    let transport = ScriptedTransport::new().ok("https://page.test/USD", "price=7.1");
    let keys = vec!["CNY".to_string(), "USD".to_string()];

    let res = resolve(
        &transport,
        &keys,
        Some("CNY"),
        &[scrape("page", Duration::from_secs(1))],
        DEFAULT_RUN_BUDGET,
    )
    .await;

    assert_eq!(res.get("CNY").unwrap().value, 1.0);
    assert_eq!(res.get("CNY").unwrap().source_index, None);
    assert_eq!(transport.requests(), vec!["https://page.test/USD".to_string()]);
}
