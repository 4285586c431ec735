// tests/common/mod.rs
// Shared fakes for integration tests: scripted transport + recording notifier.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};

use price_watch::error::SourceError;
use price_watch::ingest::transport::{HttpRequest, HttpResponse, Transport};
use price_watch::notify::Notifier;
use price_watch::report::Clock;

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{name}"))
        .unwrap_or_else(|e| panic!("missing tests/fixtures/{name}: {e}"))
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(u16, String),
    Fail(String),
    Slow(Duration, u16, String),
    Panic(String),
}

/// Answers by URL prefix (first match wins) and records every URL it saw.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Vec<(String, Reply)>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, prefix: &str, reply: Reply) -> Self {
        self.routes.push((prefix.to_string(), reply));
        self
    }

    pub fn ok(self, prefix: &str, body: impl Into<String>) -> Self {
        self.route(prefix, Reply::Ok(200, body.into()))
    }

    pub fn status(self, prefix: &str, status: u16, body: impl Into<String>) -> Self {
        self.route(prefix, Reply::Ok(status, body.into()))
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|u| u.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse, SourceError> {
        self.seen.lock().unwrap().push(req.url.clone());
        let reply = self
            .routes
            .iter()
            .find(|(prefix, _)| req.url.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone());
        match reply {
            Some(Reply::Ok(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::Fail(msg)) => Err(SourceError::Transport(msg)),
            Some(Reply::Slow(delay, status, body)) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse { status, body })
            }
            Some(Reply::Panic(msg)) => panic!("{msg}"),
            None => Err(SourceError::Transport(format!("no route for {}", req.url))),
        }
    }
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// 2025-10-16 09:00 at +08:00.
pub fn clock() -> Clock {
    Clock {
        now: Utc.with_ymd_and_hms(2025, 10, 16, 1, 0, 0).unwrap(),
        offset: FixedOffset::east_opt(8 * 3600).unwrap(),
    }
}
