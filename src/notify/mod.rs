// src/notify/mod.rs
pub mod discord;
pub mod email;
pub mod slack;

use anyhow::Result;
use async_trait::async_trait;

pub use discord::DiscordNotifier;
pub use email::EmailNotifier;
pub use slack::SlackNotifier;

/// One delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Strip markdown control characters some push channels render literally.
pub fn plain_text(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '#' | '*' | '|' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Writes notifications to the log and stdout. Always enabled, so a run with
/// no configured channels still shows its output.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        tracing::info!(target: "notify", title, "notification");
        println!("{title}\n{body}\n");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Fans one message out to every channel. Channel failures are logged and
/// never reach the caller.
pub struct NotifierMux {
    channels: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Log channel plus every webhook/SMTP channel whose env vars are set.
    pub fn from_env() -> Self {
        let mut channels: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if let Some(s) = SlackNotifier::from_env() {
            channels.push(Box::new(s));
        }
        if let Some(d) = DiscordNotifier::from_env() {
            channels.push(Box::new(d));
        }
        match EmailNotifier::from_env() {
            Ok(Some(e)) => channels.push(Box::new(e)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "email channel disabled"),
        }
        tracing::debug!(
            channels = %channels.iter().map(|c| c.name()).collect::<Vec<_>>().join(","),
            "notifier channels"
        );
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub async fn notify(&self, title: &str, body: &str) {
        let title = plain_text(title);
        let body = plain_text(body);
        for ch in &self.channels {
            match ch.send(&title, &body).await {
                Ok(()) => tracing::debug!(channel = ch.name(), "notification sent"),
                Err(e) => tracing::warn!(channel = ch.name(), error = %format!("{e:#}"), "notification failed"),
            }
        }
    }
}
