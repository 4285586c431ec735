use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;

const ENV_VARS: [&str; 5] = [
    "SMTP_HOST",
    "SMTP_USER",
    "SMTP_PASS",
    "NOTIFY_EMAIL_FROM",
    "NOTIFY_EMAIL_TO",
];

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// `Ok(None)` when SMTP is not configured at all; `Err` when it is only
    /// partly configured or the values are invalid.
    pub fn from_env() -> Result<Option<Self>> {
        let vals: Vec<Option<String>> = ENV_VARS
            .iter()
            .map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
            .collect();
        if vals.iter().all(Option::is_none) {
            return Ok(None);
        }
        let missing: Vec<&str> = ENV_VARS
            .iter()
            .zip(&vals)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("missing {}", missing.join(", "));
        }
        let [host, user, pass, from_addr, to_addr] = [0, 1, 2, 3, 4].map(|i| vals[i].clone().unwrap_or_default());
        Self::new(&host, user, pass, &from_addr, &to_addr).map(Some)
    }

    pub fn new(host: &str, user: String, pass: String, from: &str, to: &str) -> Result<Self> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .with_context(|| format!("invalid SMTP_HOST {host}"))?
            .credentials(Credentials::new(user, pass))
            .build();
        let from = from.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to.parse().context("invalid NOTIFY_EMAIL_TO")?;
        Ok(Self { mailer, from, to })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(title)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
