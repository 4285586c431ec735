// src/error.rs
use thiserror::Error;

/// Failure of one source for one request (a single key for scrape sources,
/// the whole remaining key set for batch sources). Always recoverable: the
/// resolver logs it and moves on to the next source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("upstream reported error: {0}")]
    Payload(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Transport(_) => "transport",
            SourceError::Status { .. } => "status",
            SourceError::Parse(_) => "parse",
            SourceError::Payload(_) => "payload",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Transport(format!("timed out: {e}"))
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(format!("invalid json: {e}"))
    }
}

/// Baseline store failure. Logged by the caller, never fatal for a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Raised when a dataset ends a run with zero resolved keys.
#[derive(Debug, Error)]
#[error("no source produced a value for dataset `{dataset}` ({tried} sources tried)")]
pub struct DatasetExhausted {
    pub dataset: String,
    pub tried: usize,
}
