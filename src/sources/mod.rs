//! Collaborators that fetch raw records from the outside world.

mod bank;
mod erp;
mod file;

pub use bank::{BankClient, BankConfig};
pub use erp::{ErpClient, ErpConfig};
pub use file::FileSource;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::Source;
use crate::ingest::RawRecord;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid client certificate: {0}")]
    Certificate(String),
}

/// Something that can hand over raw records changed since a point in time.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    fn source(&self) -> Source;

    /// Short label for logs and reports.
    fn name(&self) -> &str;

    /// Identity under which the sync cursor is stored. Two collaborators
    /// of the same kind must not share one. `None` means the source is
    /// always read whole over the lookback window and keeps no cursor.
    fn cursor_key(&self) -> Option<&str> {
        Some(self.name())
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError>;
}

/// Fail with `Status` unless the response is a success.
async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        service,
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}
