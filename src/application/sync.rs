use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::Source;
use crate::ingest::RawRecord;
use crate::io::write_raw_json;
use crate::sources::{SourceError, TransactionSource};

use super::{AppError, IngestReport, LedgerService, RecomputeReport};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound for one source's fetch
    pub timeout: Duration,
    /// How far back to fetch when a source has never been synced
    pub lookback: chrono::Duration,
    /// Keep every fetched batch as JSON in this directory
    pub raw_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            lookback: chrono::Duration::days(7),
            raw_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub name: String,
    pub source: Source,
    pub since: DateTime<Utc>,
    pub fetched: usize,
    /// Where the fetched batch was saved, if it was
    pub raw_file: Option<PathBuf>,
    pub ingest: Option<IngestReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    /// Present when at least one source's batch was ingested
    pub recompute: Option<RecomputeReport>,
}

impl LedgerService {
    /// Fetch from every source concurrently, ingest what arrived and
    /// recompute balances whenever any batch made it in, even one of
    /// duplicates only. One failing source does not stop the others; the
    /// report says which ones failed.
    pub async fn sync(
        &self,
        sources: &[Box<dyn TransactionSource>],
        options: &SyncOptions,
    ) -> Result<SyncReport, AppError> {
        let started_at = Utc::now();

        let mut windows = Vec::with_capacity(sources.len());
        for source in sources {
            let cursor = match source.cursor_key() {
                Some(key) => self.repo.get_sync_cursor(key).await?,
                None => None,
            };
            windows.push(cursor.unwrap_or(started_at - options.lookback));
        }

        let fetches = sources.iter().zip(&windows).map(|(source, &since)| {
            fetch_with_timeout(source.as_ref(), since, options.timeout)
        });
        let results = join_all(fetches).await;

        let mut outcomes = Vec::with_capacity(sources.len());
        let mut inserted = 0;
        let mut ingested_batches = 0;

        for ((source, since), result) in sources.iter().zip(windows).zip(results) {
            let mut outcome = SourceOutcome {
                name: source.name().to_string(),
                source: source.source(),
                since,
                fetched: 0,
                raw_file: None,
                ingest: None,
                error: None,
            };

            match result {
                Ok(records) => {
                    outcome.fetched = records.len();
                    if let Some(dir) = &options.raw_dir {
                        match save_raw(dir, source.as_ref(), &records, started_at) {
                            Ok(path) => outcome.raw_file = Some(path),
                            Err(e) => {
                                warn!(source = source.name(), error = %format!("{:#}", e), "could not save raw batch")
                            }
                        }
                    }

                    let report = self.ingest(records).await?;
                    inserted += report.inserted;
                    ingested_batches += 1;
                    outcome.ingest = Some(report);
                    if let Some(key) = source.cursor_key() {
                        self.repo.set_sync_cursor(key, started_at).await?;
                    }
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "source fetch failed");
                    outcome.error = Some(e.to_string());
                }
            }
            outcomes.push(outcome);
        }

        let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
        let status = if failures == 0 {
            SyncStatus::Success
        } else if failures < outcomes.len() {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };

        let recompute = if ingested_batches > 0 {
            Some(self.recompute_queued().await?)
        } else {
            None
        };

        info!(?status, sources = outcomes.len(), inserted, "sync finished");
        Ok(SyncReport {
            status,
            started_at,
            sources: outcomes,
            recompute,
        })
    }
}

/// `<dir>/<source name>_<start time>.json`, with the name reduced to
/// characters that are safe in a file name.
fn save_raw(
    dir: &Path,
    source: &dyn TransactionSource,
    records: &[RawRecord],
    started_at: DateTime<Utc>,
) -> anyhow::Result<PathBuf> {
    let label: String = source
        .name()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}_{}.json", label, started_at.format("%Y%m%dT%H%M%S")));

    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let count = write_raw_json(source.source(), records, BufWriter::new(file))?;
    debug!(path = %path.display(), count, "saved raw batch");
    Ok(path)
}

async fn fetch_with_timeout(
    source: &dyn TransactionSource,
    since: DateTime<Utc>,
    limit: Duration,
) -> Result<Vec<RawRecord>, SourceError> {
    match timeout(limit, source.fetch_since(since)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}
