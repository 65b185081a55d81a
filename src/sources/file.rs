use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::Source;
use crate::ingest::RawRecord;
use crate::io::{read_records, FileFormat};

use super::{SourceError, TransactionSource};

/// A saved export of one source. The whole file is handed over on every
/// fetch; already-stored records come back as duplicates.
pub struct FileSource {
    source: Source,
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(source: Source, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("{} file {}", source, path.display());
        Self { source, path, name }
    }
}

#[async_trait]
impl TransactionSource for FileSource {
    fn source(&self) -> Source {
        self.source
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cursor_key(&self) -> Option<&str> {
        None
    }

    async fn fetch_since(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let path = self.path.clone();
        let source = self.source;

        let records = tokio::task::spawn_blocking(move || {
            let file = File::open(&path).map_err(|e| SourceError::Io {
                path: path.clone(),
                source: e,
            })?;
            read_records(source, FileFormat::from_path(&path), BufReader::new(file))
                .map_err(|e| SourceError::InvalidResponse(format!("{:#}", e)))
        })
        .await
        .map_err(|e| SourceError::InvalidResponse(format!("file reader panicked: {}", e)))??;

        info!(path = %self.path.display(), count = records.len(), "read records from file");
        Ok(records)
    }
}
