use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::Source;
use crate::ingest::{DocumentKind, ErpLine, RawRecord};

use super::{ensure_success, SourceError, TransactionSource};

const ORGANIZATION_CATALOG: &str = "Организации";
const ITEM_CATALOG: &str = "Номенклатура";

#[derive(Debug, Clone)]
pub struct ErpConfig {
    /// e.g. `http://erp-host/base/odata/standard.odata`
    pub base_url: String,
    pub user: String,
    pub password: Option<String>,
    /// OData document names for goods receipts and issues
    pub receipt_document: String,
    pub issue_document: String,
    /// Movements and write-offs are only read when named
    pub movement_document: Option<String>,
    pub write_off_document: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    value: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(rename = "Ref_Key")]
    ref_key: String,
    #[serde(rename = "Date", default)]
    date: Option<String>,
    #[serde(rename = "Posted", default)]
    posted: bool,
    #[serde(rename = "Организация_Key", default)]
    organization_key: Option<String>,
    #[serde(rename = "Товары", default)]
    lines: Vec<DocumentLine>,
}

#[derive(Debug, Deserialize)]
struct DocumentLine {
    #[serde(rename = "LineNumber", default)]
    line_number: Option<Value>,
    #[serde(rename = "Номенклатура_Key", default)]
    item_key: Option<String>,
    #[serde(rename = "Сумма", default)]
    amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

/// Reads posted goods documents from the ERP's OData interface and
/// flattens them into lines.
pub struct ErpClient {
    client: Client,
    config: ErpConfig,
    /// (catalog, key) -> description; `None` for keys the ERP does not know
    catalog_cache: Mutex<HashMap<(String, String), Option<String>>>,
}

impl ErpClient {
    pub fn new(config: ErpConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            catalog_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, SourceError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.user, self.config.password.as_ref())
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("ERP rejected the credentials".to_string()));
        }

        let value = ensure_success("ERP OData", response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        Ok(Some(value))
    }

    async fn documents(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<Document>, SourceError> {
        let url = self.url(&format!("Document_{}", name));
        let query = [
            ("$format", "json".to_string()),
            (
                "$filter",
                format!("Date ge datetime'{}'", since.format("%Y-%m-%dT%H:%M:%S")),
            ),
            ("$expand", "Товары".to_string()),
            ("$orderby", "Date".to_string()),
        ];

        let list: Option<DocumentList> = self.get_json(&url, &query).await?;
        let documents = list.map(|l| l.value).unwrap_or_default();
        debug!(document = name, count = documents.len(), "fetched ERP documents");
        Ok(documents)
    }

    /// Description of a catalog entry; missing entries resolve to `None`.
    async fn describe(&self, catalog: &str, key: &str) -> Result<Option<String>, SourceError> {
        let cache_key = (catalog.to_string(), key.to_string());
        if let Some(cached) = self.catalog_cache.lock().await.get(&cache_key) {
            return Ok(cached.clone());
        }

        let url = self.url(&format!("Catalog_{}(guid'{}')", catalog, key));
        let entry: Option<CatalogEntry> = self
            .get_json(&url, &[("$format", "json".to_string())])
            .await?;
        let description = entry.and_then(|e| e.description);
        if description.is_none() {
            warn!(catalog, key, "catalog entry not found");
        }

        self.catalog_cache
            .lock()
            .await
            .insert(cache_key, description.clone());
        Ok(description)
    }

    async fn flatten(&self, kind: DocumentKind, document: Document) -> Result<Vec<ErpLine>, SourceError> {
        let organization = match &document.organization_key {
            Some(key) => self.describe(ORGANIZATION_CATALOG, key).await?,
            None => None,
        };

        let mut lines = Vec::with_capacity(document.lines.len());
        for line in document.lines {
            let item = match &line.item_key {
                Some(key) => self.describe(ITEM_CATALOG, key).await?,
                None => None,
            };
            lines.push(ErpLine {
                document_ref: document.ref_key.clone(),
                line_number: line.line_number.as_ref().and_then(line_number).unwrap_or(0),
                document_kind: kind,
                posted: document.posted,
                organization: organization.clone(),
                item,
                date: document.date.clone(),
                amount: line.amount,
            });
        }
        Ok(lines)
    }
}

/// OData serializes line numbers as strings in some configurations.
fn line_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl TransactionSource for ErpClient {
    fn source(&self) -> Source {
        Source::Erp
    }

    fn name(&self) -> &str {
        "erp"
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();

        let documents = [
            (DocumentKind::Receipt, Some(&self.config.receipt_document)),
            (DocumentKind::Issue, Some(&self.config.issue_document)),
            (DocumentKind::Movement, self.config.movement_document.as_ref()),
            (DocumentKind::WriteOff, self.config.write_off_document.as_ref()),
        ];

        for (kind, name) in documents {
            let Some(name) = name else { continue };
            for document in self.documents(name, since).await? {
                let lines = self.flatten(kind, document).await?;
                records.extend(lines.into_iter().map(RawRecord::Erp));
            }
        }

        info!(count = records.len(), since = %since, "fetched ERP lines");
        Ok(records)
    }
}
