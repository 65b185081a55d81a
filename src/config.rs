use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::SyncOptions;
use crate::ingest::OrganizationDirectory;
use crate::sources::{BankClient, BankConfig, ErpClient, ErpConfig, TransactionSource};

const DEFAULT_RECEIPT_DOCUMENT: &str = "ПриходнаяНакладная";
const DEFAULT_ISSUE_DOCUMENT: &str = "РасходнаяНакладная";

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub source_timeout: Duration,
    pub sync_lookback_days: i64,
    pub directory: OrganizationDirectory,
    /// `None` when `BANK_API_BASE_URL` is unset
    pub bank: Option<BankConfig>,
    /// `None` when `ERP_ODATA_BASE_URL` is unset
    pub erp: Option<ErpConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).with_context(|| format!("{} must be set when its source is enabled", key))
        };

        let source_timeout = Duration::from_secs(
            get("SOURCE_TIMEOUT_SECS")
                .map(|v| v.parse::<u64>())
                .transpose()
                .context("SOURCE_TIMEOUT_SECS must be a whole number of seconds")?
                .unwrap_or(10),
        );
        let sync_lookback_days = get("SYNC_LOOKBACK_DAYS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("SYNC_LOOKBACK_DAYS must be a whole number of days")?
            .unwrap_or(7);
        if sync_lookback_days < 0 {
            bail!("SYNC_LOOKBACK_DAYS must not be negative");
        }

        let directory = match get("ORGANIZATION_INNS") {
            Some(spec) => OrganizationDirectory::parse(&spec)
                .map_err(|e| anyhow::anyhow!("Invalid ORGANIZATION_INNS: {}", e))?,
            None => OrganizationDirectory::default(),
        };

        let bank = match get("BANK_API_BASE_URL") {
            Some(api_base_url) => {
                let cert_path = get("BANK_CERT_PATH").map(PathBuf::from);
                let key_path = get("BANK_KEY_PATH").map(PathBuf::from);
                if cert_path.is_some() != key_path.is_some() {
                    bail!("BANK_CERT_PATH and BANK_KEY_PATH must be set together");
                }
                Some(BankConfig {
                    api_base_url,
                    token_url: require("BANK_TOKEN_URL")?,
                    client_id: require("BANK_CLIENT_ID")?,
                    client_secret: require("BANK_CLIENT_SECRET")?,
                    scope: get("BANK_SCOPE"),
                    cert_path,
                    key_path,
                    timeout: source_timeout,
                })
            }
            None => None,
        };

        let erp = match get("ERP_ODATA_BASE_URL") {
            Some(base_url) => Some(ErpConfig {
                base_url,
                user: require("ERP_ODATA_USER")?,
                password: get("ERP_ODATA_PASSWORD"),
                receipt_document: get("ERP_RECEIPT_DOCUMENT")
                    .unwrap_or_else(|| DEFAULT_RECEIPT_DOCUMENT.to_string()),
                issue_document: get("ERP_ISSUE_DOCUMENT")
                    .unwrap_or_else(|| DEFAULT_ISSUE_DOCUMENT.to_string()),
                movement_document: get("ERP_MOVEMENT_DOCUMENT"),
                write_off_document: get("ERP_WRITE_OFF_DOCUMENT"),
                timeout: source_timeout,
            }),
            None => None,
        };

        Ok(Config {
            source_timeout,
            sync_lookback_days,
            directory,
            bank,
            erp,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            timeout: self.source_timeout,
            lookback: chrono::Duration::days(self.sync_lookback_days),
            raw_dir: None,
        }
    }

    /// HTTP clients for every configured source.
    pub fn remote_sources(&self) -> Result<Vec<Box<dyn TransactionSource>>> {
        let mut sources: Vec<Box<dyn TransactionSource>> = Vec::new();
        if let Some(bank) = &self.bank {
            sources.push(Box::new(
                BankClient::new(bank.clone()).context("Failed to set up bank client")?,
            ));
        }
        if let Some(erp) = &self.erp {
            sources.push(Box::new(
                ErpClient::new(erp.clone()).context("Failed to set up ERP client")?,
            ));
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Organization;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.source_timeout, Duration::from_secs(10));
        assert_eq!(config.sync_lookback_days, 7);
        assert!(config.bank.is_none());
        assert!(config.erp.is_none());
        assert_eq!(
            config.directory.resolve("1234567890"),
            Some(Organization::Ooo)
        );
        assert!(config.remote_sources().unwrap().is_empty());
    }

    #[test]
    fn test_sources_enabled_by_base_url() {
        let config = config(&[
            ("SOURCE_TIMEOUT_SECS", "3"),
            ("BANK_API_BASE_URL", "https://bank.example/api"),
            ("BANK_TOKEN_URL", "https://bank.example/token"),
            ("BANK_CLIENT_ID", "id"),
            ("BANK_CLIENT_SECRET", "secret"),
            ("ERP_ODATA_BASE_URL", "http://erp/odata"),
            ("ERP_ODATA_USER", "reader"),
            ("ERP_WRITE_OFF_DOCUMENT", "СписаниеТоваров"),
            ("ORGANIZATION_INNS", "42=IP2"),
        ])
        .unwrap();

        let bank = config.bank.as_ref().unwrap();
        assert_eq!(bank.timeout, Duration::from_secs(3));
        assert_eq!(bank.scope, None);

        let erp = config.erp.as_ref().unwrap();
        assert_eq!(erp.receipt_document, DEFAULT_RECEIPT_DOCUMENT);
        assert_eq!(erp.password, None);
        assert_eq!(erp.movement_document, None);
        assert_eq!(erp.write_off_document.as_deref(), Some("СписаниеТоваров"));

        assert_eq!(config.directory.resolve("42"), Some(Organization::Ip2));
        assert_eq!(config.directory.resolve("1234567890"), None);
        assert_eq!(config.remote_sources().unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_settings_fail() {
        assert!(config(&[("BANK_API_BASE_URL", "https://bank.example")]).is_err());
        assert!(config(&[("ERP_ODATA_BASE_URL", "http://erp")]).is_err());
        assert!(config(&[("SOURCE_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[("SYNC_LOOKBACK_DAYS", "-1")]).is_err());
        assert!(config(&[("ORGANIZATION_INNS", "42")]).is_err());
        assert!(config(&[
            ("BANK_API_BASE_URL", "https://bank.example"),
            ("BANK_TOKEN_URL", "https://bank.example/token"),
            ("BANK_CLIENT_ID", "id"),
            ("BANK_CLIENT_SECRET", "secret"),
            ("BANK_CERT_PATH", "/tmp/cert.pem"),
        ])
        .is_err());
    }
}
