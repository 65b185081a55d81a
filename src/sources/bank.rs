use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Identity};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::Source;
use crate::ingest::{BankPayload, RawRecord};

use super::{ensure_success, SourceError, TransactionSource};

#[derive(Debug, Clone)]
pub struct BankConfig {
    pub api_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// PEM client certificate and key for mutual TLS
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client-credentials client for the bank's transaction API.
pub struct BankClient {
    client: Client,
    config: BankConfig,
}

impl BankClient {
    pub fn new(config: BankConfig) -> Result<Self, SourceError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) {
            let mut pem = read_file(cert_path)?;
            pem.push(b'\n');
            pem.extend(read_file(key_path)?);
            let identity =
                Identity::from_pem(&pem).map_err(|e| SourceError::Certificate(e.to_string()))?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(scope) = &self.config.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        if response.status().is_client_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let token = ensure_success("bank token endpoint", response)
            .await?
            .json::<TokenResponse>()
            .await
            .map_err(|e| SourceError::Auth(format!("malformed token response: {}", e)))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl TransactionSource for BankClient {
    fn source(&self) -> Source {
        Source::Bank
    }

    fn name(&self) -> &str {
        "bank"
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let token = self.access_token().await?;
        debug!("bank access token obtained");

        let url = format!(
            "{}/transactions",
            self.config.api_base_url.trim_end_matches('/')
        );
        let date_from = since.date_naive().to_string();

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("dateFrom", date_from.as_str())])
            .send()
            .await?;

        let payload = ensure_success("bank API", response)
            .await?
            .json::<BankPayload>()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        info!(count = payload.transactions.len(), date_from = %date_from, "fetched bank transactions");
        Ok(payload.transactions.into_iter().map(RawRecord::Bank).collect())
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, SourceError> {
    std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(base_url: &str) -> BankConfig {
        BankConfig {
            api_base_url: base_url.to_string(),
            token_url: format!("{}/oauth/token", base_url),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scope: Some("transactions".to_string()),
            cert_path: None,
            key_path: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn since() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-02-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_fetch_since_uses_token_and_date_filter() {
        let mut server = mockito::Server::new_async().await;

        let token = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client".into()),
                Matcher::UrlEncoded("scope".into(), "transactions".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok-123", "token_type": "Bearer"}"#)
            .create_async()
            .await;

        let transactions = server
            .mock("GET", "/transactions")
            .match_query(Matcher::UrlEncoded("dateFrom".into(), "2024-02-01".into()))
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"transactions": [
                    {"id": 1, "amount": "100.00", "date": "2024-02-01", "inn": "1234567890"},
                    {"id": 2, "amount": -30, "date": "2024-02-02", "inn": "1234567890", "payment_type": "card"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = BankClient::new(config(&server.url())).unwrap();
        let records = client.fetch_since(since()).await.unwrap();

        token.assert_async().await;
        transactions.assert_async().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source() == Source::Bank));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_auth_errors() {
        let mut server = mockito::Server::new_async().await;

        let _token = server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body("invalid_client")
            .create_async()
            .await;

        let client = BankClient::new(config(&server.url())).unwrap();
        let result = client.fetch_since(since()).await;

        assert!(matches!(result, Err(SourceError::Auth(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_reported_with_status() {
        let mut server = mockito::Server::new_async().await;

        let _token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok"}"#)
            .create_async()
            .await;
        let _transactions = server
            .mock("GET", Matcher::Regex(r"^/transactions".into()))
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = BankClient::new(config(&server.url())).unwrap();
        let result = client.fetch_since(since()).await;

        assert!(matches!(result, Err(SourceError::Status { status: 503, .. })));
    }

    #[test]
    fn test_missing_certificate_file() {
        let mut config = config("http://localhost");
        config.cert_path = Some(PathBuf::from("/nonexistent/cert.pem"));
        config.key_path = Some(PathBuf::from("/nonexistent/key.pem"));

        assert!(matches!(BankClient::new(config), Err(SourceError::Io { .. })));
    }
}
