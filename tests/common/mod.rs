// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use ledgerbridge::application::LedgerService;
use ledgerbridge::domain::{Cents, Organization};
use ledgerbridge::ingest::{BankRecord, DocumentKind, ErpLine, RawRecord};
use serde_json::json;
use tempfile::TempDir;

/// INNs of the default organization directory
pub const OOO_INN: &str = "1234567890";
pub const IP1_INN: &str = "9876543210";
pub const IP2_INN: &str = "1122334455";

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a YYYY-MM-DD string
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// A bank record with a signed amount in whole units, e.g. "-70.00"
pub fn bank(id: &str, amount: &str, date: &str, inn: &str) -> RawRecord {
    RawRecord::Bank(BankRecord {
        id: Some(json!(id)),
        amount: Some(json!(amount)),
        date: Some(date.to_string()),
        inn: Some(json!(inn)),
        payment_type: Some("Платежное поручение".to_string()),
        ..Default::default()
    })
}

pub fn erp(document: &str, line: i64, kind: DocumentKind, org: &str, amount: &str, date: &str) -> RawRecord {
    RawRecord::Erp(ErpLine {
        document_ref: document.to_string(),
        line_number: line,
        document_kind: kind,
        posted: true,
        organization: Some(org.to_string()),
        item: Some("Flour".to_string()),
        date: Some(date.to_string()),
        amount: Some(json!(amount)),
    })
}

/// Stored (date, balance) pairs of one organization
pub async fn stored_balances(
    service: &LedgerService,
    organization: Organization,
) -> Result<Vec<(NaiveDate, Cents)>> {
    Ok(service
        .list_balances(Some(organization), None, None)
        .await?
        .into_iter()
        .map(|b| (b.date, b.balance))
        .collect())
}
