use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{DailyBalance, Source, Transaction};
use crate::ingest::{BankPayload, ErpPayload, RawRecord};
use crate::storage::TransactionQuery;

/// Ledger snapshot for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub balances: Vec<DailyBalance>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export transactions matching `query` to CSV
    pub async fn export_transactions_csv<W: Write>(
        &self,
        writer: W,
        query: &TransactionQuery,
    ) -> Result<usize> {
        let transactions = self.service.list_transactions(query).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "organization",
            "source",
            "operation",
            "method",
            "amount_cents",
            "date",
            "external_id",
            "counterparty",
            "purpose",
            "item",
            "created_at",
        ])?;

        for tx in &transactions {
            csv_writer.write_record([
                tx.id.to_string(),
                tx.organization.to_string(),
                tx.source.to_string(),
                tx.operation.as_str().to_string(),
                tx.method.as_str().to_string(),
                tx.amount_cents.to_string(),
                tx.date.to_string(),
                tx.external_id.clone(),
                tx.counterparty.clone().unwrap_or_default(),
                tx.purpose.clone().unwrap_or_default(),
                tx.item.clone().unwrap_or_default(),
                tx.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export stored daily balances to CSV
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let balances = self.service.list_balances(None, None, None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["organization", "date", "balance_cents", "updated_at"])?;

        for balance in &balances {
            csv_writer.write_record([
                balance.organization.to_string(),
                balance.date.to_string(),
                balance.balance.to_string(),
                balance.updated_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(balances.len())
    }

    /// Export the whole ledger and its balances as one JSON document
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let transactions = self
            .service
            .list_transactions(&TransactionQuery::default())
            .await?;
        let balances = self.service.list_balances(None, None, None).await?;

        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            transactions,
            balances,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}

/// Write fetched records of `source` as JSON in the layout `import`
/// reads back. Records of the other source are skipped.
pub fn write_raw_json<W: Write>(source: Source, records: &[RawRecord], mut writer: W) -> Result<usize> {
    let json = match source {
        Source::Bank => {
            let transactions: Vec<_> = records
                .iter()
                .filter_map(|r| match r {
                    RawRecord::Bank(record) => Some(record.clone()),
                    RawRecord::Erp(_) => None,
                })
                .collect();
            serde_json::to_string_pretty(&BankPayload { transactions })?
        }
        Source::Erp => {
            let lines: Vec<_> = records
                .iter()
                .filter_map(|r| match r {
                    RawRecord::Erp(line) => Some(line.clone()),
                    RawRecord::Bank(_) => None,
                })
                .collect();
            serde_json::to_string_pretty(&ErpPayload { lines })?
        }
    };

    writer.write_all(json.as_bytes())?;
    writer.flush()?;
    Ok(records.iter().filter(|r| r.source() == source).count())
}
