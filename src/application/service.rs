use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    verify_balances, Cents, DailyBalance, IntegrityReport, Organization, Source, Transaction,
};
use crate::ingest::{Normalizer, OrganizationDirectory, RawRecord, Rejection};
use crate::storage::{Repository, TransactionQuery};

use super::reporting::{build_daily_report, build_monthly_report, DailyReport, MonthlyReport};
use super::AppError;

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, sync, tests).
pub struct LedgerService {
    pub(crate) repo: Repository,
    normalizer: Normalizer,
    /// Held for the whole of a recompute run; at most one run at a time.
    pub(crate) recompute_lock: Mutex<()>,
}

/// A raw record that did not make it into the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub source: Source,
    pub reference: Option<String>,
    pub reason: String,
}

/// Outcome of ingesting one batch of raw records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedRecord>,
    /// Organizations that received at least one new transaction
    pub touched: Vec<Organization>,
}

/// Balance of one organization at the end of a day.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub organization: Organization,
    pub date: NaiveDate,
    pub balance: Cents,
    /// Date of the stored row the value was carried from, if any
    pub as_of: Option<NaiveDate>,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            normalizer: Normalizer::default(),
            recompute_lock: Mutex::new(()),
        }
    }

    /// Use a different INN directory for bank records.
    pub fn with_directory(mut self, directory: OrganizationDirectory) -> Self {
        self.normalizer = Normalizer::new(directory);
        self
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Ingestion
    // ========================

    /// Normalize and store a batch of raw records. Invalid records are
    /// collected in the report; records already in the ledger are counted
    /// as duplicates. Storage failures abort the batch.
    pub async fn ingest(&self, records: Vec<RawRecord>) -> Result<IngestReport, AppError> {
        let mut report = IngestReport {
            received: records.len(),
            ..Default::default()
        };

        for record in &records {
            let tx = match self.normalizer.normalize(record) {
                Ok(tx) => tx,
                Err(rejection) => {
                    self.reject(&mut report, record, rejection);
                    continue;
                }
            };

            if self.repo.insert_if_new(&tx).await? {
                report.inserted += 1;
                if !report.touched.contains(&tx.organization) {
                    report.touched.push(tx.organization);
                }
            } else {
                debug!(source = %tx.source, external_id = %tx.external_id, "duplicate record skipped");
                report.duplicates += 1;
            }
        }

        info!(
            received = report.received,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "ingested batch"
        );
        Ok(report)
    }

    fn reject(&self, report: &mut IngestReport, record: &RawRecord, rejection: Rejection) {
        let reference = record.reference();
        warn!(
            source = %record.source(),
            reference = reference.as_deref().unwrap_or("-"),
            reason = %rejection,
            "record rejected"
        );
        report.rejected.push(RejectedRecord {
            source: record.source(),
            reference,
            reason: rejection.to_string(),
        });
    }

    // ========================
    // Queries
    // ========================

    pub async fn list_transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_transactions(query).await?)
    }

    /// Balance at the end of `date`, carried forward from the latest day
    /// with transactions. Zero before the organization's first day.
    pub async fn balance_as_of(
        &self,
        organization: Organization,
        date: NaiveDate,
    ) -> Result<BalanceEntry, AppError> {
        let row = self.repo.balance_as_of(organization, date).await?;
        Ok(BalanceEntry {
            organization,
            date,
            balance: row.as_ref().map(|b| b.balance).unwrap_or(0),
            as_of: row.map(|b| b.date),
        })
    }

    /// Balances of every organization at the end of `date`.
    pub async fn all_balances_as_of(&self, date: NaiveDate) -> Result<Vec<BalanceEntry>, AppError> {
        let mut entries = Vec::with_capacity(Organization::ALL.len());
        for org in Organization::ALL {
            entries.push(self.balance_as_of(org, date).await?);
        }
        Ok(entries)
    }

    pub async fn list_balances(
        &self,
        organization: Option<Organization>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    ) -> Result<Vec<DailyBalance>, AppError> {
        Ok(self
            .repo
            .list_balances(organization, from_date, to_date)
            .await?)
    }

    // ========================
    // Reports
    // ========================

    /// Per-organization summary of one day, split by source.
    pub async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, AppError> {
        let aggregates = self.repo.summarize_days(date, date).await?;
        let closing = self.all_balances_as_of(date).await?;
        Ok(build_daily_report(date, &aggregates, &closing))
    }

    /// Day-by-day totals and balances for a calendar month (`YYYY-MM`).
    pub async fn monthly_report(&self, month: &str) -> Result<MonthlyReport, AppError> {
        let (from, to) = month_bounds(month)?;
        let aggregates = self.repo.summarize_days(from, to).await?;
        let balances = self.repo.list_balances(None, None, Some(to)).await?;
        Ok(build_monthly_report(month, from, to, &aggregates, &balances))
    }

    // ========================
    // Integrity
    // ========================

    /// Compare stored balances with a fresh computation over the ledger.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let transaction_count = self.repo.count_transactions().await?;
        let balance_count = self.repo.count_balances().await?;

        let mut organizations = Vec::new();
        let mut issues = Vec::new();

        for org in Organization::ALL {
            let query = TransactionQuery {
                organization: Some(org),
                ..Default::default()
            };
            let transactions = self.repo.list_transactions(&query).await?;
            let stored = self.repo.list_balances(Some(org), None, None).await?;
            if transactions.is_empty() && stored.is_empty() {
                continue;
            }
            organizations.push(org);
            issues.extend(verify_balances(org, &transactions, &stored));
        }

        Ok(IntegrityReport {
            transaction_count,
            balance_count,
            organizations,
            issues,
        })
    }
}

/// First and last day of a `YYYY-MM` month.
fn month_bounds(month: &str) -> Result<(NaiveDate, NaiveDate), AppError> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidPeriod(format!("expected YYYY-MM, got '{}'", month)))?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| AppError::InvalidPeriod(month.to_string()))?;
    Ok((first, last))
}
