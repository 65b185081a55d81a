use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Cents, DailyBalance, Method, Operation, Organization, Source, Transaction,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_SYNC_CURSORS};

const TRANSACTION_COLUMNS: &str = "id, organization, source, operation, method, amount_cents, date, external_id, counterparty, purpose, item, created_at";

/// Filters for listing transactions. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub organization: Option<Organization>,
    pub source: Option<Source>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

/// One group of the per-day summary: transactions sharing organization,
/// date, source, operation and method.
#[derive(Debug, Clone)]
pub struct DayAggregate {
    pub organization: Organization,
    pub date: NaiveDate,
    pub source: Source,
    pub operation: Operation,
    pub method: Method,
    pub count: i64,
    pub total: Cents,
}

/// Repository for persisting the ledger and the derived balances.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_SYNC_CURSORS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// The underlying pool, for callers that need raw access.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a database transaction.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin database transaction")
    }

    // ========================
    // Transaction operations
    // ========================

    /// Store a transaction unless one with the same `(source, external_id)`
    /// already exists. Returns true if the row was inserted.
    pub async fn insert_if_new(&self, tx: &Transaction) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (id, organization, source, operation, method, amount_cents, date, external_id, counterparty, purpose, item, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source, external_id) DO NOTHING
            "#,
        )
        .bind(tx.id.to_string())
        .bind(tx.organization.as_str())
        .bind(tx.source.as_str())
        .bind(tx.operation.as_str())
        .bind(tx.method.as_str())
        .bind(tx.amount_cents)
        .bind(tx.date.to_string())
        .bind(&tx.external_id)
        .bind(&tx.counterparty)
        .bind(&tx.purpose)
        .bind(&tx.item)
        .bind(tx.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save transaction {}", tx.external_id))?;

        Ok(result.rows_affected() == 1)
    }

    /// List transactions matching the query, ordered by date then insertion.
    pub async fn list_transactions(&self, filter: &TransactionQuery) -> Result<Vec<Transaction>> {
        let mut query = format!("SELECT {} FROM transactions WHERE 1=1", TRANSACTION_COLUMNS);

        let from_date_str = filter.from_date.map(|d| d.to_string());
        let to_date_str = filter.to_date.map(|d| d.to_string());

        if filter.organization.is_some() {
            query.push_str(" AND organization = ?");
        }
        if filter.source.is_some() {
            query.push_str(" AND source = ?");
        }
        if from_date_str.is_some() {
            query.push_str(" AND date >= ?");
        }
        if to_date_str.is_some() {
            query.push_str(" AND date <= ?");
        }

        query.push_str(" ORDER BY date, created_at, external_id");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);

        if let Some(org) = filter.organization {
            sql_query = sql_query.bind(org.as_str());
        }
        if let Some(source) = filter.source {
            sql_query = sql_query.bind(source.as_str());
        }
        if let Some(ref fd) = from_date_str {
            sql_query = sql_query.bind(fd);
        }
        if let Some(ref td) = to_date_str {
            sql_query = sql_query.bind(td);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Distinct organization values present in the ledger, as stored.
    pub async fn list_ledger_organizations(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT organization FROM transactions ORDER BY organization")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list organizations")?;

        Ok(rows.iter().map(|row| row.get("organization")).collect())
    }

    pub async fn count_transactions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?;
        Ok(row.get("count"))
    }

    /// Transactions of one organization on or after `from`, read inside a
    /// recompute transaction.
    pub async fn transactions_for_recompute(
        conn: &mut SqliteConnection,
        organization: Organization,
        from: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>> {
        let from_str = from.map(|d| d.to_string()).unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM transactions WHERE organization = ? AND date >= ? ORDER BY date, created_at",
            TRANSACTION_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(organization.as_str())
            .bind(from_str)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to load transactions for recompute")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let org_str: String = row.get("organization");
        let source_str: String = row.get("source");
        let operation_str: String = row.get("operation");
        let method_str: String = row.get("method");
        let date_str: String = row.get("date");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            organization: Organization::from_str(&org_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid organization: {}", org_str))?,
            source: Source::from_str(&source_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid source: {}", source_str))?,
            operation: Operation::from_str(&operation_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid operation: {}", operation_str))?,
            method: Method::from_str(&method_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid method: {}", method_str))?,
            amount_cents: row
                .try_get::<Cents, _>("amount_cents")
                .context("Invalid amount_cents")?,
            date: parse_date(&date_str)?,
            external_id: row.get("external_id"),
            counterparty: row.get("counterparty"),
            purpose: row.get("purpose"),
            item: row.get("item"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Balance operations
    // ========================

    /// Latest stored balance of `organization` strictly before `date`.
    pub async fn latest_balance_before(
        conn: &mut SqliteConnection,
        organization: Organization,
        date: NaiveDate,
    ) -> Result<Option<Cents>> {
        let row = sqlx::query(
            r#"
            SELECT balance_cents
            FROM daily_balances
            WHERE organization = ? AND date < ?
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(organization.as_str())
        .bind(date.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read seed balance")?;

        Ok(row.map(|r| r.get("balance_cents")))
    }

    /// Most recent stored balance of `organization`, if any.
    pub async fn latest_balance(
        conn: &mut SqliteConnection,
        organization: Organization,
    ) -> Result<Option<Cents>> {
        let row = sqlx::query(
            "SELECT balance_cents FROM daily_balances WHERE organization = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(organization.as_str())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read latest balance")?;

        Ok(row.map(|r| r.get("balance_cents")))
    }

    /// Insert or overwrite one balance row on the given connection.
    pub async fn upsert_balance_on(conn: &mut SqliteConnection, balance: &DailyBalance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_balances (organization, date, balance_cents, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (organization, date)
            DO UPDATE SET balance_cents = excluded.balance_cents, updated_at = excluded.updated_at
            "#,
        )
        .bind(balance.organization.as_str())
        .bind(balance.date.to_string())
        .bind(balance.balance)
        .bind(balance.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .with_context(|| {
            format!(
                "Failed to store balance for {} on {}",
                balance.organization, balance.date
            )
        })?;
        Ok(())
    }

    /// Insert or overwrite one balance row outside of a recompute run.
    pub async fn upsert_balance(
        &self,
        organization: Organization,
        date: NaiveDate,
        balance: Cents,
    ) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::upsert_balance_on(&mut *conn, &DailyBalance::new(organization, date, balance)).await
    }

    /// The latest balance row on or before `date`.
    pub async fn balance_as_of(
        &self,
        organization: Organization,
        date: NaiveDate,
    ) -> Result<Option<DailyBalance>> {
        let row = sqlx::query(
            r#"
            SELECT organization, date, balance_cents, updated_at
            FROM daily_balances
            WHERE organization = ? AND date <= ?
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(organization.as_str())
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch balance")?;

        row.as_ref().map(Self::row_to_balance).transpose()
    }

    /// List stored balances, ordered by organization then date.
    pub async fn list_balances(
        &self,
        organization: Option<Organization>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    ) -> Result<Vec<DailyBalance>> {
        let mut query = String::from(
            "SELECT organization, date, balance_cents, updated_at FROM daily_balances WHERE 1=1",
        );

        let from_date_str = from_date.map(|d| d.to_string());
        let to_date_str = to_date.map(|d| d.to_string());

        if organization.is_some() {
            query.push_str(" AND organization = ?");
        }
        if from_date_str.is_some() {
            query.push_str(" AND date >= ?");
        }
        if to_date_str.is_some() {
            query.push_str(" AND date <= ?");
        }
        query.push_str(" ORDER BY organization, date");

        let mut sql_query = sqlx::query(&query);
        if let Some(org) = organization {
            sql_query = sql_query.bind(org.as_str());
        }
        if let Some(ref fd) = from_date_str {
            sql_query = sql_query.bind(fd);
        }
        if let Some(ref td) = to_date_str {
            sql_query = sql_query.bind(td);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list balances")?;

        rows.iter().map(Self::row_to_balance).collect()
    }

    pub async fn count_balances(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM daily_balances")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count balances")?;
        Ok(row.get("count"))
    }

    fn row_to_balance(row: &SqliteRow) -> Result<DailyBalance> {
        let org_str: String = row.get("organization");
        let date_str: String = row.get("date");
        let updated_at_str: String = row.get("updated_at");

        Ok(DailyBalance {
            organization: Organization::from_str(&org_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid organization: {}", org_str))?,
            date: parse_date(&date_str)?,
            balance: row.get("balance_cents"),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .context("Invalid updated_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Reporting aggregates
    // ========================

    /// Per-day totals grouped by organization, source, operation and method,
    /// for dates in `[from, to]`.
    pub async fn summarize_days(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DayAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT organization, date, source, operation, method,
                   COUNT(*) as count,
                   COALESCE(SUM(amount_cents), 0) as total
            FROM transactions
            WHERE date >= ? AND date <= ?
            GROUP BY organization, date, source, operation, method
            ORDER BY organization, date, source, operation, method
            "#,
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to summarize transactions")?;

        rows.iter()
            .map(|row| {
                let org_str: String = row.get("organization");
                let date_str: String = row.get("date");
                let source_str: String = row.get("source");
                let operation_str: String = row.get("operation");
                let method_str: String = row.get("method");

                Ok(DayAggregate {
                    organization: Organization::from_str(&org_str)
                        .ok_or_else(|| anyhow::anyhow!("Invalid organization: {}", org_str))?,
                    date: parse_date(&date_str)?,
                    source: Source::from_str(&source_str)
                        .ok_or_else(|| anyhow::anyhow!("Invalid source: {}", source_str))?,
                    operation: Operation::from_str(&operation_str)
                        .ok_or_else(|| anyhow::anyhow!("Invalid operation: {}", operation_str))?,
                    method: Method::from_str(&method_str)
                        .ok_or_else(|| anyhow::anyhow!("Invalid method: {}", method_str))?,
                    count: row.get("count"),
                    total: row.get("total"),
                })
            })
            .collect()
    }

    // ========================
    // Sync cursors
    // ========================

    pub async fn get_sync_cursor(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_synced_at FROM sync_cursors WHERE cursor_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read sync cursor")?;

        row.map(|r| {
            let value: String = r.get("last_synced_at");
            DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .context("Invalid sync cursor timestamp")
        })
        .transpose()
    }

    pub async fn set_sync_cursor(&self, key: &str, synced_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (cursor_key, last_synced_at)
            VALUES (?, ?)
            ON CONFLICT (cursor_key) DO UPDATE SET last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(key)
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to store sync cursor")?;
        Ok(())
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", value))
}
