use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::{
    IngestReport, LedgerService, RecomputeReport, SyncOptions, SyncReport, SyncStatus,
};
use crate::config::Config;
use crate::domain::{format_cents, Organization, Source};
use crate::logging::init_tracing;
use crate::sources::{FileSource, TransactionSource};
use crate::storage::TransactionQuery;

/// Ledgerbridge - bank and ERP ledger with daily balances
#[derive(Parser)]
#[command(name = "ledgerbridge")]
#[command(about = "Collects bank and ERP transactions and keeps per-organization daily balances")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "DATABASE_PATH", default_value = "ledgerbridge.db")]
    pub database: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Bank,
    Erp,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Bank => Source::Bank,
            SourceArg::Erp => Source::Erp,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Fetch from the configured sources, store new records and recompute balances
    Sync {
        /// Also read a saved bank export (JSON or CSV)
        #[arg(long)]
        bank_file: Option<PathBuf>,

        /// Also read saved ERP lines (JSON or CSV)
        #[arg(long)]
        erp_file: Option<PathBuf>,

        /// Keep a JSON copy of every fetched batch in this directory
        #[arg(long, value_name = "DIR")]
        save_raw: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Import records of one source from a file or stdin
    Import {
        #[arg(value_enum)]
        source: SourceArg,

        /// Input file (stdin if omitted, read as JSON)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Store the records without recomputing balances
        #[arg(long)]
        no_recompute: bool,
    },

    /// Rebuild daily balances from the ledger
    Recompute {
        /// Only rebuild days on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
    },

    /// Show the balance of one or all organizations at the end of a day
    Balance {
        /// Organization (OOO, IP1, IP2, IP3); all if omitted
        organization: Option<String>,

        /// Day to report (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },

    /// List stored daily balances
    Balances {
        #[arg(short, long)]
        organization: Option<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },

    /// List transactions
    Transactions {
        #[arg(short, long)]
        organization: Option<String>,

        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Generate reports
    #[command(subcommand)]
    Report(ReportCommands),

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Verify stored balances against the ledger
    Check,
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Per-organization summary of one day
    Daily {
        /// Day to report (YYYY-MM-DD, default today)
        date: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Day-by-day totals and balances of a month
    Monthly {
        /// Month to report (YYYY-MM, default current month)
        month: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_tracing(self.verbose);

        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Sync {
                bank_file,
                erp_file,
                save_raw,
                format,
            } => {
                let config = Config::from_env()?;
                let service = LedgerService::connect(&self.database)
                    .await?
                    .with_directory(config.directory.clone());

                let mut sources = config.remote_sources()?;
                if let Some(path) = bank_file {
                    sources.push(Box::new(FileSource::new(Source::Bank, path)));
                }
                if let Some(path) = erp_file {
                    sources.push(Box::new(FileSource::new(Source::Erp, path)));
                }
                let mut options = config.sync_options();
                if let Some(dir) = save_raw {
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                    options.raw_dir = Some(dir);
                }
                run_sync_command(&service, &sources, &options, format).await?;
            }

            Commands::Import {
                source,
                input,
                no_recompute,
            } => {
                let config = Config::from_env()?;
                let service = LedgerService::connect(&self.database)
                    .await?
                    .with_directory(config.directory);
                run_import_command(&service, source.into(), input, no_recompute).await?;
            }

            Commands::Recompute { from } => {
                let service = LedgerService::connect(&self.database).await?;
                let report = match from {
                    Some(date) => service.recompute_balances_from(parse_date(&date)?).await?,
                    None => service.recompute_balances().await?,
                };
                print_recompute(&report);
                if !report.is_complete() {
                    bail!("{} organization(s) failed to recompute", report.failed.len());
                }
            }

            Commands::Balance { organization, date } => {
                let service = LedgerService::connect(&self.database).await?;
                let date = parse_optional_date(date)?.unwrap_or_else(|| Utc::now().date_naive());
                let entries = match organization {
                    Some(org) => vec![service.balance_as_of(parse_organization(&org)?, date).await?],
                    None => service.all_balances_as_of(date).await?,
                };

                println!("Balances at end of {}", date);
                println!("{:<8} {:>15}  {:<12}", "ORG", "BALANCE", "LAST ACTIVE");
                println!("{}", "-".repeat(38));
                for entry in entries {
                    println!(
                        "{:<8} {:>15}  {:<12}",
                        entry.organization,
                        format_cents(entry.balance),
                        entry.as_of.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
                    );
                }
            }

            Commands::Balances {
                organization,
                from,
                to,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let organization = organization.map(|o| parse_organization(&o)).transpose()?;
                let balances = service
                    .list_balances(organization, parse_optional_date(from)?, parse_optional_date(to)?)
                    .await?;

                if balances.is_empty() {
                    println!("No balances stored. Run `recompute` after importing transactions.");
                } else {
                    println!("{:<8} {:<12} {:>15}", "ORG", "DATE", "BALANCE");
                    println!("{}", "-".repeat(37));
                    for b in balances {
                        println!(
                            "{:<8} {:<12} {:>15}",
                            b.organization,
                            b.date,
                            format_cents(b.balance)
                        );
                    }
                }
            }

            Commands::Transactions {
                organization,
                source,
                from,
                to,
                limit,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                let query = TransactionQuery {
                    organization: organization.map(|o| parse_organization(&o)).transpose()?,
                    source: source.map(Source::from),
                    from_date: parse_optional_date(from)?,
                    to_date: parse_optional_date(to)?,
                    limit,
                };
                run_transactions_command(&service, &query).await?;
            }

            Commands::Report(report_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_report_command(&service, report_cmd).await?;
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output.as_deref()).await?;
            }

            Commands::Check => {
                let service = LedgerService::connect(&self.database).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn run_sync_command(
    service: &LedgerService,
    sources: &[Box<dyn TransactionSource>],
    options: &SyncOptions,
    format: OutputFormat,
) -> Result<()> {
    if sources.is_empty() {
        bail!("No sources configured. Set BANK_API_BASE_URL / ERP_ODATA_BASE_URL or pass --bank-file / --erp-file");
    }

    let report = service.sync(sources, options).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_sync(&report),
    }

    if report.status == SyncStatus::Failed {
        bail!("All sources failed");
    }
    Ok(())
}

fn print_sync(report: &SyncReport) {
    println!("Sync {:?} at {}", report.status, report.started_at.format("%Y-%m-%d %H:%M:%S"));
    for outcome in &report.sources {
        match (&outcome.ingest, &outcome.error) {
            (_, Some(error)) => println!("  {:<30} FAILED: {}", outcome.name, error),
            (Some(ingest), None) => println!(
                "  {:<30} fetched {}, new {}, duplicates {}, rejected {}",
                outcome.name,
                outcome.fetched,
                ingest.inserted,
                ingest.duplicates,
                ingest.rejected.len()
            ),
            (None, None) => println!("  {:<30} fetched {}", outcome.name, outcome.fetched),
        }
        if let Some(path) = &outcome.raw_file {
            println!("  {:<30} saved to {}", "", path.display());
        }
    }
    match &report.recompute {
        Some(recompute) => print_recompute(recompute),
        None => println!("Nothing ingested; balances unchanged."),
    }
}

async fn run_import_command(
    service: &LedgerService,
    source: Source,
    input: Option<PathBuf>,
    no_recompute: bool,
) -> Result<()> {
    use crate::io::{read_records, FileFormat};
    use std::fs::File;
    use std::io::{stdin, Read};

    let (reader, format): (Box<dyn Read>, FileFormat) = match &input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            (Box::new(file), FileFormat::from_path(path))
        }
        None => (Box::new(stdin()), FileFormat::Json),
    };

    let records = read_records(source, format, reader)?;
    let report = service.ingest(records).await?;
    print_ingest(&report);

    if !no_recompute && report.inserted > 0 {
        let recompute = service.recompute_balances().await?;
        print_recompute(&recompute);
    }
    Ok(())
}

fn print_ingest(report: &IngestReport) {
    println!("Import complete");
    println!("  Received:   {}", report.received);
    println!("  Inserted:   {}", report.inserted);
    println!("  Duplicates: {}", report.duplicates);
    println!("  Rejected:   {}", report.rejected.len());

    if !report.rejected.is_empty() {
        println!("\nRejected records:");
        for rejected in report.rejected.iter().take(10) {
            println!(
                "  {} {}: {}",
                rejected.source,
                rejected.reference.as_deref().unwrap_or("(no id)"),
                rejected.reason
            );
        }
        if report.rejected.len() > 10 {
            println!("  ... and {} more", report.rejected.len() - 10);
        }
    }
}

fn print_recompute(report: &RecomputeReport) {
    for done in &report.updated {
        println!(
            "  {:<8} {:>5} day(s) updated, balance {}",
            done.organization,
            done.updated_dates,
            format_cents(done.final_balance)
        );
    }
    for failed in &report.failed {
        println!("  {:<8} FAILED: {}", failed.organization, failed.error);
    }
}

async fn run_transactions_command(service: &LedgerService, query: &TransactionQuery) -> Result<()> {
    let transactions = service.list_transactions(query).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<12} {:<5} {:<5} {:<10} {:<10} {:>14} DETAILS",
        "DATE", "ORG", "SRC", "OPERATION", "METHOD", "AMOUNT"
    );
    println!("{}", "-".repeat(90));
    for tx in &transactions {
        let details = tx
            .item
            .as_deref()
            .or(tx.counterparty.as_deref())
            .or(tx.purpose.as_deref())
            .unwrap_or("");
        println!(
            "{:<12} {:<5} {:<5} {:<10} {:<10} {:>14} {}",
            tx.date,
            tx.organization,
            tx.source,
            tx.operation.label(tx.source),
            tx.method.as_str(),
            format_cents(tx.signed_amount()),
            truncate(details, 30)
        );
    }
    Ok(())
}

async fn run_report_command(service: &LedgerService, cmd: ReportCommands) -> Result<()> {
    match cmd {
        ReportCommands::Daily { date, format } => {
            let date = parse_optional_date(date)?.unwrap_or_else(|| Utc::now().date_naive());
            let report = service.daily_report(date).await?;

            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("Daily report for {}\n", report.date);
            for org in &report.organizations {
                println!("{}", org.organization);
                println!(
                    "  Finance:  income {}  expense {}  net {}",
                    format_cents(org.finance.income),
                    format_cents(org.finance.expense),
                    format_cents(org.finance.net)
                );
                for (method, total) in &org.finance.by_method {
                    println!("    {:<10} {:>14}", method.as_str(), format_cents(*total));
                }
                println!(
                    "  Products: {} receipt line(s) {}, {} issue line(s) {}",
                    org.products.receipts,
                    format_cents(org.products.receipt_total),
                    org.products.issues,
                    format_cents(org.products.issue_total)
                );
                println!("  Closing balance: {}\n", format_cents(org.closing_balance));
            }
        }

        ReportCommands::Monthly { month, format } => {
            let month = month.unwrap_or_else(|| Utc::now().format("%Y-%m").to_string());
            let report = service.monthly_report(&month).await?;

            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("Monthly report for {} ({} to {})\n", report.month, report.from_date, report.to_date);
            if report.rows.is_empty() {
                println!("No transactions in this month.");
            } else {
                println!(
                    "{:<8} {:<12} {:>14} {:>14} {:>14} {:>6} {:>15}",
                    "ORG", "DATE", "INCOME", "EXPENSE", "NET", "COUNT", "BALANCE"
                );
                println!("{}", "-".repeat(89));
                for row in &report.rows {
                    println!(
                        "{:<8} {:<12} {:>14} {:>14} {:>14} {:>6} {:>15}",
                        row.organization,
                        row.date,
                        format_cents(row.income),
                        format_cents(row.expense),
                        format_cents(row.net),
                        row.count,
                        format_cents(row.balance)
                    );
                }
            }

            if !report.totals.is_empty() {
                println!("\nTotals:");
                for t in &report.totals {
                    println!(
                        "  {:<8} opening {}  net {}  closing {}",
                        t.organization,
                        format_cents(t.opening_balance),
                        format_cents(t.net),
                        format_cents(t.closing_balance)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter
                .export_transactions_csv(writer, &TransactionQuery::default())
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "balances" => {
            let count = exporter.export_balances_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported {} transactions and {} balances",
                    snapshot.transactions.len(),
                    snapshot.balances.len()
                );
            }
        }
        _ => {
            bail!(
                "Invalid export type '{}'. Valid types: transactions, balances, full",
                export_type
            );
        }
    }

    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking balances against the ledger...\n");

    let report = service.check_integrity().await?;

    println!("Transactions:  {}", report.transaction_count);
    println!("Balance rows:  {}", report.balance_count);
    println!(
        "Organizations: {}",
        report
            .organizations
            .iter()
            .map(|o| o.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    if report.is_healthy() {
        println!("Balances are consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        bail!("Balance integrity check failed; run `recompute` to rebuild");
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", date_str))
}

fn parse_optional_date(date_str: Option<String>) -> Result<Option<NaiveDate>> {
    date_str.map(|s| parse_date(&s)).transpose()
}

fn parse_organization(value: &str) -> Result<Organization> {
    Organization::from_str(value).with_context(|| {
        format!("Unknown organization '{}'. Valid: OOO, IP1, IP2, IP3", value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["ledgerbridge", "-d", "x.db", "recompute", "--from", "2024-01-02"]).unwrap();
        assert_eq!(cli.database, "x.db");
        assert!(matches!(cli.command, Commands::Recompute { from: Some(_) }));

        let cli = Cli::try_parse_from(["ledgerbridge", "import", "erp", "-i", "lines.csv"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Import { source: SourceArg::Erp, no_recompute: false, .. }
        ));

        assert!(Cli::try_parse_from(["ledgerbridge", "import", "cash"]).is_err());

        let cli = Cli::try_parse_from(["ledgerbridge", "sync", "--save-raw", "raw", "--bank-file", "b.csv"]).unwrap();
        match cli.command {
            Commands::Sync { save_raw, bank_file, erp_file, .. } => {
                assert_eq!(save_raw, Some(PathBuf::from("raw")));
                assert_eq!(bank_file, Some(PathBuf::from("b.csv")));
                assert_eq!(erp_file, None);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(
            parse_date("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_date("29.02.2024").is_err());
        assert_eq!(parse_organization("ип2").unwrap(), Organization::Ip2);
        assert!(parse_organization("ZAO").is_err());
        assert_eq!(truncate("Мука пшеничная высший сорт", 10), "Мука пш...");
    }
}
