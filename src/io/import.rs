use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

use crate::domain::Source;
use crate::ingest::{BankPayload, BankRecord, DocumentKind, ErpLine, ErpPayload, RawRecord};

/// File formats accepted for offline imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
}

impl FileFormat {
    /// Guess from the extension; anything but `.csv` is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => FileFormat::Csv,
            _ => FileFormat::Json,
        }
    }
}

/// Either the wrapped API body or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum BankFile {
    Wrapped(BankPayload),
    Bare(Vec<BankRecord>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErpFile {
    Wrapped(ErpPayload),
    Bare(Vec<ErpLine>),
}

/// Bank statement row: id,date,amount,inn,payment_type,counterparty,purpose
#[derive(Debug, Deserialize)]
struct BankCsvRow {
    id: Option<String>,
    date: Option<String>,
    amount: Option<String>,
    inn: Option<String>,
    payment_type: Option<String>,
    counterparty: Option<String>,
    purpose: Option<String>,
}

/// ERP line row: document_ref,line_number,document_kind,posted,organization,item,date,amount
#[derive(Debug, Deserialize)]
struct ErpCsvRow {
    document_ref: String,
    line_number: Option<i64>,
    document_kind: DocumentKind,
    posted: Option<bool>,
    organization: Option<String>,
    item: Option<String>,
    date: Option<String>,
    amount: Option<String>,
}

/// Read raw records of `source` from a JSON document.
pub fn read_json<R: Read>(source: Source, reader: R) -> Result<Vec<RawRecord>> {
    let records = match source {
        Source::Bank => {
            let file: BankFile =
                serde_json::from_reader(reader).context("Invalid bank JSON file")?;
            let records = match file {
                BankFile::Wrapped(payload) => payload.transactions,
                BankFile::Bare(records) => records,
            };
            records.into_iter().map(RawRecord::Bank).collect()
        }
        Source::Erp => {
            let file: ErpFile = serde_json::from_reader(reader).context("Invalid ERP JSON file")?;
            let lines = match file {
                ErpFile::Wrapped(payload) => payload.lines,
                ErpFile::Bare(lines) => lines,
            };
            lines.into_iter().map(RawRecord::Erp).collect()
        }
    };
    Ok(records)
}

/// Read raw records of `source` from CSV with a header row. A row that
/// does not fit the layout fails the whole file.
pub fn read_csv<R: Read>(source: Source, reader: R) -> Result<Vec<RawRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();

    match source {
        Source::Bank => {
            for (line_num, row) in csv_reader.deserialize::<BankCsvRow>().enumerate() {
                let row = row.with_context(|| format!("CSV parse error on line {}", line_num + 2))?;
                records.push(RawRecord::Bank(BankRecord {
                    id: row.id.map(Value::String),
                    amount: row.amount.map(Value::String),
                    date: row.date,
                    inn: row.inn.map(Value::String),
                    payment_type: row.payment_type,
                    counterparty: row.counterparty,
                    purpose: row.purpose,
                }));
            }
        }
        Source::Erp => {
            for (line_num, row) in csv_reader.deserialize::<ErpCsvRow>().enumerate() {
                let row = row.with_context(|| format!("CSV parse error on line {}", line_num + 2))?;
                records.push(RawRecord::Erp(ErpLine {
                    document_ref: row.document_ref,
                    line_number: row.line_number.unwrap_or(0),
                    document_kind: row.document_kind,
                    posted: row.posted.unwrap_or(true),
                    organization: row.organization,
                    item: row.item,
                    date: row.date,
                    amount: row.amount.map(Value::String),
                }));
            }
        }
    }

    Ok(records)
}

pub fn read_records<R: Read>(source: Source, format: FileFormat, reader: R) -> Result<Vec<RawRecord>> {
    match format {
        FileFormat::Json => read_json(source, reader),
        FileFormat::Csv => read_csv(source, reader),
    }
}
