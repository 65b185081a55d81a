use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{
    parse_cents, Cents, Method, Operation, Organization, ParseCentsError, Source, Transaction,
};

use super::raw::{value_to_string, BankRecord, DocumentKind, ErpLine, RawRecord};

/// Why a raw record did not become a transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("amount is zero")]
    ZeroAmount,

    #[error("record has no id")]
    MissingId,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unparseable amount '{value}': {reason}")]
    UnparseableAmount {
        value: String,
        reason: ParseCentsError,
    },

    #[error("unparseable date '{0}'")]
    UnparseableDate(String),

    #[error("unknown organization '{0}'")]
    UnknownOrganization(String),

    #[error("document {0} is not posted")]
    UnpostedDocument(String),
}

/// Maps taxpayer ids (INN) on bank records to organizations.
#[derive(Debug, Clone)]
pub struct OrganizationDirectory {
    by_inn: HashMap<String, Organization>,
}

impl OrganizationDirectory {
    pub fn new(by_inn: HashMap<String, Organization>) -> Self {
        Self { by_inn }
    }

    /// Parse `inn=ORG` pairs separated by commas, e.g.
    /// `1234567890=OOO,9876543210=IP1`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut by_inn = HashMap::new();

        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (inn, org) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected inn=ORG, got '{}'", entry))?;
            let organization = Organization::from_str(org)
                .ok_or_else(|| format!("unknown organization '{}'", org.trim()))?;
            by_inn.insert(inn.trim().to_string(), organization);
        }

        if by_inn.is_empty() {
            return Err("no organizations configured".to_string());
        }
        Ok(Self { by_inn })
    }

    pub fn resolve(&self, inn: &str) -> Option<Organization> {
        self.by_inn.get(inn.trim()).copied()
    }
}

impl Default for OrganizationDirectory {
    fn default() -> Self {
        Self::new(HashMap::from([
            ("1234567890".to_string(), Organization::Ooo),
            ("9876543210".to_string(), Organization::Ip1),
            ("1122334455".to_string(), Organization::Ip2),
            ("5566778899".to_string(), Organization::Ip3),
        ]))
    }
}

/// Turns raw source records into canonical transactions.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    directory: OrganizationDirectory,
}

impl Normalizer {
    pub fn new(directory: OrganizationDirectory) -> Self {
        Self { directory }
    }

    pub fn normalize(&self, record: &RawRecord) -> Result<Transaction, Rejection> {
        match record {
            RawRecord::Bank(record) => self.normalize_bank(record),
            RawRecord::Erp(line) => normalize_erp(line),
        }
    }

    /// Operation comes from the sign of the amount; the stored amount is
    /// its absolute value.
    pub fn normalize_bank(&self, record: &BankRecord) -> Result<Transaction, Rejection> {
        let external_id = record
            .id
            .as_ref()
            .and_then(value_to_string)
            .ok_or(Rejection::MissingId)?;

        let amount = parse_amount(record.amount.as_ref())?;
        if amount == 0 {
            return Err(Rejection::ZeroAmount);
        }

        let date = parse_source_date(record.date.as_deref().ok_or(Rejection::MissingField("date"))?)?;

        let inn = record
            .inn
            .as_ref()
            .and_then(value_to_string)
            .ok_or(Rejection::MissingField("inn"))?;
        let organization = self
            .directory
            .resolve(&inn)
            .ok_or(Rejection::UnknownOrganization(inn))?;

        let method = normalize_method(record.payment_type.as_deref().unwrap_or(""));

        let mut tx = Transaction::new(
            organization,
            Source::Bank,
            Operation::from_sign(amount),
            method,
            amount.abs(),
            date,
            external_id,
        );
        if let Some(counterparty) = non_empty(record.counterparty.as_deref()) {
            tx = tx.with_counterparty(counterparty);
        }
        if let Some(purpose) = non_empty(record.purpose.as_deref()) {
            tx = tx.with_purpose(purpose);
        }
        Ok(tx)
    }
}

/// The document kind decides the direction; a negative line amount
/// (a correction) flips it.
pub fn normalize_erp(line: &ErpLine) -> Result<Transaction, Rejection> {
    let document_ref = line.document_ref.trim();
    if document_ref.is_empty() {
        return Err(Rejection::MissingId);
    }
    if !line.posted {
        return Err(Rejection::UnpostedDocument(document_ref.to_string()));
    }

    let org_label = non_empty(line.organization.as_deref()).ok_or(Rejection::MissingField("organization"))?;
    let organization = Organization::from_str(org_label)
        .ok_or_else(|| Rejection::UnknownOrganization(org_label.to_string()))?;

    let amount = parse_amount(line.amount.as_ref())?;
    if amount == 0 {
        return Err(Rejection::ZeroAmount);
    }

    let date = parse_source_date(line.date.as_deref().ok_or(Rejection::MissingField("date"))?)?;

    let (base_operation, method) = match line.document_kind {
        DocumentKind::Receipt => (Operation::Income, Method::Purchase),
        DocumentKind::Issue => (Operation::Expense, Method::Sale),
        DocumentKind::Movement => (Operation::Income, Method::Movement),
        DocumentKind::WriteOff => (Operation::Expense, Method::WriteOff),
    };
    let operation = match (base_operation, amount < 0) {
        (op, false) => op,
        (Operation::Income, true) => Operation::Expense,
        (Operation::Expense, true) => Operation::Income,
    };

    let mut tx = Transaction::new(
        organization,
        Source::Erp,
        operation,
        method,
        amount.abs(),
        date,
        format!("{}_{}", document_ref, line.line_number),
    );
    if let Some(item) = non_empty(line.item.as_deref()) {
        tx = tx.with_item(item);
    }
    Ok(tx)
}

/// Map free-text payment types onto the closed method vocabulary.
pub fn normalize_method(raw: &str) -> Method {
    let value = raw.trim().to_lowercase();
    if value.contains("qr") {
        Method::Qr
    } else if value.contains("налич") || value.contains("cash") {
        Method::Cash
    } else if value.contains("карт") || value.contains("card") || value.contains("mcc") {
        Method::Card
    } else {
        Method::Account
    }
}

/// Parse the date formats the sources emit into a calendar date.
pub fn parse_source_date(raw: &str) -> Result<NaiveDate, Rejection> {
    let value = raw.trim();

    for format in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime.date());
        }
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.date_naive());
    }

    Err(Rejection::UnparseableDate(value.to_string()))
}

fn parse_amount(value: Option<&Value>) -> Result<Cents, Rejection> {
    let value = value.ok_or(Rejection::MissingField("amount"))?;
    let text = value_to_string(value).ok_or(Rejection::MissingField("amount"))?;
    parse_cents(&text).map_err(|reason| Rejection::UnparseableAmount {
        value: text,
        reason,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
