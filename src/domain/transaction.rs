use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, Organization};

pub type TransactionId = Uuid;

/// The external system a transaction was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Bank transaction feed
    Bank,
    /// ERP document store
    Erp,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bank => "bank",
            Source::Erp => "erp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bank" => Some(Source::Bank),
            "erp" => Some(Source::Erp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a movement. The stored amount is always non-negative;
/// the sign lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Income,
    Expense,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Income => "income",
            Operation::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(Operation::Income),
            "expense" => Some(Operation::Expense),
            _ => None,
        }
    }

    /// The term each source uses for this direction.
    pub fn label(&self, source: Source) -> &'static str {
        match (self, source) {
            (Operation::Income, Source::Bank) => "deposit",
            (Operation::Expense, Source::Bank) => "withdrawal",
            (Operation::Income, Source::Erp) => "receipt",
            (Operation::Expense, Source::Erp) => "issue",
        }
    }

    pub fn from_sign(amount: Cents) -> Self {
        if amount < 0 {
            Operation::Expense
        } else {
            Operation::Income
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the money or goods moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Bank account transfer
    Account,
    Card,
    Cash,
    Qr,
    /// Goods received from a supplier
    Purchase,
    /// Goods moved between warehouses
    Movement,
    /// Goods sold
    Sale,
    WriteOff,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Account => "account",
            Method::Card => "card",
            Method::Cash => "cash",
            Method::Qr => "qr",
            Method::Purchase => "purchase",
            Method::Movement => "movement",
            Method::Sale => "sale",
            Method::WriteOff => "write_off",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "account" => Some(Method::Account),
            "card" => Some(Method::Card),
            "cash" => Some(Method::Cash),
            "qr" => Some(Method::Qr),
            "purchase" => Some(Method::Purchase),
            "movement" => Some(Method::Movement),
            "sale" => Some(Method::Sale),
            "write_off" => Some(Method::WriteOff),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single financial movement for one organization.
/// Transactions are immutable once stored; the `(source, external_id)` pair
/// is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub organization: Organization,
    pub source: Source,
    pub operation: Operation,
    pub method: Method,
    /// Amount in cents (never negative)
    pub amount_cents: Cents,
    /// Calendar date the movement happened on
    pub date: NaiveDate,
    /// Identifier in the source system
    pub external_id: String,
    pub counterparty: Option<String>,
    /// Payment purpose text from the bank
    pub purpose: Option<String>,
    /// Product name from the ERP
    pub item: Option<String>,
    /// When we stored this transaction
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        organization: Organization,
        source: Source,
        operation: Operation,
        method: Method,
        amount_cents: Cents,
        date: NaiveDate,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization,
            source,
            operation,
            method,
            amount_cents,
            date,
            external_id: external_id.into(),
            counterparty: None,
            purpose: None,
            item: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    /// Amount with the operation's sign applied.
    pub fn signed_amount(&self) -> Cents {
        match self.operation {
            Operation::Income => self.amount_cents,
            Operation::Expense => -self.amount_cents,
        }
    }
}
