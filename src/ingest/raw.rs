use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Source;

/// A bank feed entry as the bank sends it. `id`, `amount` and `inn` arrive
/// as strings or numbers depending on the endpoint, so they stay untyped
/// until normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub inn: Option<Value>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Body of the bank's transaction endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankPayload {
    #[serde(default)]
    pub transactions: Vec<BankRecord>,
}

/// Which kind of ERP document a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Goods received (incoming invoice)
    Receipt,
    /// Goods shipped (outgoing invoice)
    Issue,
    /// Goods moved between organizations; the sign says which way
    Movement,
    /// Goods written off
    WriteOff,
}

/// One goods line of an ERP document, flattened with the document header
/// and with catalog references already resolved to their descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpLine {
    pub document_ref: String,
    #[serde(default)]
    pub line_number: i64,
    pub document_kind: DocumentKind,
    #[serde(default = "default_posted")]
    pub posted: bool,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
}

fn default_posted() -> bool {
    true
}

/// Saved ERP lines, as written by `export` or prepared by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErpPayload {
    #[serde(default)]
    pub lines: Vec<ErpLine>,
}

/// A record from any source, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Bank(BankRecord),
    Erp(ErpLine),
}

impl RawRecord {
    pub fn source(&self) -> Source {
        match self {
            RawRecord::Bank(_) => Source::Bank,
            RawRecord::Erp(_) => Source::Erp,
        }
    }

    /// Best-effort identifier for logging, even for invalid records.
    pub fn reference(&self) -> Option<String> {
        match self {
            RawRecord::Bank(record) => record.id.as_ref().and_then(value_to_string),
            RawRecord::Erp(line) if !line.document_ref.trim().is_empty() => {
                Some(format!("{}_{}", line.document_ref.trim(), line.line_number))
            }
            RawRecord::Erp(_) => None,
        }
    }
}

/// Render a scalar JSON value as a trimmed, non-empty string.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bank_payload_accepts_mixed_types() {
        let payload: BankPayload = serde_json::from_value(json!({
            "transactions": [
                {"id": 17, "amount": "1500.50", "date": "2024-02-01", "inn": 1234567890},
                {"id": "abc", "amount": -20, "date": "01.02.2024", "payment_type": null}
            ]
        }))
        .unwrap();

        assert_eq!(payload.transactions.len(), 2);
        assert_eq!(
            RawRecord::Bank(payload.transactions[0].clone()).reference(),
            Some("17".to_string())
        );
        assert_eq!(payload.transactions[1].payment_type, None);
    }

    #[test]
    fn test_erp_line_defaults() {
        let line: ErpLine = serde_json::from_value(json!({
            "document_ref": "doc-1",
            "document_kind": "receipt"
        }))
        .unwrap();

        assert!(line.posted);
        assert_eq!(line.line_number, 0);
        assert_eq!(RawRecord::Erp(line).reference(), Some("doc-1_0".to_string()));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("  x ")), Some("x".to_string()));
        assert_eq!(value_to_string(&json!("")), None);
        assert_eq!(value_to_string(&json!(12.5)), Some("12.5".to_string()));
        assert_eq!(value_to_string(&json!(null)), None);
        assert_eq!(value_to_string(&json!(true)), None);
    }
}
