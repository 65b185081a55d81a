use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Organization};

/// Running balance of one organization at the end of one day.
///
/// Rows only exist for days that have at least one transaction; a query for
/// any other day carries the last known balance forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBalance {
    pub organization: Organization,
    pub date: NaiveDate,
    pub balance: Cents,
    /// When the recalculator last wrote this row
    pub updated_at: DateTime<Utc>,
}

impl DailyBalance {
    pub fn new(organization: Organization, date: NaiveDate, balance: Cents) -> Self {
        Self {
            organization,
            date,
            balance,
            updated_at: Utc::now(),
        }
    }
}

/// Resolve the balance at the end of `date` from rows sorted by date:
/// the latest row on or before `date`, or 0 before the first row.
pub fn balance_as_of(balances: &[DailyBalance], date: NaiveDate) -> Cents {
    let idx = balances.partition_point(|b| b.date <= date);
    if idx == 0 { 0 } else { balances[idx - 1].balance }
}
