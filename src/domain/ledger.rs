use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::{Cents, DailyBalance, Operation, Organization, Transaction};

/// Income and expense of one organization on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayTotals {
    pub date: NaiveDate,
    pub income: Cents,
    pub expense: Cents,
    pub count: i64,
}

impl DayTotals {
    pub fn net(&self) -> Cents {
        self.income - self.expense
    }
}

/// Group transactions by calendar date, ascending.
/// Input order does not matter; late-arriving rows land on their own date.
pub fn daily_totals(transactions: &[Transaction]) -> Result<Vec<DayTotals>, BalanceError> {
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();

    for tx in transactions {
        if tx.amount_cents < 0 {
            return Err(BalanceError::MalformedAmount {
                external_id: tx.external_id.clone(),
                amount: tx.amount_cents,
            });
        }

        let totals = days.entry(tx.date).or_insert(DayTotals {
            date: tx.date,
            income: 0,
            expense: 0,
            count: 0,
        });
        let slot = match tx.operation {
            Operation::Income => &mut totals.income,
            Operation::Expense => &mut totals.expense,
        };
        *slot = slot
            .checked_add(tx.amount_cents)
            .ok_or(BalanceError::Overflow {
                organization: tx.organization,
                date: tx.date,
            })?;
        totals.count += 1;
    }

    Ok(days.into_values().collect())
}

/// Compute the running balance of `organization` for every day that has a
/// transaction, starting from `seed` (the balance at the end of the day
/// before the first transaction). Transactions of other organizations are
/// ignored.
pub fn compute_running_balances(
    organization: Organization,
    seed: Cents,
    transactions: &[Transaction],
    computed_at: DateTime<Utc>,
) -> Result<Vec<DailyBalance>, BalanceError> {
    let own: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| tx.organization == organization)
        .cloned()
        .collect();

    let mut running = seed;
    let mut balances = Vec::new();

    for day in daily_totals(&own)? {
        running = running
            .checked_add(day.income)
            .and_then(|b| b.checked_sub(day.expense))
            .ok_or(BalanceError::Overflow {
                organization,
                date: day.date,
            })?;
        balances.push(DailyBalance {
            organization,
            date: day.date,
            balance: running,
            updated_at: computed_at,
        });
    }

    Ok(balances)
}

/// Compare stored balances of one organization against a fresh computation
/// over its whole history.
pub fn verify_balances(
    organization: Organization,
    transactions: &[Transaction],
    stored: &[DailyBalance],
) -> Vec<IntegrityIssue> {
    let expected = match compute_running_balances(organization, 0, transactions, Utc::now()) {
        Ok(expected) => expected,
        Err(e) => return vec![IntegrityIssue::Unrecomputable(organization, e.to_string())],
    };

    let stored_by_date: BTreeMap<NaiveDate, Cents> =
        stored.iter().map(|b| (b.date, b.balance)).collect();
    let mut issues = Vec::new();

    for row in &expected {
        match stored_by_date.get(&row.date) {
            None => issues.push(IntegrityIssue::MissingBalance {
                organization,
                date: row.date,
                expected: row.balance,
            }),
            Some(&actual) if actual != row.balance => {
                issues.push(IntegrityIssue::StaleBalance {
                    organization,
                    date: row.date,
                    stored: actual,
                    expected: row.balance,
                })
            }
            Some(_) => {}
        }
    }

    for date in stored_by_date.keys() {
        if !expected.iter().any(|row| row.date == *date) {
            issues.push(IntegrityIssue::OrphanBalance {
                organization,
                date: *date,
            });
        }
    }

    issues
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IntegrityIssue {
    MissingBalance {
        organization: Organization,
        date: NaiveDate,
        expected: Cents,
    },
    StaleBalance {
        organization: Organization,
        date: NaiveDate,
        stored: Cents,
        expected: Cents,
    },
    /// A stored row on a day without transactions
    OrphanBalance {
        organization: Organization,
        date: NaiveDate,
    },
    Unrecomputable(Organization, String),
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::MissingBalance {
                organization,
                date,
                expected,
            } => write!(
                f,
                "{}: no balance stored for {} (expected {} cents)",
                organization, date, expected
            ),
            IntegrityIssue::StaleBalance {
                organization,
                date,
                stored,
                expected,
            } => write!(
                f,
                "{}: balance for {} is {} cents, ledger says {} cents",
                organization, date, stored, expected
            ),
            IntegrityIssue::OrphanBalance { organization, date } => write!(
                f,
                "{}: balance stored for {} but no transactions on that day",
                organization, date
            ),
            IntegrityIssue::Unrecomputable(organization, reason) => {
                write!(f, "{}: cannot recompute balances: {}", organization, reason)
            }
        }
    }
}

/// Result of checking stored balances against the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub transaction_count: i64,
    pub balance_count: i64,
    pub organizations: Vec<Organization>,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    MalformedAmount { external_id: String, amount: Cents },
    Overflow {
        organization: Organization,
        date: NaiveDate,
    },
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::MalformedAmount {
                external_id,
                amount,
            } => write!(
                f,
                "Transaction {} has malformed amount {} cents",
                external_id, amount
            ),
            BalanceError::Overflow { organization, date } => write!(
                f,
                "Running balance of {} overflows on {}",
                organization, date
            ),
        }
    }
}

impl std::error::Error for BalanceError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Method, Source};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn tx(org: Organization, op: Operation, amount: Cents, date: NaiveDate) -> Transaction {
        Transaction::new(
            org,
            Source::Bank,
            op,
            Method::Account,
            amount,
            date,
            format!("{}-{}-{}", org, date, amount),
        )
    }

    fn balances_of(rows: &[DailyBalance]) -> Vec<(NaiveDate, Cents)> {
        rows.iter().map(|b| (b.date, b.balance)).collect()
    }

    #[test]
    fn test_running_balances_scenario() {
        let org = Organization::Ooo;
        let mut ledger = vec![
            tx(org, Operation::Income, 10000, day(2)),
            tx(org, Operation::Expense, 3000, day(3)),
            tx(org, Operation::Income, 2000, day(4)),
        ];

        let rows = compute_running_balances(org, 0, &ledger, Utc::now()).unwrap();
        assert_eq!(
            balances_of(&rows),
            vec![(day(2), 10000), (day(3), 7000), (day(4), 9000)]
        );

        // Backfilled day before everything else
        ledger.push(tx(org, Operation::Income, 5000, day(1)));
        let rows = compute_running_balances(org, 0, &ledger, Utc::now()).unwrap();
        assert_eq!(
            balances_of(&rows),
            vec![
                (day(1), 5000),
                (day(2), 15000),
                (day(3), 12000),
                (day(4), 14000)
            ]
        );
    }

    #[test]
    fn test_running_balances_use_seed_and_merge_same_day() {
        let org = Organization::Ip1;
        let ledger = vec![
            tx(org, Operation::Income, 500, day(10)),
            tx(org, Operation::Expense, 200, day(10)),
            tx(org, Operation::Expense, 100, day(11)),
        ];

        let rows = compute_running_balances(org, 1000, &ledger, Utc::now()).unwrap();
        assert_eq!(balances_of(&rows), vec![(day(10), 1300), (day(11), 1200)]);
    }

    #[test]
    fn test_running_balances_ignore_other_organizations() {
        let ledger = vec![
            tx(Organization::Ip1, Operation::Income, 500, day(1)),
            tx(Organization::Ip2, Operation::Income, 900, day(1)),
        ];

        let rows = compute_running_balances(Organization::Ip2, 0, &ledger, Utc::now()).unwrap();
        assert_eq!(balances_of(&rows), vec![(day(1), 900)]);
        assert!(
            compute_running_balances(Organization::Ip3, 0, &ledger, Utc::now())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_balance_invariant_holds_between_consecutive_days() {
        let org = Organization::Ip3;
        let ledger = vec![
            tx(org, Operation::Income, 12345, day(3)),
            tx(org, Operation::Expense, 999, day(1)),
            tx(org, Operation::Income, 1, day(7)),
            tx(org, Operation::Expense, 4000, day(7)),
        ];

        let rows = compute_running_balances(org, 0, &ledger, Utc::now()).unwrap();
        let totals = daily_totals(&ledger).unwrap();

        assert_eq!(rows[0].balance, totals[0].net());
        for i in 1..rows.len() {
            assert_eq!(rows[i].balance, rows[i - 1].balance + totals[i].net());
        }
    }

    #[test]
    fn test_malformed_amount_is_rejected() {
        let org = Organization::Ooo;
        let ledger = vec![tx(org, Operation::Income, -100, day(1))];

        let err = compute_running_balances(org, 0, &ledger, Utc::now()).unwrap_err();
        assert!(matches!(err, BalanceError::MalformedAmount { amount: -100, .. }));
    }

    #[test]
    fn test_overflow_is_reported() {
        let org = Organization::Ooo;
        let ledger = vec![tx(org, Operation::Income, 10, day(1))];

        let err = compute_running_balances(org, Cents::MAX, &ledger, Utc::now()).unwrap_err();
        assert!(matches!(err, BalanceError::Overflow { .. }));
    }

    #[test]
    fn test_verify_balances_detects_problems() {
        let org = Organization::Ip2;
        let ledger = vec![
            tx(org, Operation::Income, 1000, day(1)),
            tx(org, Operation::Expense, 300, day(2)),
        ];
        let stored = vec![
            DailyBalance::new(org, day(1), 1000),
            DailyBalance::new(org, day(5), 1),
        ];

        let issues = verify_balances(org, &ledger, &stored);
        assert_eq!(issues.len(), 2);
        assert!(issues.contains(&IntegrityIssue::MissingBalance {
            organization: org,
            date: day(2),
            expected: 700,
        }));
        assert!(issues.contains(&IntegrityIssue::OrphanBalance {
            organization: org,
            date: day(5),
        }));
    }

    #[test]
    fn test_verify_balances_clean() {
        let org = Organization::Ip2;
        let ledger = vec![tx(org, Operation::Income, 1000, day(1))];
        let stored = compute_running_balances(org, 0, &ledger, Utc::now()).unwrap();

        assert!(verify_balances(org, &ledger, &stored).is_empty());
    }
}
