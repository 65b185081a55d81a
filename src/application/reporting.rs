use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{balance_as_of, Cents, DailyBalance, Method, Operation, Organization, Source};
use crate::storage::DayAggregate;

use super::BalanceEntry;

/// Money movement on the bank side of one organization for one day.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinanceSummary {
    pub income: Cents,
    pub expense: Cents,
    pub net: Cents,
    /// Turnover (income plus expense) per payment method
    pub by_method: BTreeMap<Method, Cents>,
}

/// Goods documents on the ERP side of one organization for one day.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductSummary {
    pub receipts: i64,
    pub issues: i64,
    pub receipt_total: Cents,
    pub issue_total: Cents,
    pub by_method: BTreeMap<Method, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationDay {
    pub organization: Organization,
    pub finance: FinanceSummary,
    pub products: ProductSummary,
    pub closing_balance: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub organizations: Vec<OrganizationDay>,
}

/// One organization on one day of a monthly report.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyRow {
    pub organization: Organization,
    pub date: NaiveDate,
    pub income: Cents,
    pub expense: Cents,
    pub net: Cents,
    pub count: i64,
    pub balance: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyTotals {
    pub organization: Organization,
    pub income: Cents,
    pub expense: Cents,
    pub net: Cents,
    pub count: i64,
    pub opening_balance: Cents,
    pub closing_balance: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub month: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub rows: Vec<MonthlyRow>,
    pub totals: Vec<MonthlyTotals>,
}

/// Every known organization appears, even without activity that day.
pub fn build_daily_report(
    date: NaiveDate,
    aggregates: &[DayAggregate],
    closing: &[BalanceEntry],
) -> DailyReport {
    let organizations = Organization::ALL
        .iter()
        .map(|&organization| {
            let mut finance = FinanceSummary::default();
            let mut products = ProductSummary::default();

            for agg in aggregates
                .iter()
                .filter(|a| a.organization == organization && a.date == date)
            {
                match agg.source {
                    Source::Bank => {
                        match agg.operation {
                            Operation::Income => finance.income += agg.total,
                            Operation::Expense => finance.expense += agg.total,
                        }
                        *finance.by_method.entry(agg.method).or_insert(0) += agg.total;
                    }
                    Source::Erp => {
                        match agg.operation {
                            Operation::Income => {
                                products.receipts += agg.count;
                                products.receipt_total += agg.total;
                            }
                            Operation::Expense => {
                                products.issues += agg.count;
                                products.issue_total += agg.total;
                            }
                        }
                        *products.by_method.entry(agg.method).or_insert(0) += agg.count;
                    }
                }
            }
            finance.net = finance.income - finance.expense;

            let closing_balance = closing
                .iter()
                .find(|b| b.organization == organization)
                .map(|b| b.balance)
                .unwrap_or(0);

            OrganizationDay {
                organization,
                finance,
                products,
                closing_balance,
            }
        })
        .collect();

    DailyReport {
        date,
        organizations,
    }
}

/// Rows only for days with transactions; `balances` must be sorted by
/// organization then date, as the repository returns them.
pub fn build_monthly_report(
    month: &str,
    from: NaiveDate,
    to: NaiveDate,
    aggregates: &[DayAggregate],
    balances: &[DailyBalance],
) -> MonthlyReport {
    let mut days: BTreeMap<(Organization, NaiveDate), (Cents, Cents, i64)> = BTreeMap::new();
    for agg in aggregates.iter().filter(|a| a.date >= from && a.date <= to) {
        let entry = days.entry((agg.organization, agg.date)).or_insert((0, 0, 0));
        match agg.operation {
            Operation::Income => entry.0 += agg.total,
            Operation::Expense => entry.1 += agg.total,
        }
        entry.2 += agg.count;
    }

    let by_org: BTreeMap<Organization, Vec<DailyBalance>> =
        balances.iter().fold(BTreeMap::new(), |mut acc, b| {
            acc.entry(b.organization).or_insert_with(Vec::new).push(b.clone());
            acc
        });
    let balance_on = |org: Organization, date: NaiveDate| -> Cents {
        by_org
            .get(&org)
            .map(|rows| balance_as_of(rows, date))
            .unwrap_or(0)
    };

    let rows: Vec<MonthlyRow> = days
        .into_iter()
        .map(|((organization, date), (income, expense, count))| MonthlyRow {
            organization,
            date,
            income,
            expense,
            net: income - expense,
            count,
            balance: balance_on(organization, date),
        })
        .collect();

    let totals = Organization::ALL
        .iter()
        .filter_map(|&organization| {
            let own: Vec<&MonthlyRow> = rows.iter().filter(|r| r.organization == organization).collect();
            let opening_balance = from.pred_opt().map(|d| balance_on(organization, d)).unwrap_or(0);
            let closing_balance = balance_on(organization, to);
            if own.is_empty() && opening_balance == 0 && closing_balance == 0 {
                return None;
            }
            let income: Cents = own.iter().map(|r| r.income).sum();
            let expense: Cents = own.iter().map(|r| r.expense).sum();
            Some(MonthlyTotals {
                organization,
                income,
                expense,
                net: income - expense,
                count: own.iter().map(|r| r.count).sum(),
                opening_balance,
                closing_balance,
            })
        })
        .collect();

    MonthlyReport {
        month: month.to_string(),
        from_date: from,
        to_date: to,
        rows,
        totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn agg(
        organization: Organization,
        date: NaiveDate,
        source: Source,
        operation: Operation,
        method: Method,
        count: i64,
        total: Cents,
    ) -> DayAggregate {
        DayAggregate {
            organization,
            date,
            source,
            operation,
            method,
            count,
            total,
        }
    }

    #[test]
    fn test_daily_report_splits_sources() {
        let aggregates = vec![
            agg(Organization::Ooo, day(5), Source::Bank, Operation::Income, Method::Card, 2, 3000),
            agg(Organization::Ooo, day(5), Source::Bank, Operation::Expense, Method::Account, 1, 500),
            agg(Organization::Ooo, day(5), Source::Erp, Operation::Income, Method::Purchase, 3, 900),
            agg(Organization::Ooo, day(5), Source::Erp, Operation::Expense, Method::Sale, 1, 100),
        ];
        let closing = vec![BalanceEntry {
            organization: Organization::Ooo,
            date: day(5),
            balance: 12345,
            as_of: Some(day(5)),
        }];

        let report = build_daily_report(day(5), &aggregates, &closing);
        assert_eq!(report.organizations.len(), Organization::ALL.len());

        let ooo = &report.organizations[0];
        assert_eq!(ooo.organization, Organization::Ooo);
        assert_eq!(ooo.finance.income, 3000);
        assert_eq!(ooo.finance.expense, 500);
        assert_eq!(ooo.finance.net, 2500);
        assert_eq!(ooo.finance.by_method.get(&Method::Card), Some(&3000));
        assert_eq!(ooo.products.receipts, 3);
        assert_eq!(ooo.products.issues, 1);
        assert_eq!(ooo.products.by_method.get(&Method::Sale), Some(&1));
        assert_eq!(ooo.closing_balance, 12345);

        let quiet = &report.organizations[1];
        assert_eq!(quiet.finance.net, 0);
        assert_eq!(quiet.closing_balance, 0);
    }

    #[test]
    fn test_monthly_report_rows_and_totals() {
        let aggregates = vec![
            agg(Organization::Ip1, day(2), Source::Bank, Operation::Income, Method::Account, 1, 1000),
            agg(Organization::Ip1, day(2), Source::Erp, Operation::Expense, Method::Sale, 2, 200),
            agg(Organization::Ip1, day(9), Source::Bank, Operation::Expense, Method::Cash, 1, 300),
        ];
        let balances = vec![
            DailyBalance::new(Organization::Ip1, NaiveDate::from_ymd_opt(2024, 2, 20).unwrap(), 50),
            DailyBalance::new(Organization::Ip1, day(2), 850),
            DailyBalance::new(Organization::Ip1, day(9), 550),
        ];

        let report = build_monthly_report("2024-03", day(1), day(31), &aggregates, &balances);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].net, 800);
        assert_eq!(report.rows[0].count, 3);
        assert_eq!(report.rows[0].balance, 850);
        assert_eq!(report.rows[1].balance, 550);

        assert_eq!(report.totals.len(), 1);
        let totals = &report.totals[0];
        assert_eq!(totals.opening_balance, 50);
        assert_eq!(totals.closing_balance, 550);
        assert_eq!(totals.net, 500);
        assert_eq!(totals.opening_balance + totals.net, totals.closing_balance);
    }
}
