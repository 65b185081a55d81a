use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{compute_running_balances, Cents, Organization};
use crate::storage::Repository;

use super::{AppError, LedgerService};

/// Balances rewritten for one organization.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationRecompute {
    pub organization: Organization,
    pub updated_dates: usize,
    pub final_balance: Cents,
}

/// An organization whose balances were left untouched by a run.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationFailure {
    /// As stored in the ledger; may not be a known organization
    pub organization: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecomputeReport {
    pub updated: Vec<OrganizationRecompute>,
    pub failed: Vec<OrganizationFailure>,
}

impl RecomputeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn for_organization(&self, organization: Organization) -> Option<&OrganizationRecompute> {
        self.updated.iter().find(|r| r.organization == organization)
    }
}

impl LedgerService {
    /// Rebuild the daily balances of every organization from its first
    /// transaction on. Fails with `RecomputeConflict` if a run is already going.
    pub async fn recompute_balances(&self) -> Result<RecomputeReport, AppError> {
        let _guard = self
            .recompute_lock
            .try_lock()
            .map_err(|_| AppError::RecomputeConflict)?;
        self.recompute_locked(None).await
    }

    /// Rebuild balances for days on or after `from` only, seeding each
    /// organization with its stored balance from the day before.
    pub async fn recompute_balances_from(&self, from: NaiveDate) -> Result<RecomputeReport, AppError> {
        let _guard = self
            .recompute_lock
            .try_lock()
            .map_err(|_| AppError::RecomputeConflict)?;
        self.recompute_locked(Some(from)).await
    }

    /// Full recompute that waits for a running one to finish instead of
    /// failing. Sync runs this after ingesting its batches.
    pub(crate) async fn recompute_queued(&self) -> Result<RecomputeReport, AppError> {
        let _guard = self.recompute_lock.lock().await;
        self.recompute_locked(None).await
    }

    async fn recompute_locked(&self, from: Option<NaiveDate>) -> Result<RecomputeReport, AppError> {
        let organizations = self.repo.list_ledger_organizations().await?;
        let computed_at = Utc::now();
        let mut report = RecomputeReport::default();

        for stored in organizations {
            let Some(organization) = Organization::from_str(&stored) else {
                warn!(organization = %stored, "ledger holds an unknown organization");
                report.failed.push(OrganizationFailure {
                    error: format!("unknown organization '{}'", stored),
                    organization: stored,
                });
                continue;
            };

            match self.recompute_organization(organization, from, computed_at).await {
                Ok(done) => {
                    info!(
                        organization = %organization,
                        days = done.updated_dates,
                        balance = done.final_balance,
                        "balances recomputed"
                    );
                    report.updated.push(done);
                }
                Err(e) => {
                    warn!(organization = %organization, error = %e, "recompute failed, balances kept");
                    report.failed.push(OrganizationFailure {
                        organization: stored,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Reads and writes of one organization share a database transaction,
    /// so a failure leaves its previous balances in place.
    async fn recompute_organization(
        &self,
        organization: Organization,
        from: Option<NaiveDate>,
        computed_at: DateTime<Utc>,
    ) -> Result<OrganizationRecompute, AppError> {
        let mut tx = self.repo.begin().await?;

        let transactions = Repository::transactions_for_recompute(&mut *tx, organization, from).await?;
        let Some(first_date) = transactions.first().map(|t| t.date) else {
            let final_balance = Repository::latest_balance(&mut *tx, organization)
                .await?
                .unwrap_or(0);
            return Ok(OrganizationRecompute {
                organization,
                updated_dates: 0,
                final_balance,
            });
        };

        let seed = Repository::latest_balance_before(&mut *tx, organization, first_date)
            .await?
            .unwrap_or(0);

        let balances = compute_running_balances(organization, seed, &transactions, computed_at)?;
        for balance in &balances {
            Repository::upsert_balance_on(&mut *tx, balance).await?;
        }

        tx.commit().await.context("Failed to commit balances")?;

        Ok(OrganizationRecompute {
            organization,
            updated_dates: balances.len(),
            final_balance: balances.last().map(|b| b.balance).unwrap_or(seed),
        })
    }
}
