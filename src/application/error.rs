use thiserror::Error;

use crate::domain::BalanceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("A balance recompute is already running")]
    RecomputeConflict,

    #[error("Balance computation failed: {0}")]
    Balance(#[from] BalanceError),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
