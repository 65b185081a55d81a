mod repository;

pub use repository::*;

/// SQL migration for the ledger and balance tables
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for per-source sync cursors
pub const MIGRATION_002_SYNC_CURSORS: &str = include_str!("migrations/002_sync_cursors.sql");
