// Application layer - use cases and orchestration.
// The CLI and the tests talk to LedgerService only; storage and the
// normalizer stay behind it.

pub mod error;
pub mod recompute;
pub mod reporting;
pub mod service;
pub mod sync;

pub use error::*;
pub use recompute::{OrganizationFailure, OrganizationRecompute, RecomputeReport};
pub use reporting::*;
pub use service::*;
pub use sync::{SourceOutcome, SyncOptions, SyncReport, SyncStatus};
