pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod ingest;
pub mod io;
pub mod logging;
pub mod sources;
pub mod storage;

pub use application::LedgerService;
pub use domain::*;
pub use storage::Repository;
