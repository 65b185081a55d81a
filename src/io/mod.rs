pub mod export;
pub mod import;

pub use export::{write_raw_json, Exporter, LedgerSnapshot};
pub use import::{read_csv, read_json, read_records, FileFormat};
