mod normalize;
mod raw;

pub use normalize::*;
pub use raw::{BankPayload, BankRecord, DocumentKind, ErpLine, ErpPayload, RawRecord};
