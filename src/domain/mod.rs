mod balance;
mod ledger;
mod money;
mod organization;
mod transaction;

pub use balance::*;
pub use ledger::*;
pub use money::*;
pub use organization::*;
pub use transaction::*;
