//! Ledger, cashback and retry-queue records

mod cashback;
mod ledger;
mod operation;

pub use cashback::*;
pub use ledger::*;
pub use operation::*;
