pub mod community;
pub mod ledger;
