pub mod analytics;
pub mod config;
pub mod distribution;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod parser;
pub mod progress;
pub mod store;
pub mod sweeper;
pub mod wallet;

pub use error::{EngineError, EngineResult};
pub use store::{LedgerStore, MdbxLedgerStore};
