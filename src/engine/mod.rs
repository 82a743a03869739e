// 14.0: position book over a ledger and a price source. loads positions by
// walking their batons, reports on them, lists them, and runs candidate
// transactions through validation before they are confirmed.

mod actions;
mod config;
mod core;
mod positions;
mod results;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{EngineError, ListFilter, SubmitResult};
