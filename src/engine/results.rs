// 14.0.2: result types and errors for engine operations.

use crate::builder::BuildError;
use crate::evaluator::EvalError;
use crate::expression::CompileError;
use crate::ledger::LedgerError;
use crate::scanner::ScanError;
use crate::types::{PositionId, TxId};
use crate::validation::{ValidatedAction, ValidationError};

/// Which positions `list_positions` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Open,
    Closed,
}

impl ListFilter {
    pub fn admits(&self, is_open: bool) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Open => is_open,
            ListFilter::Closed => !is_open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub txid: TxId,
    /// `None` for plain transactions that carry no contract record.
    pub action: Option<ValidatedAction>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Position {0} not found")]
    PositionNotFound(PositionId),

    #[error("Position {0} is already closed")]
    PositionClosed(PositionId),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Price error: {0}")]
    Price(#[from] EvalError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
