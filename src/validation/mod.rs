// 13.0: consensus validation of contract-tagged transactions.
// every node runs this on every candidate; it reads the ledger and the price
// source and never writes. any failure rejects the whole transaction.
//
// 13.1 open.rs: open actions, checked standalone
// 13.2 add_funding.rs: add funding, walking back to the open
// 13.3 close.rs: cashout and rekt closes, re-running the scan
// 13.4 chain.rs: baton walk that rebuilds a position's increments

mod add_funding;
mod chain;
mod close;
mod open;

pub use chain::{funding_chain, FundingChain};

use crate::codec::{self, ContractRecord, DecodeError};
use crate::config::ProtocolParams;
use crate::feeds::PriceSource;
use crate::ledger::{Ledger, LedgerEntry, Script, Transaction, TxIn, TxOut};
use crate::position::CloseKind;
use crate::scanner::ScanError;
use crate::types::{Amount, Height, OutPoint, PositionId, TxId};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Output index of the baton in open and add funding transactions.
pub const BATON_VOUT: u32 = 0;
/// Output index of the position marker in the open transaction.
pub const MARKER_VOUT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transaction carries no contract record")]
    NotContract,

    #[error("record decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("leverage {0} is zero or beyond the maximum")]
    InvalidLeverage(i16),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("price unavailable: {0}")]
    FeedUnavailable(String),

    #[error("close at height {height} is not eligible yet (tip {tip})")]
    NotYetEligible { height: Height, tip: Height },

    #[error("position marker already spent by {spender}")]
    AlreadyClosed { spender: TxId },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("position is still solvent")]
    StillSolvent,

    #[error("position is already rekt")]
    AlreadyRekt,

    #[error("transaction {0} not found")]
    MissingTransaction(TxId),

    #[error("output {0} not found")]
    MissingOutput(OutPoint),
}

impl From<ScanError> for ValidationError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Overflow { .. } => ValidationError::ArithmeticOverflow,
            ScanError::NoIncrements => shape("position has no funding increments"),
            ScanError::NothingToScan { tip, first_open } => ValidationError::NotYetEligible {
                height: first_open,
                tip,
            },
            other => ValidationError::FeedUnavailable(other.to_string()),
        }
    }
}

pub(crate) fn shape(msg: impl Into<String>) -> ValidationError {
    ValidationError::ShapeMismatch(msg.into())
}

/// What a transaction was accepted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedAction {
    Open {
        position_id: PositionId,
        position_size: Amount,
    },
    AddFunding {
        position_id: PositionId,
        amount: Amount,
    },
    Close {
        position_id: PositionId,
        kind: CloseKind,
        payout: Amount,
        scanned_to: Height,
    },
}

/// Everything validation reads. Borrowed, never mutated.
pub struct Validator<'a, L: Ledger + ?Sized, P: PriceSource + ?Sized> {
    params: &'a ProtocolParams,
    ledger: &'a L,
    prices: &'a P,
    fee_destination: &'a Script,
}

impl<'a, L: Ledger + ?Sized, P: PriceSource + ?Sized> Validator<'a, L, P> {
    pub fn new(params: &'a ProtocolParams, ledger: &'a L, prices: &'a P, fee_destination: &'a Script) -> Self {
        Self { params, ledger, prices, fee_destination }
    }

    /// Accepts or rejects `tx`. Rejections are logged at warn.
    pub fn validate(&self, tx: &Transaction) -> Result<ValidatedAction, ValidationError> {
        let txid = tx.txid();
        let result = self.dispatch(tx);
        match &result {
            Ok(action) => debug!(%txid, ?action, "contract transaction accepted"),
            Err(err) => warn!(%txid, error = %err, "contract transaction rejected"),
        }
        result
    }

    fn dispatch(&self, tx: &Transaction) -> Result<ValidatedAction, ValidationError> {
        let data = tx.record_data().ok_or(ValidationError::NotContract)?;
        let mut seen = BTreeSet::new();
        if let Some(input) = tx.inputs.iter().find(|input| !seen.insert(input.prevout)) {
            return Err(shape(format!("input {} is spent twice", input.prevout)));
        }
        if codec::action_tag(data).is_none() {
            return Err(ValidationError::NotContract);
        }
        match ContractRecord::decode(data, self.params)? {
            ContractRecord::Open(record) => {
                self.validate_open(tx, &record)?;
                Ok(ValidatedAction::Open {
                    position_id: tx.txid(),
                    position_size: Amount(self.params.position_size(record.amount.value())),
                })
            }
            ContractRecord::AddFunding(record) => {
                self.validate_add_funding(tx, &record)?;
                Ok(ValidatedAction::AddFunding { position_id: record.position_id, amount: record.amount })
            }
            ContractRecord::Close(record) => self.validate_close(tx, &record),
        }
    }

    fn load(&self, id: &TxId) -> Result<LedgerEntry, ValidationError> {
        self.ledger.load_transaction(id).ok_or(ValidationError::MissingTransaction(*id))
    }

    fn prevout(&self, input: &TxIn) -> Result<TxOut, ValidationError> {
        self.ledger
            .load_output(&input.prevout)
            .ok_or(ValidationError::MissingOutput(input.prevout))
    }

    /// First input spending a contract output, with the transaction it spends.
    fn first_contract_input<'t>(
        &self,
        tx: &'t Transaction,
    ) -> Result<(&'t TxIn, LedgerEntry), ValidationError> {
        for input in &tx.inputs {
            if self.prevout(input)?.script.is_contract() {
                let entry = self.load(&input.prevout.txid)?;
                return Ok((input, entry));
            }
        }
        Err(shape("no contract input"))
    }

    fn contract_inputs_total(&self, tx: &Transaction) -> Result<Amount, ValidationError> {
        let mut total = Amount::zero();
        for input in &tx.inputs {
            let prev = self.prevout(input)?;
            if prev.script.is_contract() {
                total = total.checked_add(prev.value).ok_or(ValidationError::ArithmeticOverflow)?;
            }
        }
        Ok(total)
    }

    /// True when `point` is the marker output of an open transaction.
    fn is_open_marker(&self, point: &OutPoint) -> Result<bool, ValidationError> {
        if point.vout != MARKER_VOUT {
            return Ok(false);
        }
        let entry = self.load(&point.txid)?;
        Ok(entry
            .tx
            .record_data()
            .is_some_and(|data| codec::action_tag(data) == Some(codec::TAG_OPEN)))
    }

    /// Rejects once anything has spent the position marker.
    fn ensure_marker_unspent(&self, position_id: &PositionId) -> Result<(), ValidationError> {
        match self.ledger.spend_locator(&OutPoint::new(*position_id, MARKER_VOUT)) {
            Some(spend) => Err(ValidationError::AlreadyClosed { spender: spend.txid }),
            None => Ok(()),
        }
    }
}

/// Outputs before the trailing data record.
pub(crate) fn payload_outputs(tx: &Transaction) -> &[TxOut] {
    match tx.record_data() {
        Some(_) => &tx.outputs[..tx.outputs.len() - 1],
        None => &tx.outputs,
    }
}

pub(crate) fn contract_outputs_total(outputs: &[TxOut]) -> Result<Amount, ValidationError> {
    outputs
        .iter()
        .filter(|out| out.script.is_contract())
        .try_fold(Amount::zero(), |acc, out| acc.checked_add(out.value))
        .ok_or(ValidationError::ArithmeticOverflow)
}
