// 14.0 engine/core.rs: engine struct. owns the ledger view, the price source
// and the fee destination every validation compares against.

use super::config::EngineConfig;
use super::results::{EngineError, SubmitResult};
use crate::codec;
use crate::feeds::PriceSource;
use crate::ledger::{InMemoryLedger, Ledger, Script, Transaction};
use crate::types::Height;
use crate::validation::{ValidatedAction, ValidationError, Validator};
use tracing::info;

/** 14.1: main engine struct */
#[derive(Debug)]
pub struct Engine<L: Ledger, P: PriceSource> {
    pub(super) config: EngineConfig,
    pub(super) ledger: L,
    pub(super) prices: P,
    pub(super) fee_destination: Script,
}

impl<L: Ledger, P: PriceSource> Engine<L, P> {
    pub fn new(config: EngineConfig, ledger: L, prices: P, fee_destination: Script) -> Self {
        Self { config, ledger, prices, fee_destination }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn prices(&self) -> &P {
        &self.prices
    }

    pub fn prices_mut(&mut self) -> &mut P {
        &mut self.prices
    }

    pub fn fee_destination(&self) -> &Script {
        &self.fee_destination
    }

    pub fn tip(&self) -> Height {
        self.ledger.tip_height()
    }

    pub fn validator(&self) -> Validator<'_, L, P> {
        Validator::new(&self.config.protocol, &self.ledger, &self.prices, &self.fee_destination)
    }

    /// Runs `tx` through consensus validation without confirming it.
    pub fn validate(&self, tx: &Transaction) -> Result<ValidatedAction, ValidationError> {
        self.validator().validate(tx)
    }
}

impl<P: PriceSource> Engine<InMemoryLedger, P> {
    /// Validates contract transactions, then confirms at `height`. A
    /// transaction is a contract one when it carries a contract record or
    /// spends any contract output; everything else is confirmed as it is.
    pub fn submit(&mut self, tx: Transaction, height: Height) -> Result<SubmitResult, EngineError> {
        let tagged = tx.record_data().and_then(codec::action_tag).is_some();
        let spends_contract = tx.inputs.iter().any(|input| {
            self.ledger
                .load_output(&input.prevout)
                .is_some_and(|out| out.script.is_contract())
        });
        let action = if tagged || spends_contract { Some(self.validate(&tx)?) } else { None };
        let txid = self.ledger.confirm(tx, height)?;
        if let Some(action) = &action {
            info!(%txid, %height, ?action, "confirmed");
        }
        Ok(SubmitResult { txid, action })
    }
}
