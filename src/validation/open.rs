// 13.1: open action. outputs are baton, marker, escrow, legacy marker and the
// fee, optionally followed by change, then the record.

use super::{contract_outputs_total, payload_outputs, shape, ValidationError, Validator};
use crate::codec::OpenRecord;
use crate::feeds::PriceSource;
use crate::ledger::{Ledger, Script, Transaction};
use crate::types::{Amount, Leverage};

impl<'a, L: Ledger + ?Sized, P: PriceSource + ?Sized> Validator<'a, L, P> {
    pub(super) fn validate_open(&self, tx: &Transaction, record: &OpenRecord) -> Result<(), ValidationError> {
        let outputs = payload_outputs(tx);
        if !(5..=6).contains(&outputs.len()) {
            return Err(shape(format!("open has {} outputs, expected 5 or 6", outputs.len())));
        }

        if Leverage::new(record.leverage.value(), self.params.max_leverage).is_none() {
            return Err(ValidationError::InvalidLeverage(record.leverage.value()));
        }
        if record.amount.value() <= 0 {
            return Err(shape("open amount must be positive"));
        }
        if !record.first_price.is_set() {
            return Err(shape("open record has no first price"));
        }

        if outputs[0].script != Script::ContractToKey(record.owner) {
            return Err(shape("vout0 is not the owner's baton"));
        }
        if outputs[1].script != Script::ContractGlobal {
            return Err(shape("vout1 is not the position marker"));
        }
        if outputs[2].script != Script::ContractGlobal {
            return Err(shape("vout2 is not contract escrow"));
        }
        if outputs[3].script != Script::GlobalMarker {
            return Err(shape("vout3 is not the global marker"));
        }
        if &outputs[4].script != self.fee_destination {
            return Err(shape("fee paid to the wrong destination"));
        }

        let position_size = Amount(self.params.position_size(record.amount.value()));
        if outputs[2].value != position_size {
            return Err(shape(format!(
                "escrow {} does not match position size {}",
                outputs[2].value, position_size
            )));
        }
        let fee = record
            .amount
            .checked_sub(position_size)
            .ok_or(ValidationError::ArithmeticOverflow)?;
        if outputs[4].value != fee {
            return Err(shape(format!("fee {} does not match {}", outputs[4].value, fee)));
        }

        // contract outputs must be funded by plain inputs the owner signed,
        // and an open never spends contract outputs
        let mut owner_inputs = Amount::zero();
        for input in &tx.inputs {
            let prev = self.prevout(input)?;
            if prev.script.is_contract() {
                return Err(shape(format!("open spends contract output {}", input.prevout)));
            }
            if input.signer == Some(record.owner) {
                owner_inputs = owner_inputs
                    .checked_add(prev.value)
                    .ok_or(ValidationError::ArithmeticOverflow)?;
            }
        }
        let contract_outputs = contract_outputs_total(outputs)?;
        if owner_inputs < contract_outputs {
            return Err(ValidationError::Unauthorized(format!(
                "owner signed inputs {} below contract outputs {}",
                owner_inputs, contract_outputs
            )));
        }

        Ok(())
    }
}
