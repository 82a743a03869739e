// 13.2: add funding. the new transaction and every add funding before it must
// be well formed, and the walk must end at the position's open transaction.

use super::{payload_outputs, shape, ValidationError, Validator, BATON_VOUT};
use crate::codec::{AddFundingRecord, ContractRecord};
use crate::feeds::PriceSource;
use crate::ledger::{Ledger, Script, Transaction};

impl<'a, L: Ledger + ?Sized, P: PriceSource + ?Sized> Validator<'a, L, P> {
    pub(super) fn validate_add_funding(
        &self,
        tx: &Transaction,
        record: &AddFundingRecord,
    ) -> Result<(), ValidationError> {
        self.ensure_marker_unspent(&record.position_id)?;

        let mut current = tx.clone();
        let mut current_record = record.clone();
        loop {
            self.check_add_funding_shape(&current, &current_record)?;

            let (input, prev) = self.first_contract_input(&current)?;
            if input.prevout.vout != BATON_VOUT {
                return Err(shape(format!("add funding spends vout {} instead of the baton", input.prevout.vout)));
            }
            let data = prev.tx.record_data().ok_or(ValidationError::NotContract)?;
            match ContractRecord::decode(data, self.params)? {
                ContractRecord::Open(open) => {
                    if input.prevout.txid != current_record.position_id {
                        return Err(shape("add funding names a different position"));
                    }
                    return self.validate_open(&prev.tx, &open);
                }
                ContractRecord::AddFunding(prev_record) => {
                    if prev_record.position_id != current_record.position_id {
                        return Err(shape("previous add funding belongs to another position"));
                    }
                    current = prev.tx;
                    current_record = prev_record;
                }
                ContractRecord::Close(_) => return Err(shape("add funding cannot follow a close")),
            }
        }
    }

    fn check_add_funding_shape(&self, tx: &Transaction, record: &AddFundingRecord) -> Result<(), ValidationError> {
        let outputs = payload_outputs(tx);
        if !(2..=3).contains(&outputs.len()) {
            return Err(shape(format!("add funding has {} outputs, expected 2 or 3", outputs.len())));
        }
        if record.amount.value() <= 0 {
            return Err(shape("add funding amount must be positive"));
        }
        if outputs[0].script != Script::ContractToKey(record.contributor) {
            return Err(shape("vout0 is not the contributor's baton"));
        }
        if outputs[1].script != Script::ContractGlobal || outputs[1].value != record.amount {
            return Err(shape(format!("vout1 must escrow {} to the contract", record.amount)));
        }

        let mut contract_inputs = 0;
        for input in &tx.inputs {
            if self.prevout(input)?.script.is_contract() {
                contract_inputs += 1;
            }
        }
        if contract_inputs != 1 {
            return Err(shape(format!("add funding has {} contract inputs, expected 1", contract_inputs)));
        }
        Ok(())
    }
}
