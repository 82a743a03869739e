// 13.3: closing a position. the close spends the marker of the open
// transaction, re-runs the scan up to the claimed height and checks that the
// record, the kind of close and the payout all agree with it.

use super::{chain::funding_chain, payload_outputs, shape, ValidatedAction, ValidationError, Validator, MARKER_VOUT};
use crate::codec::{CloseRecord, ContractRecord};
use crate::feeds::PriceSource;
use crate::ledger::{Ledger, Script, Transaction};
use crate::position::CloseKind;
use crate::scanner::{Scanner, StopReason};
use crate::types::{Amount, OutPoint};

impl<'a, L: Ledger + ?Sized, P: PriceSource + ?Sized> Validator<'a, L, P> {
    pub(super) fn validate_close(
        &self,
        tx: &Transaction,
        record: &CloseRecord,
    ) -> Result<ValidatedAction, ValidationError> {
        let outputs = payload_outputs(tx);
        if !(1..=3).contains(&outputs.len()) {
            return Err(shape(format!("close has {} outputs, expected 1 to 3", outputs.len())));
        }
        if outputs[0].script != Script::PayToKey(record.recipient) {
            return Err(shape("vout0 does not pay the recipient"));
        }
        if outputs.len() >= 2 && outputs[1].script != Script::ContractGlobal {
            return Err(shape("vout1 must be contract change"));
        }
        if outputs.len() == 3 && outputs[2].script.is_contract() {
            return Err(shape("vout2 must be plain change"));
        }

        let (input, open_entry) = self.first_contract_input(tx)?;
        if input.prevout != OutPoint::new(record.position_id, MARKER_VOUT) {
            return Err(shape("close must spend the marker of the named position"));
        }
        self.check_close_pool(tx, &input.prevout)?;
        let data = open_entry.tx.record_data().ok_or(ValidationError::NotContract)?;
        let open = match ContractRecord::decode(data, self.params)? {
            ContractRecord::Open(open) => open,
            _ => return Err(shape("marker does not belong to an open transaction")),
        };
        self.validate_open(&open_entry.tx, &open)?;
        self.ensure_marker_unspent(&record.position_id)?;

        let tip = self.ledger.tip_height();
        if record.close_height > tip {
            return Err(ValidationError::NotYetEligible { height: record.close_height, tip });
        }

        // the scan runs to the tip, not to the claimed height
        let chain = funding_chain(self.ledger, self.params, &record.position_id)?;
        let scanner = Scanner::new(self.prices, self.params);
        let outcome = scanner.scan(&open.expression, open.leverage, &chain.increments, tip)?;
        if let StopReason::PriceUnavailable { height, reason } = &outcome.stop {
            return Err(ValidationError::FeedUnavailable(format!("at height {}: {}", height, reason)));
        }

        let claimed = record.claimed_equity().ok_or(ValidationError::ArithmeticOverflow)?;
        let kind = match (claimed.is_negative(), outcome.rekt) {
            (false, true) => return Err(ValidationError::AlreadyRekt),
            (true, false) => return Err(ValidationError::StillSolvent),
            (false, false) => CloseKind::Cashout,
            (true, true) => CloseKind::Rekt,
        };

        if record.close_height != outcome.last_height {
            return Err(shape(format!(
                "record closes at {}, scan ends at {}",
                record.close_height, outcome.last_height
            )));
        }

        if record.total_bets != outcome.total_bets || record.total_profit != outcome.total_profits {
            return Err(shape(format!(
                "record claims bets {} profit {}, scan gives {} and {}",
                record.total_bets, record.total_profit, outcome.total_bets, outcome.total_profits
            )));
        }
        if record.leverage != open.leverage || record.first_price != open.first_price {
            return Err(shape("record leverage or first price differs from the open"));
        }

        let payout = match kind {
            CloseKind::Cashout => {
                if record.recipient != open.owner {
                    return Err(ValidationError::Unauthorized("cashout must pay the owner".into()));
                }
                if !tx.signed_by(&open.owner) {
                    return Err(ValidationError::Unauthorized("cashout not signed by the owner".into()));
                }
                outcome.equity
            }
            CloseKind::Rekt => Amount(self.params.rekt_fee(outcome.total_bets.value())),
        };
        if outputs[0].value != payout {
            return Err(shape(format!("payout {} does not match {}", outputs[0].value, payout)));
        }

        let contract_in = self.contract_inputs_total(tx)?;
        let contract_out = super::contract_outputs_total(outputs)?;
        let required = contract_out.checked_add(payout).ok_or(ValidationError::ArithmeticOverflow)?;
        if contract_in < required {
            return Err(shape(format!(
                "contract inputs {} cannot cover outputs and payout {}",
                contract_in, required
            )));
        }

        Ok(ValidatedAction::Close {
            position_id: record.position_id,
            kind,
            payout,
            scanned_to: outcome.last_height,
        })
    }

    /// Contract inputs besides the marker may only be escrow or contract
    /// change. Batons and other positions' markers stay untouched.
    fn check_close_pool(&self, tx: &Transaction, marker: &OutPoint) -> Result<(), ValidationError> {
        for input in tx.inputs.iter().filter(|input| input.prevout != *marker) {
            let prev = self.prevout(input)?;
            match &prev.script {
                Script::ContractToKey(_) => {
                    return Err(shape(format!("close spends the baton {}", input.prevout)));
                }
                Script::ContractGlobal if self.is_open_marker(&input.prevout)? => {
                    return Err(shape(format!("close spends another position's marker {}", input.prevout)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
