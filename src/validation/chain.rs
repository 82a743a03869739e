// 13.4: rebuild a position from the ledger. the open record gives the first
// increment, then each spender of the baton that is an add funding for the
// same position appends one more.

use super::{shape, ValidationError, BATON_VOUT};
use crate::codec::{ContractRecord, OpenRecord};
use crate::config::ProtocolParams;
use crate::ledger::Ledger;
use crate::position::FundingIncrement;
use crate::types::{Amount, Height, OutPoint, PositionId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FundingChain {
    pub position_id: PositionId,
    pub open: OpenRecord,
    /// Height the open transaction confirmed at.
    pub confirmed_at: Height,
    /// Funded state, derived fields unset.
    pub increments: Vec<FundingIncrement>,
    /// Current unspent baton.
    pub baton: OutPoint,
    /// Escrow outputs: vout2 of the open and vout1 of every add funding.
    pub escrow: Vec<OutPoint>,
}

pub fn funding_chain<L: Ledger + ?Sized>(
    ledger: &L,
    params: &ProtocolParams,
    position_id: &PositionId,
) -> Result<FundingChain, ValidationError> {
    let entry = ledger
        .load_transaction(position_id)
        .ok_or(ValidationError::MissingTransaction(*position_id))?;
    let data = entry.tx.record_data().ok_or(ValidationError::NotContract)?;
    let open = match ContractRecord::decode(data, params)? {
        ContractRecord::Open(open) => open,
        _ => return Err(shape(format!("{} is not an open transaction", position_id))),
    };

    let mut increments = vec![FundingIncrement::new(
        Amount(params.position_size(open.amount.value())),
        open.open_height,
    )];
    let mut baton = OutPoint::new(*position_id, BATON_VOUT);
    let mut escrow = vec![OutPoint::new(*position_id, 2)];

    while let Some(spend) = ledger.spend_locator(&baton) {
        let next = ledger
            .load_transaction(&spend.txid)
            .ok_or(ValidationError::MissingTransaction(spend.txid))?;
        let record = next
            .tx
            .record_data()
            .and_then(|data| ContractRecord::decode(data, params).ok());
        match record {
            Some(ContractRecord::AddFunding(add)) if add.position_id == *position_id => {
                increments.push(FundingIncrement::new(add.amount, next.height));
                escrow.push(OutPoint::new(spend.txid, 1));
                baton = OutPoint::new(spend.txid, BATON_VOUT);
            }
            _ => {
                debug!(position = %position_id, spender = %spend.txid, "baton spent outside the funding chain");
                break;
            }
        }
    }

    Ok(FundingChain {
        position_id: *position_id,
        open,
        confirmed_at: entry.height,
        increments,
        baton,
        escrow,
    })
}
