// 15.0: transaction construction. builds well formed open, add funding and
// close transactions from caller supplied coins. nothing here touches the
// ledger; a caller submits the result and validation has the final say.

use crate::codec::{AddFundingRecord, CloseRecord, ContractRecord, OpenRecord};
use crate::config::ProtocolParams;
use crate::expression::SyntheticExpression;
use crate::ledger::{Script, Transaction, TxIn, TxOut};
use crate::types::{Amount, Height, Leverage, OutPoint, PositionId, PubKey, ScaledPrice, TxId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("leverage {0} is zero or beyond the maximum")]
    InvalidLeverage(i16),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("amount overflow")]
    Overflow,
}

/// A spendable output and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: Amount,
}

impl Coin {
    pub fn new(outpoint: OutPoint, value: Amount) -> Self {
        Self { outpoint, value }
    }
}

fn total(coins: &[Coin]) -> Result<Amount, BuildError> {
    coins
        .iter()
        .try_fold(Amount::zero(), |acc, c| acc.checked_add(c.value))
        .ok_or(BuildError::Overflow)
}

fn add(a: Amount, b: Amount) -> Result<Amount, BuildError> {
    a.checked_add(b).ok_or(BuildError::Overflow)
}

/// Plain change output when anything above the network fee is left.
fn change(available: Amount, spent: Amount, params: &ProtocolParams, script: Script) -> Result<Option<TxOut>, BuildError> {
    let needed = add(spent, Amount(params.tx_fee))?;
    if available < needed {
        return Err(BuildError::InsufficientFunds { needed, available });
    }
    let rest = Amount(available.value() - needed.value());
    Ok((rest.value() > 0).then(|| TxOut::new(rest, script)))
}

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub owner: PubKey,
    pub coins: Vec<Coin>,
    pub amount: Amount,
    pub leverage: i16,
    pub expression: SyntheticExpression,
    pub first_price: ScaledPrice,
    pub open_height: Height,
}

/// Baton, marker, escrow, legacy marker, fee, optional change, record.
pub fn open_position(
    params: &ProtocolParams,
    fee_destination: &Script,
    request: OpenRequest,
) -> Result<Transaction, BuildError> {
    let leverage = Leverage::new(request.leverage, params.max_leverage)
        .ok_or(BuildError::InvalidLeverage(request.leverage))?;
    if request.amount.value() <= 0 {
        return Err(BuildError::NonPositiveAmount);
    }

    let marker = Amount(params.tx_fee);
    let position_size = Amount(params.position_size(request.amount.value()));
    let fee = Amount(request.amount.value() - position_size.value());

    let mut outputs = vec![
        TxOut::new(marker, Script::ContractToKey(request.owner)),
        TxOut::new(marker, Script::ContractGlobal),
        TxOut::new(position_size, Script::ContractGlobal),
        TxOut::new(marker, Script::GlobalMarker),
        TxOut::new(fee, fee_destination.clone()),
    ];
    let spent = outputs.iter().try_fold(Amount::zero(), |acc, o| add(acc, o.value))?;
    if let Some(out) = change(total(&request.coins)?, spent, params, Script::PayToKey(request.owner))? {
        outputs.push(out);
    }

    let record = ContractRecord::Open(OpenRecord {
        owner: request.owner,
        open_height: request.open_height,
        amount: request.amount,
        leverage,
        first_price: request.first_price,
        expression: request.expression,
        external_ref: TxId::default(),
    });
    outputs.push(TxOut::data(record.encode()));

    let inputs = request
        .coins
        .iter()
        .map(|c| TxIn::new(c.outpoint, Some(request.owner)))
        .collect();
    Ok(Transaction::new(inputs, outputs))
}

/// Spends the current baton and escrows `amount` as a new increment.
pub fn add_funding(
    params: &ProtocolParams,
    position_id: PositionId,
    baton: OutPoint,
    contributor: PubKey,
    coins: &[Coin],
    amount: Amount,
) -> Result<Transaction, BuildError> {
    if amount.value() <= 0 {
        return Err(BuildError::NonPositiveAmount);
    }
    let marker = Amount(params.tx_fee);
    let mut outputs = vec![
        TxOut::new(marker, Script::ContractToKey(contributor)),
        TxOut::new(amount, Script::ContractGlobal),
    ];
    // the spent baton carries one marker's worth back in
    let available = add(total(coins)?, marker)?;
    if let Some(out) = change(available, add(marker, amount)?, params, Script::PayToKey(contributor))? {
        outputs.push(out);
    }
    outputs.push(TxOut::data(
        ContractRecord::AddFunding(AddFundingRecord { position_id, contributor, amount }).encode(),
    ));

    let mut inputs = vec![TxIn::new(baton, Some(contributor))];
    inputs.extend(coins.iter().map(|c| TxIn::new(c.outpoint, Some(contributor))));
    Ok(Transaction::new(inputs, outputs))
}

/// Spends the marker plus enough contract coins to pay `payout` to the
/// record's recipient, returning the rest to the contract.
pub fn close_position(
    params: &ProtocolParams,
    record: CloseRecord,
    marker: Coin,
    pool: &[Coin],
    payout: Amount,
    signer: Option<PubKey>,
) -> Result<Transaction, BuildError> {
    let needed = add(payout, Amount(params.tx_fee))?;
    let mut inputs = vec![TxIn::new(marker.outpoint, signer)];
    let mut available = marker.value;
    for coin in pool {
        if available >= needed {
            break;
        }
        inputs.push(TxIn::new(coin.outpoint, signer));
        available = add(available, coin.value)?;
    }
    if available < needed {
        return Err(BuildError::InsufficientFunds { needed, available });
    }

    let mut outputs = vec![TxOut::new(payout, Script::PayToKey(record.recipient))];
    if let Some(out) = change(available, payout, params, Script::ContractGlobal)? {
        outputs.push(out);
    }
    outputs.push(TxOut::data(ContractRecord::Close(record).encode()));
    Ok(Transaction::new(inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Opcode;
    use crate::types::FeedIndex;

    fn coin(value: i64) -> Coin {
        Coin::new(OutPoint::new(TxId([1; 32]), 0), Amount(value))
    }

    fn request(amount: i64, coins: Vec<Coin>) -> OpenRequest {
        OpenRequest {
            owner: PubKey([2; 33]),
            coins,
            amount: Amount(amount),
            leverage: 2,
            expression: SyntheticExpression::from_opcodes(vec![Opcode::FeedRef(FeedIndex(0)), Opcode::Weight(1)], 16)
                .unwrap(),
            first_price: ScaledPrice(100),
            open_height: Height(5),
        }
    }

    #[test]
    fn open_layout() {
        let params = ProtocolParams::default();
        let fee = Script::Raw(vec![9]);
        let tx = open_position(&params, &fee, request(200_000_000, vec![coin(300_000_000)])).unwrap();
        assert_eq!(tx.outputs.len(), 7);
        assert_eq!(tx.outputs[2].value, Amount(199_000_000));
        assert_eq!(tx.outputs[4].value, Amount(1_000_000));
        assert_eq!(tx.outputs[4].script, fee);
        assert!(tx.record_data().is_some());
    }

    #[test]
    fn open_rejects_bad_inputs() {
        let params = ProtocolParams::default();
        let fee = Script::Raw(vec![9]);
        let mut bad = request(100, vec![coin(1_000_000)]);
        bad.leverage = 0;
        assert_eq!(open_position(&params, &fee, bad), Err(BuildError::InvalidLeverage(0)));
        assert!(matches!(
            open_position(&params, &fee, request(100_000_000, vec![coin(1_000)])),
            Err(BuildError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn close_draws_pool_until_covered() {
        let params = ProtocolParams::default();
        let record = CloseRecord {
            position_id: TxId([1; 32]),
            total_profit: Amount(0),
            close_height: Height(9),
            recipient: PubKey([2; 33]),
            first_price: ScaledPrice(1),
            cost_basis: ScaledPrice::unset(),
            total_bets: Amount(500_000),
            reserved: Amount::zero(),
            leverage: Leverage::from_raw(1),
        };
        let pool = [coin(400_000), coin(400_000), coin(400_000)];
        let tx = close_position(&params, record, coin(10_000), &pool, Amount(500_000), None).unwrap();
        // marker + two pool coins cover 510_000
        assert_eq!(tx.inputs.len(), 3);
        assert_eq!(tx.outputs[0].value, Amount(500_000));
        assert_eq!(tx.outputs[1].script, Script::ContractGlobal);
    }
}
