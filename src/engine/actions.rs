//! Building open, add funding and close transactions against current state.

use super::core::Engine;
use super::results::EngineError;
use crate::builder::{self, Coin, OpenRequest};
use crate::codec::CloseRecord;
use crate::evaluator::Evaluator;
use crate::expression::compile;
use crate::feeds::PriceSource;
use crate::ledger::{Ledger, Transaction};
use crate::position::Position;
use crate::scanner::{ScanOutcome, StopReason};
use crate::types::{Amount, Leverage, OutPoint, PositionId, PubKey, ScaledPrice};
use crate::validation::{ValidationError, MARKER_VOUT};

impl<L: Ledger, P: PriceSource> Engine<L, P> {
    /// Opens at the current tip. The first price is the window price there.
    pub fn open_tx<S: AsRef<str>>(
        &self,
        owner: PubKey,
        coins: Vec<Coin>,
        amount: Amount,
        leverage: i16,
        tokens: &[S],
    ) -> Result<Transaction, EngineError> {
        let params = &self.config.protocol;
        let expression = compile(tokens, &self.config.catalog, params)?;
        let tip = self.ledger.tip_height();
        let evaluator = Evaluator::new(&self.prices, params.feed_selection);
        let first_price = evaluator.price_at(&expression, tip, true, Leverage::from_raw(leverage))?;

        let request = OpenRequest {
            owner,
            coins,
            amount,
            leverage,
            expression,
            first_price,
            open_height: tip,
        };
        Ok(builder::open_position(params, &self.fee_destination, request)?)
    }

    pub fn add_funding_tx(
        &self,
        id: &PositionId,
        contributor: PubKey,
        coins: &[Coin],
        amount: Amount,
    ) -> Result<Transaction, EngineError> {
        let position = self.require_open(id)?;
        Ok(builder::add_funding(
            &self.config.protocol,
            *id,
            position.baton,
            contributor,
            coins,
            amount,
        )?)
    }

    /// Owner cashout at the tip. Fails if the scan says the position is rekt.
    pub fn cashout_tx(&self, id: &PositionId, extra_pool: &[Coin]) -> Result<Transaction, EngineError> {
        let position = self.require_open(id)?;
        let outcome = self.scan_position(&position, None)?;
        if outcome.rekt {
            return Err(ValidationError::AlreadyRekt.into());
        }
        self.ensure_prices_available(&outcome)?;

        let record = self.close_record_for(&position, &outcome, position.owner);
        self.build_close(&position, record, outcome.equity, extra_pool, position.owner)
    }

    /// Rekt close paying the fee to `submitter`. Fails while solvent.
    pub fn rekt_tx(&self, id: &PositionId, submitter: PubKey) -> Result<Transaction, EngineError> {
        let position = self.require_open(id)?;
        let outcome = self.scan_position(&position, None)?;
        if !outcome.rekt {
            return Err(ValidationError::StillSolvent.into());
        }

        let record = self.close_record_for(&position, &outcome, submitter);
        let fee = Amount(self.config.protocol.rekt_fee(outcome.total_bets.value()));
        self.build_close(&position, record, fee, &[], submitter)
    }

    fn require_open(&self, id: &PositionId) -> Result<Position, EngineError> {
        let position = self.load_position(id)?;
        if !position.is_open() {
            return Err(EngineError::PositionClosed(*id));
        }
        Ok(position)
    }

    fn ensure_prices_available(&self, outcome: &ScanOutcome) -> Result<(), EngineError> {
        if let StopReason::PriceUnavailable { height, reason } = &outcome.stop {
            return Err(ValidationError::FeedUnavailable(format!("at height {}: {}", height, reason)).into());
        }
        Ok(())
    }

    fn close_record_for(&self, position: &Position, outcome: &ScanOutcome, recipient: PubKey) -> CloseRecord {
        CloseRecord {
            position_id: position.id,
            total_profit: outcome.total_profits,
            close_height: outcome.last_height,
            recipient,
            first_price: position.first_price,
            cost_basis: ScaledPrice::unset(),
            total_bets: outcome.total_bets,
            reserved: Amount::zero(),
            leverage: position.leverage,
        }
    }

    fn build_close(
        &self,
        position: &Position,
        record: CloseRecord,
        payout: Amount,
        extra_pool: &[Coin],
        signer: PubKey,
    ) -> Result<Transaction, EngineError> {
        let marker_point = OutPoint::new(position.id, MARKER_VOUT);
        let marker = self
            .ledger
            .load_output(&marker_point)
            .map(|out| Coin::new(marker_point, out.value))
            .ok_or(ValidationError::MissingOutput(marker_point))?;

        let chain = crate::validation::funding_chain(&self.ledger, &self.config.protocol, &position.id)?;
        let mut pool: Vec<Coin> = chain
            .escrow
            .iter()
            .filter(|point| self.ledger.spend_locator(point).is_none())
            .filter_map(|point| self.ledger.load_output(point).map(|out| Coin::new(*point, out.value)))
            .collect();
        pool.extend_from_slice(extra_pool);

        Ok(builder::close_position(
            &self.config.protocol,
            record,
            marker,
            &pool,
            payout,
            Some(signer),
        )?)
    }
}
