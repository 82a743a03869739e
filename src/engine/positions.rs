//! Position loading, reporting and listing.

use super::core::Engine;
use super::results::{EngineError, ListFilter};
use crate::codec::{CloseRecord, ContractRecord};
use crate::feeds::PriceSource;
use crate::ledger::Ledger;
use crate::position::{
    average_cost_basis, liquidation_price, CloseKind, IncrementReport, LifecycleState, Position, PositionReport,
};
use crate::scanner::{ScanOutcome, Scanner};
use crate::types::{Amount, Height, OutPoint, PositionId, PubKey};
use crate::validation::{funding_chain, ValidationError, MARKER_VOUT};
use tracing::debug;

impl<L: Ledger, P: PriceSource> Engine<L, P> {
    /// Rebuilds a position from its open transaction and baton chain.
    pub fn load_position(&self, id: &PositionId) -> Result<Position, EngineError> {
        let chain = funding_chain(&self.ledger, &self.config.protocol, id).map_err(|err| match err {
            ValidationError::MissingTransaction(missing) if missing == *id => EngineError::PositionNotFound(*id),
            other => EngineError::Validation(other),
        })?;

        let (state, closed_at) = match self.close_record(id) {
            None => (LifecycleState::Open, None),
            Some(Some(close)) => {
                let kind = match close.claimed_equity() {
                    Some(equity) if !equity.is_negative() => CloseKind::Cashout,
                    _ => CloseKind::Rekt,
                };
                (LifecycleState::Closed(kind), Some(close.close_height))
            }
            Some(None) => (LifecycleState::ClosedUnknown, None),
        };

        Ok(Position {
            id: *id,
            owner: chain.open.owner,
            leverage: chain.open.leverage,
            expression: chain.open.expression,
            first_price: chain.open.first_price,
            increments: chain.increments,
            state,
            closed_at,
            baton: chain.baton,
        })
    }

    /// `None` while the marker is unspent, otherwise the spender's close
    /// record if it has one.
    fn close_record(&self, id: &PositionId) -> Option<Option<CloseRecord>> {
        let spend = self.ledger.spend_locator(&OutPoint::new(*id, MARKER_VOUT))?;
        let record = self
            .ledger
            .load_transaction(&spend.txid)
            .and_then(|entry| {
                entry
                    .tx
                    .record_data()
                    .and_then(|data| ContractRecord::decode(data, &self.config.protocol).ok())
            })
            .and_then(|record| match record {
                ContractRecord::Close(close) => Some(close),
                _ => None,
            });
        if record.is_none() {
            debug!(position = %id, spender = %spend.txid, "marker spent without a close record");
        }
        Some(record)
    }

    /// Scans up to `height`, or the tip; closed positions stop at their
    /// close height.
    pub fn scan_position(&self, position: &Position, height: Option<Height>) -> Result<ScanOutcome, EngineError> {
        let limit = height.unwrap_or_else(|| self.ledger.tip_height());
        let limit = match position.closed_at {
            Some(closed) if closed < limit => closed,
            _ => limit,
        };
        let scanner = Scanner::new(&self.prices, &self.config.protocol);
        Ok(scanner.scan_position(position, limit)?)
    }

    pub fn position_report(&self, id: &PositionId) -> Result<PositionReport, EngineError> {
        let position = self.load_position(id)?;
        let outcome = self.scan_position(&position, None)?;

        let average = average_cost_basis(&outcome.increments);
        let liquidation = liquidation_price(average, position.leverage);
        let rekt_fee = outcome
            .rekt
            .then(|| Amount(self.config.protocol.rekt_fee(outcome.total_bets.value())).to_decimal());

        Ok(PositionReport {
            id: *id,
            owner: position.owner,
            is_open: position.is_open(),
            rekt: outcome.rekt,
            rekt_fee,
            rekt_height: outcome.rekt.then_some(outcome.last_height),
            expression: position.expression.describe(&self.config.catalog),
            leverage: position.leverage.value(),
            bets: outcome.increments.iter().map(IncrementReport::from).collect(),
            total_position_size: outcome.total_bets.to_decimal(),
            total_profits: outcome.total_profits.to_decimal(),
            equity: outcome.equity.to_decimal(),
            cost_basis: average.to_decimal(),
            liquidation_price: liquidation.to_decimal(),
            first_price: position.first_price.to_decimal(),
            last_price: outcome.last_price.to_decimal(),
            last_height: outcome.last_height,
        })
    }

    /// Positions known to the ledger's global index, filtered by state and
    /// optionally by owner.
    pub fn list_positions(&self, filter: ListFilter, owner: Option<&PubKey>) -> Vec<PositionId> {
        self.ledger
            .global_index()
            .into_iter()
            .filter(|id| {
                let open = self
                    .ledger
                    .load_transaction(id)
                    .and_then(|entry| {
                        entry
                            .tx
                            .record_data()
                            .and_then(|data| ContractRecord::decode(data, &self.config.protocol).ok())
                    });
                let Some(ContractRecord::Open(open)) = open else {
                    return false;
                };
                if owner.is_some_and(|pk| *pk != open.owner) {
                    return false;
                }
                let is_open = self.ledger.spend_locator(&OutPoint::new(*id, MARKER_VOUT)).is_none();
                filter.admits(is_open)
            })
            .collect()
    }
}
