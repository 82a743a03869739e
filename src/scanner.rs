// 6.0: chain scanner. walks a position block by block from its first open
// height to the tip, re-deriving every increment's cost basis and profit.
//
// The scan always starts from the funded state of each increment, so the
// same increments and the same price history give the same outcome on every
// node. A height only counts once every live increment evaluated there.

use crate::config::ProtocolParams;
use crate::expression::SyntheticExpression;
use crate::feeds::PriceSource;
use crate::position::{FundingIncrement, Position};
use crate::profit::{ProfitEngine, ProfitError};
use crate::types::{Amount, Height, Leverage, ScaledPrice};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("position has no funding increments")]
    NoIncrements,

    #[error("tip {tip} is below the first open height {first_open}")]
    NothingToScan { tip: Height, first_open: Height },

    #[error("no height could be evaluated: {0}")]
    Profit(#[from] ProfitError),

    #[error("position totals overflow at height {height}")]
    Overflow { height: Height },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Reached the requested tip.
    Tip,
    /// Equity went negative at `last_height`.
    Rekt,
    /// Evaluation failed at `height`; the outcome reflects the block before.
    PriceUnavailable { height: Height, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub last_height: Height,
    pub last_price: ScaledPrice,
    /// Increment state as of `last_height`, same order as the input.
    pub increments: Vec<FundingIncrement>,
    pub total_bets: Amount,
    pub total_profits: Amount,
    pub equity: Amount,
    pub rekt: bool,
    pub stop: StopReason,
}

impl ScanOutcome {
    pub fn reached(&self, height: Height) -> bool {
        self.last_height >= height
    }
}

pub struct Scanner<'a, P: PriceSource + ?Sized> {
    engine: ProfitEngine<'a, P>,
}

impl<'a, P: PriceSource + ?Sized> Scanner<'a, P> {
    pub fn new(source: &'a P, params: &ProtocolParams) -> Self {
        Self { engine: ProfitEngine::new(source, params) }
    }

    pub fn scan_position(&self, position: &Position, tip: Height) -> Result<ScanOutcome, ScanError> {
        self.scan(&position.expression, position.leverage, &position.increments, tip)
    }

    /// Scans `increments` up to `tip` inclusive. Derived state on the input
    /// is ignored; the returned outcome carries the recomputed state.
    pub fn scan(
        &self,
        expr: &SyntheticExpression,
        leverage: Leverage,
        increments: &[FundingIncrement],
        tip: Height,
    ) -> Result<ScanOutcome, ScanError> {
        let first_open = increments
            .iter()
            .map(|inc| inc.open_height)
            .min()
            .ok_or(ScanError::NoIncrements)?;
        if tip < first_open {
            return Err(ScanError::NothingToScan { tip, first_open });
        }

        let mut state: Vec<FundingIncrement> = increments.iter().map(FundingIncrement::reset).collect();
        let mut working = state.clone();
        let mut last: Option<(Height, ScaledPrice, Amount, Amount)> = None;
        let mut stop = StopReason::Tip;

        for h in first_open.0..=tip.0 {
            let height = Height(h);
            working.clone_from(&state);

            match self.evaluate_height(expr, leverage, &mut working, height) {
                Ok((price, total_bets, total_profits)) => {
                    std::mem::swap(&mut state, &mut working);
                    last = Some((height, price, total_bets, total_profits));

                    let equity = total_bets
                        .checked_add(total_profits)
                        .ok_or(ScanError::Overflow { height })?;
                    trace!(%height, price = price.value(), equity = equity.value(), "scanned");
                    if equity.is_negative() {
                        debug!(%height, equity = equity.value(), "position rekt");
                        stop = StopReason::Rekt;
                        break;
                    }
                }
                Err(ScanStep::Overflow) => return Err(ScanError::Overflow { height }),
                Err(ScanStep::Profit(err)) => {
                    if last.is_none() {
                        return Err(ScanError::Profit(err));
                    }
                    debug!(%height, error = %err, "scan stopped before tip");
                    stop = StopReason::PriceUnavailable { height, reason: err.to_string() };
                    break;
                }
            }
        }

        // first_open always has at least one live increment, so a missing
        // `last` means the loop returned early above
        let (last_height, last_price, total_bets, total_profits) =
            last.ok_or(ScanError::NothingToScan { tip, first_open })?;
        let equity = total_bets
            .checked_add(total_profits)
            .ok_or(ScanError::Overflow { height: last_height })?;

        Ok(ScanOutcome {
            last_height,
            last_price,
            increments: state,
            total_bets,
            total_profits,
            equity,
            rekt: equity.is_negative(),
            stop,
        })
    }

    fn evaluate_height(
        &self,
        expr: &SyntheticExpression,
        leverage: Leverage,
        increments: &mut [FundingIncrement],
        height: Height,
    ) -> Result<(ScaledPrice, Amount, Amount), ScanStep> {
        let mut total_bets = Amount::zero();
        let mut total_profits = Amount::zero();
        let mut price = None;

        for inc in increments.iter_mut().filter(|inc| inc.open_height <= height) {
            let p = self.engine.step(inc, height, leverage, expr).map_err(ScanStep::Profit)?;
            price.get_or_insert(p);
            total_bets = total_bets.checked_add(inc.position_size).ok_or(ScanStep::Overflow)?;
            total_profits = total_profits.checked_add(inc.profit).ok_or(ScanStep::Overflow)?;
        }

        Ok((price.unwrap_or_default(), total_bets, total_profits))
    }
}

enum ScanStep {
    Profit(ProfitError),
    Overflow,
}
