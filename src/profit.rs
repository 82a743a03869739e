// 5.0: cost basis and profit for one funding increment at one height.
//
// Inside the window the cost basis tracks the running max (longs) or min
// (shorts) of the synthetic price; after it the value is frozen. Profit is
// ((price * S) / cb - S) * leverage * size / S with truncating division.

use crate::config::ProtocolParams;
use crate::evaluator::{EvalError, Evaluator};
use crate::expression::SyntheticExpression;
use crate::feeds::PriceSource;
use crate::position::FundingIncrement;
use crate::types::{Amount, Height, Leverage, ScaledPrice, SCALE};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfitError {
    #[error("height {height} is before the increment opened at {open_height}")]
    HeightBeforeOpen { height: Height, open_height: Height },

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("profit overflows at height {height}")]
    Overflow { height: Height },
}

/// True while `height` is still inside the cost basis window.
pub fn window_open(open_height: Height, height: Height, window: u32) -> bool {
    height < open_height.offset(window)
}

/// Running extremum update. Longs keep the max; shorts keep the min with an
/// unset (zero) basis replaced by any price.
pub fn next_cost_basis(current: ScaledPrice, price: ScaledPrice, leverage: Leverage) -> ScaledPrice {
    if leverage.is_long() && price > current {
        price
    } else if leverage.is_short() && (current.value() == 0 || price < current) {
        price
    } else {
        current
    }
}

/// Profit of `size` against `cost_basis`. Zero until a cost basis exists.
pub fn profit_for(
    price: ScaledPrice,
    cost_basis: ScaledPrice,
    leverage: Leverage,
    size: Amount,
) -> Option<Amount> {
    if cost_basis.value() <= 0 {
        return Some(Amount::zero());
    }
    let s = SCALE as i128;
    let ratio = (price.value() as i128).checked_mul(s)? / cost_basis.value() as i128 - s;
    let profit = ratio
        .checked_mul(leverage.value() as i128)?
        .checked_mul(size.value() as i128)?
        / s;
    i64::try_from(profit).ok().map(Amount)
}

/// Drives one increment forward one height at a time.
pub struct ProfitEngine<'a, P: PriceSource + ?Sized> {
    evaluator: Evaluator<'a, P>,
    window: u32,
}

impl<'a, P: PriceSource + ?Sized> ProfitEngine<'a, P> {
    pub fn new(source: &'a P, params: &ProtocolParams) -> Self {
        Self {
            evaluator: Evaluator::new(source, params.feed_selection),
            window: params.window,
        }
    }

    pub fn evaluator(&self) -> &Evaluator<'a, P> {
        &self.evaluator
    }

    /// Updates `inc.cost_basis` (window only) and `inc.profit` for `height`,
    /// returning the synthetic price used. On error `inc` is untouched.
    pub fn step(
        &self,
        inc: &mut FundingIncrement,
        height: Height,
        leverage: Leverage,
        expr: &SyntheticExpression,
    ) -> Result<ScaledPrice, ProfitError> {
        if height < inc.open_height {
            return Err(ProfitError::HeightBeforeOpen { height, open_height: inc.open_height });
        }

        let minmax = window_open(inc.open_height, height, self.window);
        let price = self.evaluator.price_at(expr, height, minmax, leverage)?;

        let cost_basis = if minmax {
            next_cost_basis(inc.cost_basis, price, leverage)
        } else {
            inc.cost_basis
        };
        if minmax && cost_basis != inc.cost_basis {
            debug!(%height, cost_basis = cost_basis.value(), "window cost basis moved");
        }

        let profit = profit_for(price, cost_basis, leverage, inc.position_size)
            .ok_or(ProfitError::Overflow { height })?;

        inc.cost_basis = cost_basis;
        inc.profit = profit;
        Ok(price)
    }
}
