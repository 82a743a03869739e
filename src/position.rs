// 4.0: position tracking. a position is its open record plus an ordered list of
// funding increments, each with its own cost basis and running profit.
// 4.1 is the summary report (average cost basis, liquidation price, rekt fee).

use crate::expression::SyntheticExpression;
use crate::types::{Amount, Height, Leverage, OutPoint, PositionId, PubKey, ScaledPrice, SCALE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One escrow contribution. The open action creates the first, each add
/// funding action appends one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingIncrement {
    pub position_size: Amount,
    pub open_height: Height,
    /// Zero until the first price inside the window sets it.
    pub cost_basis: ScaledPrice,
    pub profit: Amount,
}

impl FundingIncrement {
    pub fn new(position_size: Amount, open_height: Height) -> Self {
        Self {
            position_size,
            open_height,
            cost_basis: ScaledPrice::unset(),
            profit: Amount::zero(),
        }
    }

    /// Same increment with derived state cleared, as it was when funded.
    pub fn reset(&self) -> Self {
        Self::new(self.position_size, self.open_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseKind {
    Cashout,
    Rekt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Open,
    Closed(CloseKind),
    /// Marker spent by a transaction whose record could not be classified.
    ClosedUnknown,
}

impl LifecycleState {
    pub fn is_open(&self) -> bool {
        matches!(self, LifecycleState::Open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: PubKey,
    pub leverage: Leverage,
    pub expression: SyntheticExpression,
    /// Synthetic price recorded when the position was opened.
    pub first_price: ScaledPrice,
    pub increments: Vec<FundingIncrement>,
    pub state: LifecycleState,
    /// Height named by the close record, once closed.
    pub closed_at: Option<Height>,
    /// Output the next add funding action must spend.
    pub baton: OutPoint,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// Size weighted cost basis: ((Σ cb_i * size_i) * S / Σ size_i) / S.
pub fn average_cost_basis(increments: &[FundingIncrement]) -> ScaledPrice {
    let total_size: i128 = increments.iter().map(|inc| inc.position_size.value() as i128).sum();
    if total_size == 0 {
        return ScaledPrice::unset();
    }
    let weighted: i128 = increments
        .iter()
        .map(|inc| inc.cost_basis.value() as i128 * inc.position_size.value() as i128)
        .sum();
    let scaled = weighted.saturating_mul(SCALE as i128) / total_size / SCALE as i128;
    ScaledPrice(i64::try_from(scaled).unwrap_or(i64::MAX))
}

/// avg - avg / leverage. zero when no cost basis is set yet.
pub fn liquidation_price(average: ScaledPrice, leverage: Leverage) -> ScaledPrice {
    if leverage.value() == 0 {
        return ScaledPrice::unset();
    }
    ScaledPrice(average.value() - average.value() / leverage.value() as i64)
}

// 4.1: what an info query reports about a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementReport {
    pub position_size: Decimal,
    pub profits: Decimal,
    pub cost_basis: Decimal,
    pub open_height: Height,
}

impl From<&FundingIncrement> for IncrementReport {
    fn from(inc: &FundingIncrement) -> Self {
        Self {
            position_size: inc.position_size.to_decimal(),
            profits: inc.profit.to_decimal(),
            cost_basis: inc.cost_basis.to_decimal(),
            open_height: inc.open_height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionReport {
    pub id: PositionId,
    pub owner: PubKey,
    pub is_open: bool,
    pub rekt: bool,
    pub rekt_fee: Option<Decimal>,
    pub rekt_height: Option<Height>,
    pub expression: String,
    pub leverage: i16,
    pub bets: Vec<IncrementReport>,
    pub total_position_size: Decimal,
    pub total_profits: Decimal,
    pub equity: Decimal,
    pub cost_basis: Decimal,
    pub liquidation_price: Decimal,
    pub first_price: Decimal,
    pub last_price: Decimal,
    pub last_height: Height,
}
