// 3.0: the synthetic price stack machine. one expression, one height, one price.
//
// Every step runs in i128 and is narrowed back to i64 with a range check.
// Overflow anywhere aborts the whole evaluation; nothing saturates, so every
// validating node lands on the same answer or the same rejection.

use crate::config::FeedSelection;
use crate::expression::{Opcode, SyntheticExpression};
use crate::feeds::{PriceSample, PriceSource};
use crate::types::{FeedIndex, Height, Leverage, ScaledPrice, SCALE};
use thiserror::Error;
use tracing::trace;

/// Fixed operand stack size.
pub const STACK_SLOTS: usize = 4;

const S: i128 = SCALE as i128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("feed {feed} has no usable sample at height {height}")]
    FeedUnavailable { feed: FeedIndex, height: Height },

    #[error("weight at opcode {position} needs exactly one operand on the stack")]
    WeightMisplaced { position: usize },

    #[error("{opcode:?} at opcode {position} found too few operands")]
    StackUnderflow { position: usize, opcode: Opcode },

    #[error("operand stack exceeded {STACK_SLOTS} slots at opcode {position}")]
    StackOverflow { position: usize },

    #[error("division by zero in {opcode:?} at opcode {position}")]
    DivisionByZero { position: usize, opcode: Opcode },

    #[error("scaled price overflow at opcode {position}")]
    Overflow { position: usize },

    #[error("weights sum to zero")]
    ZeroWeight,

    #[error("expression left {depth} unconsumed operands")]
    UnbalancedResult { depth: usize },
}

impl EvalError {
    /// Negative diagnostic code, stable across versions.
    pub fn code(&self) -> i32 {
        match self {
            EvalError::FeedUnavailable { .. } => -1,
            EvalError::WeightMisplaced { .. } => -2,
            EvalError::StackUnderflow { opcode, .. } => match opcode {
                Opcode::Mul => -3,
                Opcode::Div => -4,
                Opcode::Invert => -5,
                Opcode::MulDivDiv => -6,
                Opcode::MulMulDiv => -7,
                Opcode::MulMulMul => -8,
                Opcode::DivDivDiv => -9,
                Opcode::FeedRef(_) | Opcode::Weight(_) => -2,
            },
            EvalError::StackOverflow { .. } => -10,
            EvalError::ZeroWeight => -11,
            EvalError::UnbalancedResult { .. } => -12,
            EvalError::Overflow { .. } => -13,
            EvalError::DivisionByZero { .. } => -14,
        }
    }
}

struct OperandStack {
    slots: [i64; STACK_SLOTS],
    depth: usize,
}

impl OperandStack {
    fn new() -> Self {
        Self { slots: [0; STACK_SLOTS], depth: 0 }
    }

    fn push(&mut self, value: i64, position: usize) -> Result<(), EvalError> {
        if self.depth >= STACK_SLOTS {
            return Err(EvalError::StackOverflow { position });
        }
        self.slots[self.depth] = value;
        self.depth += 1;
        Ok(())
    }

    fn pop(&mut self) -> i128 {
        debug_assert!(self.depth > 0);
        self.depth -= 1;
        self.slots[self.depth] as i128
    }
}

/// Evaluates expressions against one price source under one selection policy.
pub struct Evaluator<'a, P: PriceSource + ?Sized> {
    source: &'a P,
    selection: FeedSelection,
}

impl<'a, P: PriceSource + ?Sized> Evaluator<'a, P> {
    pub fn new(source: &'a P, selection: FeedSelection) -> Self {
        Self { source, selection }
    }

    fn reading(&self, sample: PriceSample, minmax: bool, leverage: Leverage) -> i64 {
        match self.selection {
            FeedSelection::WindowExtremum if minmax => {
                if leverage.is_long() {
                    sample.extremum.max(sample.smoothed)
                } else {
                    sample.extremum.min(sample.smoothed)
                }
            }
            _ => sample.smoothed,
        }
    }

    /// Synthetic price of `expr` at `height`. `minmax` is set while the
    /// position's cost basis window is still open.
    pub fn price_at(
        &self,
        expr: &SyntheticExpression,
        height: Height,
        minmax: bool,
        leverage: Leverage,
    ) -> Result<ScaledPrice, EvalError> {
        let mut stack = OperandStack::new();
        let mut total: i128 = 0;
        let mut denominator: i128 = 0;
        let mut weighted = false;

        for (position, op) in expr.opcodes().iter().enumerate() {
            let op = *op;
            if stack.depth < op.arity() {
                return Err(match op {
                    Opcode::Weight(_) => EvalError::WeightMisplaced { position },
                    _ => EvalError::StackUnderflow { position, opcode: op },
                });
            }

            let narrow = |value: i128| -> Result<i64, EvalError> {
                i64::try_from(value).map_err(|_| EvalError::Overflow { position })
            };
            let div = |num: i128, den: i128| -> Result<i128, EvalError> {
                if den == 0 {
                    return Err(EvalError::DivisionByZero { position, opcode: op });
                }
                Ok(num / den)
            };
            let mul = |a: i128, b: i128| -> Result<i128, EvalError> {
                a.checked_mul(b).ok_or(EvalError::Overflow { position })
            };

            match op {
                Opcode::FeedRef(feed) => {
                    let sample = self
                        .source
                        .lookup_price(feed, height)
                        .ok_or(EvalError::FeedUnavailable { feed, height })?;
                    let value = self.reading(sample, minmax, leverage);
                    if value == 0 {
                        return Err(EvalError::FeedUnavailable { feed, height });
                    }
                    stack.push(value, position)?;
                }
                Opcode::Weight(w) => {
                    if stack.depth != 1 {
                        return Err(EvalError::WeightMisplaced { position });
                    }
                    let value = stack.pop();
                    total = total
                        .checked_add(mul(value, w as i128)?)
                        .ok_or(EvalError::Overflow { position })?;
                    denominator += w as i128;
                    weighted = true;
                }
                Opcode::Mul => {
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(mul(a, b)?, S)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::Div => {
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(mul(a, S)?, b)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::Invert => {
                    let a = stack.pop();
                    let r = div(S * S, a)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::MulDivDiv => {
                    let c = stack.pop();
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(mul(div(mul(a, S)?, b)?, S)?, c)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::MulMulDiv => {
                    let c = stack.pop();
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(mul(a, b)?, c)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::MulMulMul => {
                    let c = stack.pop();
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(mul(div(mul(a, b)?, S)?, c)?, S)?;
                    stack.push(narrow(r)?, position)?;
                }
                Opcode::DivDivDiv => {
                    let c = stack.pop();
                    let b = stack.pop();
                    let a = stack.pop();
                    let r = div(S * S, a)?;
                    let r = div(mul(r, S)?, b)?;
                    let r = div(mul(r, S)?, c)?;
                    stack.push(narrow(r)?, position)?;
                }
            }

            trace!(position, ?op, depth = stack.depth, "synthetic step");
        }

        if weighted {
            if stack.depth != 0 {
                return Err(EvalError::UnbalancedResult { depth: stack.depth });
            }
            if denominator == 0 {
                return Err(EvalError::ZeroWeight);
            }
            let price = i64::try_from(total / denominator)
                .map_err(|_| EvalError::Overflow { position: expr.len() })?;
            trace!(price, %height, "synthetic price");
            return Ok(ScaledPrice(price));
        }

        // unweighted sequences resolve to their single remaining operand
        if stack.depth != 1 {
            return Err(EvalError::UnbalancedResult { depth: stack.depth });
        }
        Ok(ScaledPrice(stack.slots[0]))
    }
}
