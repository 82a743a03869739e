// 2.0: synthetic expressions. postfix token list in, validated opcode vector out.
// 2.1 has the 16-bit wire form stored in open records.
// 2.2 has the canonical text rendering that recompiles to the same opcodes.

use crate::config::ProtocolParams;
use crate::feeds::FeedCatalog;
use crate::types::{FeedIndex, MAX_FEEDS};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Most operands an expression may hold on the stack between operators.
pub const MAX_COMPILE_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    FeedRef(FeedIndex),
    Weight(u16),
    Mul,
    Div,
    Invert,
    MulDivDiv,
    MulMulDiv,
    MulMulMul,
    DivDivDiv,
}

impl Opcode {
    /// Operands consumed from the stack.
    pub fn arity(&self) -> usize {
        match self {
            Opcode::FeedRef(_) => 0,
            Opcode::Weight(_) | Opcode::Invert => 1,
            Opcode::Mul | Opcode::Div => 2,
            Opcode::MulDivDiv | Opcode::MulMulDiv | Opcode::MulMulMul | Opcode::DivDivDiv => 3,
        }
    }

    /// Weights drain their operand into the accumulator instead of pushing.
    pub fn pushes_result(&self) -> bool {
        !matches!(self, Opcode::Weight(_))
    }

    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Opcode::Mul => Some("*"),
            Opcode::Div => Some("/"),
            Opcode::Invert => Some("!"),
            Opcode::MulDivDiv => Some("*//"),
            Opcode::MulMulDiv => Some("**/"),
            Opcode::MulMulMul => Some("***"),
            Opcode::DivDivDiv => Some("///"),
            Opcode::FeedRef(_) | Opcode::Weight(_) => None,
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "*" => Some(Opcode::Mul),
            "/" => Some(Opcode::Div),
            "!" => Some(Opcode::Invert),
            "*//" => Some(Opcode::MulDivDiv),
            "**/" => Some(Opcode::MulMulDiv),
            "***" => Some(Opcode::MulMulMul),
            "///" => Some(Opcode::DivDivDiv),
            _ => None,
        }
    }

    // 2.1: low 11 bits carry the index or weight, the class sits above them.
    pub fn to_u16(&self) -> u16 {
        let (class, value) = match *self {
            Opcode::FeedRef(index) => (0, index.0),
            Opcode::Weight(w) => (1, w),
            Opcode::Mul => (2, 0),
            Opcode::Div => (3, 0),
            Opcode::Invert => (4, 0),
            Opcode::MulDivDiv => (5, 0),
            Opcode::MulMulDiv => (6, 0),
            Opcode::MulMulMul => (7, 0),
            Opcode::DivDivDiv => (8, 0),
        };
        class * MAX_FEEDS + (value & (MAX_FEEDS - 1))
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        let value = raw & (MAX_FEEDS - 1);
        let op = match raw / MAX_FEEDS {
            0 => Opcode::FeedRef(FeedIndex(value)),
            1 if value > 0 => Opcode::Weight(value),
            2 => Opcode::Mul,
            3 => Opcode::Div,
            4 => Opcode::Invert,
            5 => Opcode::MulDivDiv,
            6 => Opcode::MulMulDiv,
            7 => Opcode::MulMulMul,
            8 => Opcode::DivDivDiv,
            _ => return None,
        };
        // operators carry no payload; anything else is a forged encoding
        if op.symbol().is_some() && value != 0 {
            return None;
        }
        Some(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("expression is empty")]
    Empty,

    #[error("expression has {len} opcodes, limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("unknown token {token:?} at position {position}")]
    UnknownToken { position: usize, token: String },

    #[error("not enough operands for {token:?} at position {position}")]
    InsufficientOperands { position: usize, token: String },

    #[error("too many operands on the stack after {token:?} at position {position}")]
    StackOverflow { position: usize, token: String },

    #[error("expression leaves {depth} operands unconsumed")]
    UnbalancedExpression { depth: usize },

    #[error("feed {0} has no name in the catalog")]
    UnknownFeed(FeedIndex),
}

/// Validated, immutable opcode sequence embedded in a position's open record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyntheticExpression {
    opcodes: Vec<Opcode>,
}

impl SyntheticExpression {
    /// Runs the depth walk over already-typed opcodes. Used both by the
    /// compiler and when an expression arrives decoded from a record.
    pub fn from_opcodes(opcodes: Vec<Opcode>, max_len: usize) -> Result<Self, CompileError> {
        if opcodes.is_empty() {
            return Err(CompileError::Empty);
        }
        if opcodes.len() > max_len {
            return Err(CompileError::TooLong { len: opcodes.len(), limit: max_len });
        }

        let mut depth = 0usize;
        for (position, op) in opcodes.iter().enumerate() {
            let token = || render_opcode_raw(op);
            if let Opcode::Weight(w) = op {
                if *w == 0 || *w >= MAX_FEEDS {
                    return Err(CompileError::UnknownToken { position, token: token() });
                }
            }
            if let Opcode::FeedRef(index) = op {
                if index.0 >= MAX_FEEDS {
                    return Err(CompileError::UnknownToken { position, token: token() });
                }
            }
            if depth < op.arity() {
                return Err(CompileError::InsufficientOperands { position, token: token() });
            }
            depth -= op.arity();
            if op.pushes_result() {
                depth += 1;
            }
            if depth > MAX_COMPILE_DEPTH {
                return Err(CompileError::StackOverflow { position, token: token() });
            }
        }
        if depth != 0 {
            return Err(CompileError::UnbalancedExpression { depth });
        }

        Ok(Self { opcodes })
    }

    /// Builds an expression with no structural checks. The evaluator still
    /// guards every stack access, so this is safe to feed it.
    pub fn from_opcodes_unchecked(opcodes: Vec<Opcode>) -> Self {
        Self { opcodes }
    }

    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    pub fn uses_weights(&self) -> bool {
        self.opcodes.iter().any(|op| matches!(op, Opcode::Weight(_)))
    }

    pub fn to_wire(&self) -> Vec<u16> {
        self.opcodes.iter().map(Opcode::to_u16).collect()
    }

    /// Decodes and structurally validates the stored 16-bit form.
    pub fn from_wire(raw: &[u16], max_len: usize) -> Result<Self, CompileError> {
        let mut opcodes = Vec::with_capacity(raw.len());
        for (position, &code) in raw.iter().enumerate() {
            let op = Opcode::from_u16(code).ok_or_else(|| CompileError::UnknownToken {
                position,
                token: format!("0x{:04x}", code),
            })?;
            opcodes.push(op);
        }
        Self::from_opcodes(opcodes, max_len)
    }

    // 2.2: canonical tokens. feed names come from the catalog.
    pub fn render_tokens(&self, catalog: &FeedCatalog) -> Result<Vec<String>, CompileError> {
        self.opcodes
            .iter()
            .map(|op| match op {
                Opcode::FeedRef(index) => catalog
                    .name_of(*index)
                    .map(str::to_string)
                    .ok_or(CompileError::UnknownFeed(*index)),
                other => Ok(render_opcode_raw(other)),
            })
            .collect()
    }

    /// Comma separated rendering for reports; unnamed feeds show as `#n`.
    pub fn describe(&self, catalog: &FeedCatalog) -> String {
        self.opcodes
            .iter()
            .map(|op| match op {
                Opcode::FeedRef(index) => catalog
                    .name_of(*index)
                    .map(str::to_string)
                    .unwrap_or_else(|| index.to_string()),
                other => render_opcode_raw(other),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SyntheticExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.opcodes.iter().map(render_opcode_raw).collect();
        f.write_str(&parts.join(", "))
    }
}

fn render_opcode_raw(op: &Opcode) -> String {
    match op {
        Opcode::FeedRef(index) => index.to_string(),
        Opcode::Weight(w) => w.to_string(),
        other => other.symbol().unwrap_or("?").to_string(),
    }
}

// weight literals are plain base-10 digits; anything with letters is a feed name
fn parse_weight(token: &str) -> Option<u16> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let w: u32 = token.parse().ok()?;
    if w > 0 && w < MAX_FEEDS as u32 {
        Some(w as u16)
    } else {
        None
    }
}

fn tokenize(position: usize, token: &str, catalog: &FeedCatalog) -> Result<Opcode, CompileError> {
    let token = token.trim();
    if let Some(op) = Opcode::from_symbol(token) {
        return Ok(op);
    }
    if let Some(w) = parse_weight(token) {
        return Ok(Opcode::Weight(w));
    }
    let looks_numeric = !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit());
    if !looks_numeric {
        if let Some(index) = catalog.index_of(token) {
            return Ok(Opcode::FeedRef(index));
        }
    }
    Err(CompileError::UnknownToken { position, token: token.to_string() })
}

/// Single left-to-right pass from postfix tokens to a validated expression.
pub fn compile<S: AsRef<str>>(
    tokens: &[S],
    catalog: &FeedCatalog,
    params: &ProtocolParams,
) -> Result<SyntheticExpression, CompileError> {
    if tokens.is_empty() {
        return Err(CompileError::Empty);
    }
    if tokens.len() > params.max_expression_len {
        return Err(CompileError::TooLong { len: tokens.len(), limit: params.max_expression_len });
    }

    let opcodes = tokens
        .iter()
        .enumerate()
        .map(|(position, token)| tokenize(position, token.as_ref(), catalog))
        .collect::<Result<Vec<_>, _>>()?;

    // depth errors should name the token the author wrote
    SyntheticExpression::from_opcodes(opcodes, params.max_expression_len).map_err(|e| match e {
        CompileError::InsufficientOperands { position, .. } => CompileError::InsufficientOperands {
            position,
            token: tokens[position].as_ref().trim().to_string(),
        },
        CompileError::StackOverflow { position, .. } => CompileError::StackOverflow {
            position,
            token: tokens[position].as_ref().trim().to_string(),
        },
        other => other,
    })
}

/// Splits `"BTC_USD, 1"` style text into tokens.
pub fn split_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
