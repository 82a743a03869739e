// 11.0 codec.rs: contract records carried in the data output of each action.
//
// Layout: contract tag (0xED), action tag, then the payload with integers
// little-endian, keys as 33 raw bytes, ids as 32 raw bytes. The expression is
// a u16 count followed by that many 16-bit opcodes. Decoding is strict: wrong
// tags, short input and trailing bytes all fail.

use crate::config::ProtocolParams;
use crate::expression::{CompileError, SyntheticExpression};
use crate::types::{Amount, Height, Leverage, PositionId, PubKey, ScaledPrice, TxId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONTRACT_TAG: u8 = 0xED;

pub const TAG_OPEN: u8 = b'B';
pub const TAG_ADD_FUNDING: u8 = b'A';
pub const TAG_CLOSE: u8 = b'F';
/// Retired cost basis action. Recognised only to be rejected.
pub const TAG_RETIRED_COST_BASIS: u8 = b'C';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record is empty")]
    Empty,

    #[error("not a contract record, tag 0x{0:02x}")]
    WrongContract(u8),

    #[error("unsupported action tag 0x{0:02x}")]
    UnsupportedAction(u8),

    #[error("record truncated: needed {needed} bytes at offset {offset}")]
    Truncated { needed: usize, offset: usize },

    #[error("{0} unexpected bytes after record")]
    TrailingBytes(usize),

    #[error("bad expression: {0}")]
    Expression(#[from] CompileError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRecord {
    pub owner: PubKey,
    pub open_height: Height,
    /// Full escrowed amount, before the open fee.
    pub amount: Amount,
    pub leverage: Leverage,
    pub first_price: ScaledPrice,
    pub expression: SyntheticExpression,
    /// Opaque reference, all zero when unused.
    pub external_ref: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFundingRecord {
    pub position_id: PositionId,
    pub contributor: PubKey,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRecord {
    pub position_id: PositionId,
    pub total_profit: Amount,
    pub close_height: Height,
    pub recipient: PubKey,
    pub first_price: ScaledPrice,
    /// Always written as zero.
    pub cost_basis: ScaledPrice,
    pub total_bets: Amount,
    /// Always written as zero.
    pub reserved: Amount,
    pub leverage: Leverage,
}

impl CloseRecord {
    /// Equity claimed by the record.
    pub fn claimed_equity(&self) -> Option<Amount> {
        self.total_bets.checked_add(self.total_profit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractRecord {
    Open(OpenRecord),
    AddFunding(AddFundingRecord),
    Close(CloseRecord),
}

impl ContractRecord {
    pub fn action_tag(&self) -> u8 {
        match self {
            ContractRecord::Open(_) => TAG_OPEN,
            ContractRecord::AddFunding(_) => TAG_ADD_FUNDING,
            ContractRecord::Close(_) => TAG_CLOSE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.u8(CONTRACT_TAG);
        w.u8(self.action_tag());
        match self {
            ContractRecord::Open(r) => {
                w.key(&r.owner);
                w.u32(r.open_height.0);
                w.i64(r.amount.value());
                w.i16(r.leverage.value());
                w.i64(r.first_price.value());
                let wire = r.expression.to_wire();
                w.u16(wire.len() as u16);
                for op in wire {
                    w.u16(op);
                }
                w.id(&r.external_ref);
            }
            ContractRecord::AddFunding(r) => {
                w.id(&r.position_id);
                w.key(&r.contributor);
                w.i64(r.amount.value());
            }
            ContractRecord::Close(r) => {
                w.id(&r.position_id);
                w.i64(r.total_profit.value());
                w.u32(r.close_height.0);
                w.key(&r.recipient);
                w.i64(r.first_price.value());
                w.i64(r.cost_basis.value());
                w.i64(r.total_bets.value());
                w.i64(r.reserved.value());
                w.i16(r.leverage.value());
            }
        }
        w.0
    }

    pub fn decode(bytes: &[u8], params: &ProtocolParams) -> Result<Self, DecodeError> {
        let mut r = Reader { bytes, offset: 0 };
        let contract = r.u8().map_err(|_| DecodeError::Empty)?;
        if contract != CONTRACT_TAG {
            return Err(DecodeError::WrongContract(contract));
        }
        let tag = r.u8()?;
        let record = match tag {
            TAG_OPEN => {
                let owner = r.key()?;
                let open_height = Height(r.u32()?);
                let amount = Amount(r.i64()?);
                let leverage = Leverage::from_raw(r.i16()?);
                let first_price = ScaledPrice(r.i64()?);
                let count = r.u16()? as usize;
                let mut wire = Vec::with_capacity(count.min(params.max_expression_len));
                for _ in 0..count {
                    wire.push(r.u16()?);
                }
                let expression = SyntheticExpression::from_wire(&wire, params.max_expression_len)?;
                let external_ref = r.id()?;
                ContractRecord::Open(OpenRecord {
                    owner,
                    open_height,
                    amount,
                    leverage,
                    first_price,
                    expression,
                    external_ref,
                })
            }
            TAG_ADD_FUNDING => ContractRecord::AddFunding(AddFundingRecord {
                position_id: r.id()?,
                contributor: r.key()?,
                amount: Amount(r.i64()?),
            }),
            TAG_CLOSE => ContractRecord::Close(CloseRecord {
                position_id: r.id()?,
                total_profit: Amount(r.i64()?),
                close_height: Height(r.u32()?),
                recipient: r.key()?,
                first_price: ScaledPrice(r.i64()?),
                cost_basis: ScaledPrice(r.i64()?),
                total_bets: Amount(r.i64()?),
                reserved: Amount(r.i64()?),
                leverage: Leverage::from_raw(r.i16()?),
            }),
            other => return Err(DecodeError::UnsupportedAction(other)),
        };
        let rest = bytes.len() - r.offset;
        if rest != 0 {
            return Err(DecodeError::TrailingBytes(rest));
        }
        Ok(record)
    }
}

/// Cheap peek at the action tag without decoding the payload.
pub fn action_tag(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [CONTRACT_TAG, tag, ..] => Some(*tag),
        _ => None,
    }
}

#[derive(Default)]
struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn i16(&mut self, v: i16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn key(&mut self, k: &PubKey) {
        self.0.extend_from_slice(k.as_bytes());
    }
    fn id(&mut self, id: &TxId) {
        self.0.extend_from_slice(id.as_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.offset + N;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(DecodeError::Truncated { needed: N, offset: self.offset })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }
    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }
    fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.take()?))
    }
    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }
    fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }
    fn key(&mut self) -> Result<PubKey, DecodeError> {
        Ok(PubKey(self.take()?))
    }
    fn id(&mut self) -> Result<TxId, DecodeError> {
        Ok(TxId(self.take()?))
    }
}
