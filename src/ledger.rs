// 10.0 ledger.rs: the slice of the host chain the core reads.
//
// Transactions are reduced to what validation looks at: which outputs they
// spend, who signed each input, and where each output pays. The `Ledger`
// trait is the lookup surface (load by hash, find the spender of an output,
// current tip). `InMemoryLedger` backs the tests and the simulator.

use crate::types::{Amount, Height, OutPoint, PubKey, TxId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

// 10.1: output destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Script {
    /// Contract output spendable with `key`'s signature (batons).
    ContractToKey(PubKey),
    /// Contract output held by the protocol (markers, escrow, change).
    ContractGlobal,
    /// Plain output to a key.
    PayToKey(PubKey),
    /// Plain output to the protocol's well-known key, kept as a legacy marker.
    GlobalMarker,
    /// Any other locking script, compared byte for byte.
    Raw(Vec<u8>),
    /// Unspendable data carrier. Contract records live here.
    Data(Vec<u8>),
}

impl Script {
    pub fn is_contract(&self) -> bool {
        matches!(self, Script::ContractToKey(_) | Script::ContractGlobal)
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Script::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Canonical byte form. tag byte then payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Script::ContractToKey(pk) => {
                out.push(0x01);
                out.extend_from_slice(pk.as_bytes());
            }
            Script::ContractGlobal => out.push(0x02),
            Script::PayToKey(pk) => {
                out.push(0x03);
                out.extend_from_slice(pk.as_bytes());
            }
            Script::GlobalMarker => out.push(0x04),
            Script::Raw(bytes) => {
                out.push(0x05);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Script::Data(bytes) => {
                out.push(0x06);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    /// Key whose signature authorizes the spend.
    pub signer: Option<PubKey>,
}

impl TxIn {
    pub fn new(prevout: OutPoint, signer: Option<PubKey>) -> Self {
        Self { prevout, signer }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Script,
}

impl TxOut {
    pub fn new(value: Amount, script: Script) -> Self {
        Self { value, script }
    }

    pub fn data(bytes: Vec<u8>) -> Self {
        Self::new(Amount::zero(), Script::Data(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self { inputs, outputs }
    }

    /// SHA-256 over the canonical serialization.
    pub fn txid(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update((self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.prevout.txid.as_bytes());
            hasher.update(input.prevout.vout.to_le_bytes());
            match &input.signer {
                Some(pk) => {
                    hasher.update([1u8]);
                    hasher.update(pk.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.update((self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.value.value().to_le_bytes());
            hasher.update(output.script.to_bytes());
        }
        TxId(hasher.finalize().into())
    }

    /// Payload of the last output when it is a data carrier.
    pub fn record_data(&self) -> Option<&[u8]> {
        self.outputs.last().and_then(|out| out.script.data())
    }

    pub fn output(&self, vout: u32) -> Option<&TxOut> {
        self.outputs.get(vout as usize)
    }

    pub fn signed_by(&self, key: &PubKey) -> bool {
        self.inputs.iter().any(|input| input.signer.as_ref() == Some(key))
    }
}

/// A confirmed transaction and the height it was included at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub tx: Transaction,
    pub height: Height,
}

/// Where an output was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInfo {
    pub txid: TxId,
    pub input_index: u32,
    pub height: Height,
}

// 10.2: lookups the core needs from the host.
pub trait Ledger {
    fn load_transaction(&self, id: &TxId) -> Option<LedgerEntry>;

    fn spend_locator(&self, output: &OutPoint) -> Option<SpendInfo>;

    fn tip_height(&self) -> Height;

    /// Transactions paying the contract's global address, oldest first.
    fn global_index(&self) -> Vec<TxId>;

    fn load_output(&self, output: &OutPoint) -> Option<TxOut> {
        self.load_transaction(&output.txid)
            .and_then(|entry| entry.tx.output(output.vout).cloned())
    }
}

impl<T: Ledger + ?Sized> Ledger for &T {
    fn load_transaction(&self, id: &TxId) -> Option<LedgerEntry> {
        (**self).load_transaction(id)
    }

    fn spend_locator(&self, output: &OutPoint) -> Option<SpendInfo> {
        (**self).spend_locator(output)
    }

    fn tip_height(&self) -> Height {
        (**self).tip_height()
    }

    fn global_index(&self) -> Vec<TxId> {
        (**self).global_index()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transaction {0} not found")]
    NotFound(TxId),

    #[error("output {0} does not exist")]
    MissingOutput(OutPoint),

    #[error("output {output} already spent by {spender}")]
    DoubleSpend { output: OutPoint, spender: TxId },

    #[error("transaction {0} already in the ledger")]
    Duplicate(TxId),

    #[error("height {height} is below the tip {tip}")]
    HeightRegression { height: Height, tip: Height },
}

// 10.3: in-memory chain. append only, one height per insert.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    entries: HashMap<TxId, LedgerEntry>,
    order: Vec<TxId>,
    spends: BTreeMap<OutPoint, SpendInfo>,
    tip: Height,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves the tip forward without adding transactions.
    pub fn advance_to(&mut self, height: Height) -> Result<(), LedgerError> {
        if height < self.tip {
            return Err(LedgerError::HeightRegression { height, tip: self.tip });
        }
        self.tip = height;
        Ok(())
    }

    /// Confirms `tx` at `height`. Every input must reference an existing,
    /// unspent output. Raises the tip if needed.
    pub fn confirm(&mut self, tx: Transaction, height: Height) -> Result<TxId, LedgerError> {
        if height < self.tip {
            return Err(LedgerError::HeightRegression { height, tip: self.tip });
        }
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(LedgerError::Duplicate(txid));
        }
        let mut seen = BTreeSet::new();
        for input in &tx.inputs {
            if !seen.insert(input.prevout) {
                return Err(LedgerError::DoubleSpend { output: input.prevout, spender: txid });
            }
            let prev = self
                .entries
                .get(&input.prevout.txid)
                .ok_or(LedgerError::NotFound(input.prevout.txid))?;
            if prev.tx.output(input.prevout.vout).is_none() {
                return Err(LedgerError::MissingOutput(input.prevout));
            }
            if let Some(spend) = self.spends.get(&input.prevout) {
                return Err(LedgerError::DoubleSpend { output: input.prevout, spender: spend.txid });
            }
        }

        for (index, input) in tx.inputs.iter().enumerate() {
            self.spends.insert(
                input.prevout,
                SpendInfo { txid, input_index: index as u32, height },
            );
        }
        self.entries.insert(txid, LedgerEntry { tx, height });
        self.order.push(txid);
        self.tip = height;
        Ok(txid)
    }
}

impl Ledger for InMemoryLedger {
    fn load_transaction(&self, id: &TxId) -> Option<LedgerEntry> {
        self.entries.get(id).cloned()
    }

    fn spend_locator(&self, output: &OutPoint) -> Option<SpendInfo> {
        self.spends.get(output).copied()
    }

    fn tip_height(&self) -> Height {
        self.tip
    }

    fn global_index(&self) -> Vec<TxId> {
        self.order
            .iter()
            .filter(|id| {
                self.entries.get(id).is_some_and(|entry| {
                    entry.tx.outputs.iter().any(|out| out.script == Script::ContractGlobal)
                })
            })
            .copied()
            .collect()
    }
}
