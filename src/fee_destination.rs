// 12.0: where open fees go. derived once from a bootstrap transaction and
// never recomputed. the host must hold its chain-state lock while the value
// is first read, which `get_or_bootstrap` asks for as a guard.

use crate::ledger::{Ledger, Script};
use crate::types::TxId;
use std::sync::{MutexGuard, OnceLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeDestinationError {
    #[error("bootstrap transaction {0} not found")]
    BootstrapMissing(TxId),

    #[error("bootstrap transaction {0} has no outputs")]
    NoOutput(TxId),
}

/// Write-once fee destination script.
#[derive(Debug, Default)]
pub struct FeeDestinationCell {
    cell: OnceLock<Script>,
}

/// Process-wide fee destination.
pub static FEE_DESTINATION: FeeDestinationCell = FeeDestinationCell::new();

impl FeeDestinationCell {
    pub const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    pub fn get(&self) -> Option<&Script> {
        self.cell.get()
    }

    /// Returns the stored script, reading output 0 of `bootstrap` on first
    /// use. `_chain_lock` is the host's chain-state guard.
    pub fn get_or_bootstrap<T, L: Ledger + ?Sized>(
        &self,
        _chain_lock: &MutexGuard<'_, T>,
        ledger: &L,
        bootstrap: &TxId,
    ) -> Result<&Script, FeeDestinationError> {
        if let Some(script) = self.cell.get() {
            return Ok(script);
        }

        let entry = ledger
            .load_transaction(bootstrap)
            .ok_or(FeeDestinationError::BootstrapMissing(*bootstrap))?;
        let script = entry
            .tx
            .output(0)
            .map(|out| out.script.clone())
            .ok_or(FeeDestinationError::NoOutput(*bootstrap))?;

        if self.cell.set(script).is_ok() {
            info!(bootstrap = %bootstrap, "fee destination initialised");
        }
        // set only fails when another caller already stored a value
        self.cell.get().ok_or(FeeDestinationError::NoOutput(*bootstrap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, Transaction, TxOut};
    use crate::types::{Amount, Height};
    use std::sync::Mutex;

    #[test]
    fn bootstraps_once() {
        let chain_lock = Mutex::new(());
        let mut ledger = InMemoryLedger::new();
        let fee_script = Script::Raw(vec![0xAB; 25]);
        let first = ledger
            .confirm(Transaction::new(vec![], vec![TxOut::new(Amount(1), fee_script.clone())]), Height(1))
            .unwrap();
        let second = ledger
            .confirm(Transaction::new(vec![], vec![TxOut::new(Amount(2), Script::GlobalMarker)]), Height(2))
            .unwrap();

        let cell = FeeDestinationCell::new();
        assert!(cell.get().is_none());
        {
            let guard = chain_lock.lock().unwrap();
            assert_eq!(cell.get_or_bootstrap(&guard, &ledger, &first), Ok(&fee_script));
            // later calls never re-read
            assert_eq!(cell.get_or_bootstrap(&guard, &ledger, &second), Ok(&fee_script));
        }
        assert_eq!(cell.get(), Some(&fee_script));
    }

    #[test]
    fn missing_bootstrap_leaves_cell_empty() {
        let chain_lock = Mutex::new(());
        let ledger = InMemoryLedger::new();
        let cell = FeeDestinationCell::new();
        let guard = chain_lock.lock().unwrap();
        let id = TxId([4; 32]);
        assert_eq!(cell.get_or_bootstrap(&guard, &ledger, &id), Err(FeeDestinationError::BootstrapMissing(id)));
        assert!(cell.get().is_none());
    }
}
