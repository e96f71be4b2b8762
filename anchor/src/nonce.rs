//! Per-run nonce allocation
//!
//! The ledger's live transaction count lags behind un-confirmed submissions,
//! so it is read once per account at run start and the sequencer owns the
//! counter from then on. Allocation order is submission order.

use std::collections::HashMap;

use alloy::primitives::Address;

use crate::error::TransactionError;

#[derive(Debug, Clone, Copy)]
struct AccountSequence {
    start: u64,
    next: u64,
}

/// Strictly increasing, gap-free nonces per account for one run
#[derive(Debug, Default)]
pub struct NonceSequencer {
    accounts: HashMap<Address, AccountSequence>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account from its on-ledger transaction count; once per run
    pub fn initialize(&mut self, account: Address, on_chain_count: u64) -> Result<(), TransactionError> {
        if self.accounts.contains_key(&account) {
            return Err(TransactionError::NonceError(format!(
                "sequence for {account} already initialized"
            )));
        }

        self.accounts.insert(
            account,
            AccountSequence {
                start: on_chain_count,
                next: on_chain_count,
            },
        );
        Ok(())
    }

    /// Allocate the next nonce for `account`
    pub fn next(&mut self, account: Address) -> Result<u64, TransactionError> {
        let sequence = self.accounts.get_mut(&account).ok_or_else(|| {
            TransactionError::NonceError(format!("sequence for {account} not initialized"))
        })?;

        let nonce = sequence.next;
        sequence.next = nonce
            .checked_add(1)
            .ok_or_else(|| TransactionError::NonceError("nonce overflow".into()))?;
        Ok(nonce)
    }

    /// Hand back the most recent nonce when its transaction never reached
    /// the ledger, so the next submission reuses it
    pub fn release(&mut self, account: Address, nonce: u64) -> Result<(), TransactionError> {
        let sequence = self.accounts.get_mut(&account).ok_or_else(|| {
            TransactionError::NonceError(format!("sequence for {account} not initialized"))
        })?;

        if sequence.next == sequence.start || sequence.next - 1 != nonce {
            return Err(TransactionError::NonceError(format!(
                "cannot release nonce {nonce}; last issued is {}",
                sequence.next.wrapping_sub(1)
            )));
        }

        sequence.next = nonce;
        Ok(())
    }

    /// Move past nonces the ledger already holds; never moves backwards
    pub fn resync(&mut self, account: Address, on_chain_count: u64) -> Result<u64, TransactionError> {
        let sequence = self.accounts.get_mut(&account).ok_or_else(|| {
            TransactionError::NonceError(format!("sequence for {account} not initialized"))
        })?;

        sequence.next = sequence.next.max(on_chain_count);
        Ok(sequence.next)
    }

    /// Nonce the next call to `next` would return
    pub fn peek(&self, account: Address) -> Option<u64> {
        self.accounts.get(&account).map(|s| s.next)
    }

    /// Nonces handed out (and not released) since initialization
    pub fn issued(&self, account: Address) -> u64 {
        self.accounts
            .get(&account)
            .map(|s| s.next - s.start)
            .unwrap_or(0)
    }
}
