//! In-memory ledger for integration testing
//!
//! Mines every accepted transaction immediately, enforces contiguous nonces
//! the way a real node does, and records every submission so tests can
//! assert on ordering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use twin_anchor::{
    client::{ConfirmationOutcome, LedgerClient},
    contract_info::RegistryHandle,
    error::{LedgerError, TransactionError},
    transaction::{DraftTransaction, SignedTransaction},
    types::ContentDigest,
};

pub const MEMORY_ENDPOINT: &str = "memory://ledger";

/// One transaction accepted by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub document_id: String,
    pub digest: ContentDigest,
    pub nonce: u64,
    pub fee_budget: u64,
    pub reference: B256,
}

#[derive(Debug, Clone, Copy)]
enum Fate {
    Success,
    Exhausted,
    Reverted,
}

#[derive(Debug)]
pub struct LedgerState {
    pub transaction_count: u64,
    pub count_lag: u64,
    pub submissions: Vec<Submission>,
    pub registry: HashMap<String, ContentDigest>,
    pub estimate: u64,
    pub fee_unit_price: u128,
    pub fail_estimate: bool,
    pub count_unavailable: bool,
    pub exhaust_fee_for: HashSet<String>,
    pub reject_for: HashSet<String>,
    pub revert_for: HashSet<String>,
    pub confirmations_awaited: usize,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    mined: HashMap<B256, Fate>,
    block_number: u64,
}

/// Shared-state ledger double; clones observe the same ledger
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    /// Ledger where the signing account has sent `transaction_count` txs
    pub fn new(transaction_count: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                transaction_count,
                count_lag: 0,
                submissions: Vec::new(),
                registry: HashMap::new(),
                estimate: 50_000,
                fee_unit_price: 1_000_000_000,
                fail_estimate: false,
                count_unavailable: false,
                exhaust_fee_for: HashSet::new(),
                reject_for: HashSet::new(),
                revert_for: HashSet::new(),
                confirmations_awaited: 0,
                cancel_after: None,
                mined: HashMap::new(),
                block_number: 1,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    /// Consume the whole fee budget when `document_id` is anchored
    pub fn exhaust_fee_for(&self, document_id: &str) {
        self.state().exhaust_fee_for.insert(document_id.to_string());
    }

    /// Report a transaction count `lag` behind the nonce the ledger expects
    pub fn lag_reported_count(&self, lag: u64) {
        self.state().count_lag = lag;
    }

    /// Refuse `document_id` at broadcast, leaving the nonce unused
    pub fn reject(&self, document_id: &str) {
        self.state().reject_for.insert(document_id.to_string());
    }

    pub fn revert(&self, document_id: &str) {
        self.state().revert_for.insert(document_id.to_string());
    }

    /// Raise `flag` once `count` transactions have been accepted
    pub fn cancel_after(&self, count: usize, flag: Arc<AtomicBool>) {
        self.state().cancel_after = Some((count, flag));
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.state().submissions.iter().map(|s| s.nonce).collect()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.state()
            .submissions
            .iter()
            .map(|s| s.document_id.clone())
            .collect()
    }

    pub fn registry_value(&self, document_id: &str) -> Option<ContentDigest> {
        self.state().registry.get(document_id).copied()
    }

    /// Forget every mined transaction, as after a chain reset
    pub fn forget_transactions(&self) {
        self.state().mined.clear();
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    fn endpoint(&self) -> &str {
        MEMORY_ENDPOINT
    }

    fn chain_id(&self) -> u64 {
        1337
    }

    async fn transaction_count(&self, _account: Address) -> Result<u64, LedgerError> {
        let state = self.state();
        if state.count_unavailable {
            return Err(LedgerError::ConnectionFailed {
                url: MEMORY_ENDPOINT.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(state.transaction_count.saturating_sub(state.count_lag))
    }

    async fn fee_unit_price(&self) -> Result<u128, LedgerError> {
        Ok(self.state().fee_unit_price)
    }

    async fn estimate_fee(&self, _draft: &DraftTransaction) -> Result<u64, TransactionError> {
        let state = self.state();
        if state.fail_estimate {
            return Err(TransactionError::FeeEstimationFailed(
                "execution reverted during estimation".into(),
            ));
        }
        Ok(state.estimate)
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<B256, TransactionError> {
        let (document_id, digest) = tx
            .decode_post()
            .ok_or_else(|| TransactionError::EncodingError("not a postTwinHash call".into()))?;

        let mut state = self.state();

        if tx.nonce < state.transaction_count {
            return Err(TransactionError::rejection(
                tx.nonce,
                format!(
                    "nonce too low: next nonce {}, tx nonce {}",
                    state.transaction_count, tx.nonce
                ),
            ));
        }
        if tx.nonce > state.transaction_count {
            return Err(TransactionError::Rejected {
                reason: format!(
                    "nonce gap: next nonce {}, tx nonce {}",
                    state.transaction_count, tx.nonce
                ),
            });
        }

        if state.reject_for.contains(&document_id) {
            return Err(TransactionError::rejection(
                tx.nonce,
                "insufficient funds for gas * price + value",
            ));
        }

        let fate = if state.exhaust_fee_for.contains(&document_id) {
            Fate::Exhausted
        } else if state.revert_for.contains(&document_id) {
            Fate::Reverted
        } else {
            state.registry.insert(document_id.clone(), digest);
            Fate::Success
        };

        state.transaction_count += 1;
        state.mined.insert(tx.reference, fate);
        state.submissions.push(Submission {
            document_id,
            digest,
            nonce: tx.nonce,
            fee_budget: tx.fee.fee_budget,
            reference: tx.reference,
        });

        if let Some((count, flag)) = &state.cancel_after {
            if state.submissions.len() >= *count {
                flag.store(true, Ordering::SeqCst);
            }
        }

        Ok(tx.reference)
    }

    async fn await_confirmation(
        &self,
        reference: B256,
        fee_budget: u64,
    ) -> Result<ConfirmationOutcome, TransactionError> {
        let mut state = self.state();
        state.confirmations_awaited += 1;
        state.block_number += 1;

        let fate = *state
            .mined
            .get(&reference)
            .ok_or(TransactionError::ConfirmationTimeout { seconds: 0 })?;

        let block = state.block_number;
        let used = state.estimate.min(fee_budget.saturating_sub(1));
        Ok(match fate {
            Fate::Success => ConfirmationOutcome::from_receipt(true, used, fee_budget, block),
            Fate::Exhausted => ConfirmationOutcome::from_receipt(true, fee_budget, fee_budget, block),
            Fate::Reverted => ConfirmationOutcome::from_receipt(false, used, fee_budget, block),
        })
    }

    async fn read_contract_value(
        &self,
        _registry: &RegistryHandle,
        document_id: &str,
    ) -> Result<Option<ContentDigest>, LedgerError> {
        Ok(self.state().registry.get(document_id).copied())
    }

    async fn transaction_known(&self, reference: B256) -> Result<bool, LedgerError> {
        Ok(self.state().mined.contains_key(&reference))
    }
}
