//! Registry transactions, built in three typed steps
//!
//! `DraftTransaction` (payload + nonce) → `FeeEstimatedTransaction`
//! (fee budget and unit price fixed) → `SignedTransaction` (raw bytes and
//! reference). Each step consumes the previous one, so a transaction cannot
//! be signed without fee terms or broadcast unsigned.

use std::fmt;

use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use alloy_sol_types::SolCall;

use crate::client::TwinRegistry;
use crate::error::{ConfigError, TransactionError};
use crate::types::ContentDigest;

/// Signing account for the run; the key never leaves the wallet
#[derive(Clone)]
pub struct LedgerAccount {
    address: Address,
    wallet: EthereumWallet,
}

impl LedgerAccount {
    pub fn from_private_key(private_key: &str) -> Result<Self, ConfigError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPrivateKey)?;
        let address = signer.address();

        Ok(Self {
            address,
            wallet: EthereumWallet::from(signer),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }
}

impl fmt::Debug for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Unsigned registry call with its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTransaction {
    pub from: Address,
    pub to: Address,
    pub chain_id: u64,
    pub nonce: u64,
    pub payload: Bytes,
}

impl DraftTransaction {
    /// `postTwinHash(id, digest)` against the registry
    pub fn post_twin_hash(
        from: Address,
        registry: Address,
        chain_id: u64,
        nonce: u64,
        document_id: &str,
        digest: ContentDigest,
    ) -> Self {
        let call = TwinRegistry::postTwinHashCall {
            id: document_id.to_string(),
            hash: digest.into(),
        };

        Self {
            from,
            to: registry,
            chain_id,
            nonce,
            payload: Bytes::from(call.abi_encode()),
        }
    }

    /// Request shape used for fee estimation
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_nonce(self.nonce)
            .with_chain_id(self.chain_id)
            .with_input(self.payload.clone())
    }

    pub fn with_fee(self, fee: FeeTerms) -> FeeEstimatedTransaction {
        FeeEstimatedTransaction { draft: self, fee }
    }
}

/// Fee budget (gas limit) and unit price for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTerms {
    pub fee_budget: u64,
    pub fee_unit_price: u128,
}

impl FeeTerms {
    /// Multiply the estimate by `margin`, then cap at `ceiling` if one is set
    pub fn from_estimate(
        estimate: u64,
        margin: u64,
        ceiling: Option<u64>,
        fee_unit_price: u128,
    ) -> Result<Self, TransactionError> {
        let padded = estimate.saturating_mul(margin.max(1));

        let fee_budget = match ceiling {
            Some(ceiling) if estimate > ceiling => {
                return Err(TransactionError::EstimateExceedsBudget {
                    estimate,
                    budget: ceiling,
                })
            }
            Some(ceiling) => padded.min(ceiling),
            None => padded,
        };

        Ok(Self {
            fee_budget,
            fee_unit_price,
        })
    }
}

/// Draft with fixed fee terms, ready to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimatedTransaction {
    draft: DraftTransaction,
    fee: FeeTerms,
}

impl FeeEstimatedTransaction {
    /// Sign with the account's wallet
    pub async fn sign(self, account: &LedgerAccount) -> Result<SignedTransaction, TransactionError> {
        if account.address() != self.draft.from {
            return Err(TransactionError::SigningFailed(format!(
                "draft is from {}, signer is {}",
                self.draft.from,
                account.address()
            )));
        }

        let request = self
            .draft
            .to_request()
            .with_gas_limit(self.fee.fee_budget)
            .with_gas_price(self.fee.fee_unit_price);

        let envelope = request
            .build(account.wallet())
            .await
            .map_err(|e| TransactionError::SigningFailed(e.to_string()))?;

        let reference = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        Ok(SignedTransaction {
            from: self.draft.from,
            to: self.draft.to,
            nonce: self.draft.nonce,
            payload: self.draft.payload,
            fee: self.fee,
            reference,
            raw,
        })
    }
}

/// Signed, encoded transaction; only `reference` outlives the broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub payload: Bytes,
    pub fee: FeeTerms,
    pub reference: B256,
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn reference_hex(&self) -> String {
        format!("0x{}", hex::encode(self.reference.as_slice()))
    }

    /// Decode the registry call carried by this transaction
    pub fn decode_post(&self) -> Option<(String, ContentDigest)> {
        TwinRegistry::postTwinHashCall::abi_decode(&self.payload, true)
            .ok()
            .map(|call| (call.id, ContentDigest::from(call.hash)))
    }
}
