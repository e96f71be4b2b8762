//! Ledger client and TwinRegistry bindings

use std::time::{Duration, Instant};

use alloy::{
    network::ReceiptResponse as _,
    primitives::{Address, B256},
    providers::{Provider, RootProvider},
    sol,
    transports::{http::Http, RpcError},
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::contract_info::RegistryHandle;
use crate::error::{LedgerError, TransactionError};
use crate::transaction::{DraftTransaction, SignedTransaction};
use crate::types::ContentDigest;

// Generate contract bindings for TwinRegistry
sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract TwinRegistry {
        function getTwin(string memory id) external view returns (string memory twinId, bytes32 hash);
        function postTwinHash(string memory id, bytes32 hash) external;
    }
}

type HttpTransport = Http<reqwest::Client>;

/// Receipt data the engine keeps for a confirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedReceipt {
    pub block_number: u64,
    pub fee_used: u64,
}

/// Why a mined transaction does not count as an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationFailure {
    /// Execution reverted
    Reverted { fee_used: u64 },
    /// The whole fee budget was consumed
    FeeExhausted { used: u64, budget: u64 },
}

/// Result of waiting for a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Success(ConfirmedReceipt),
    Failed(ConfirmationFailure),
}

impl ConfirmationOutcome {
    /// Classify a receipt. Using exactly the provided budget means the
    /// transaction ran out of fee, even if the ledger reports success.
    pub fn from_receipt(status: bool, fee_used: u64, fee_budget: u64, block_number: u64) -> Self {
        if fee_used >= fee_budget {
            ConfirmationOutcome::Failed(ConfirmationFailure::FeeExhausted {
                used: fee_used,
                budget: fee_budget,
            })
        } else if !status {
            ConfirmationOutcome::Failed(ConfirmationFailure::Reverted { fee_used })
        } else {
            ConfirmationOutcome::Success(ConfirmedReceipt {
                block_number,
                fee_used,
            })
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConfirmationOutcome::Success(_))
    }
}

/// Operations the engine needs from a ledger
///
/// Every call blocks the document loop; implementations are never driven
/// concurrently.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// RPC endpoint this client talks to
    fn endpoint(&self) -> &str;

    /// Chain id reported during the connection handshake
    fn chain_id(&self) -> u64;

    /// Transactions sent from `account`, including pending ones
    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError>;

    /// Current price per fee unit
    async fn fee_unit_price(&self) -> Result<u128, LedgerError>;

    /// Raw fee estimate for a draft, before any safety margin
    async fn estimate_fee(&self, draft: &DraftTransaction) -> Result<u64, TransactionError>;

    /// Broadcast a signed transaction and return its reference
    async fn submit(&self, tx: &SignedTransaction) -> Result<B256, TransactionError>;

    /// Wait for the receipt of a broadcast transaction
    async fn await_confirmation(
        &self,
        reference: B256,
        fee_budget: u64,
    ) -> Result<ConfirmationOutcome, TransactionError>;

    /// Digest the registry holds for `document_id`, `None` if it has none
    async fn read_contract_value(
        &self,
        registry: &RegistryHandle,
        document_id: &str,
    ) -> Result<Option<ContentDigest>, LedgerError>;

    /// Whether the ledger still knows a transaction
    async fn transaction_known(&self, reference: B256) -> Result<bool, LedgerError>;
}

/// JSON-RPC ledger client over HTTP
pub struct AlloyLedger {
    provider: RootProvider<HttpTransport>,
    endpoint: String,
    chain_id: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl AlloyLedger {
    const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;
    const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 500;

    /// Connect and handshake; fails if the endpoint is unreachable
    pub async fn connect(endpoint: &str, connect_timeout: Duration) -> Result<Self, LedgerError> {
        let url: reqwest::Url = endpoint
            .parse()
            .map_err(|_| LedgerError::InvalidEndpoint(endpoint.to_string()))?;

        let provider = RootProvider::<HttpTransport>::new_http(url);

        let chain_id = tokio::time::timeout(connect_timeout, provider.get_chain_id())
            .await
            .map_err(|_| LedgerError::Timeout {
                seconds: connect_timeout.as_secs(),
            })?
            .map_err(|e| LedgerError::ConnectionFailed {
                url: endpoint.to_string(),
                message: e.to_string(),
            })?;

        info!(endpoint = %endpoint, chain_id = chain_id, "Connected to ledger");

        Ok(Self {
            provider,
            endpoint: endpoint.to_string(),
            chain_id,
            confirmation_timeout: Duration::from_secs(Self::DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(Self::DEFAULT_POLL_INTERVAL_MILLIS),
        })
    }

    /// Override how long and how often receipts are polled
    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl LedgerClient for AlloyLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn fee_unit_price(&self) -> Result<u128, LedgerError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn estimate_fee(&self, draft: &DraftTransaction) -> Result<u64, TransactionError> {
        let estimate = self
            .provider
            .estimate_gas(&draft.to_request())
            .await
            .map_err(|e| TransactionError::FeeEstimationFailed(e.to_string()))?;

        Ok(estimate as u64)
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<B256, TransactionError> {
        let pending = self
            .provider
            .send_raw_transaction(&tx.raw)
            .await
            .map_err(|e| match e {
                // The node answered and refused; a nonce conflict still
                // consumed the nonce
                RpcError::ErrorResp(payload) => {
                    TransactionError::rejection(tx.nonce, payload.message.to_string())
                }
                other => TransactionError::SubmissionFailed(other.to_string()),
            })?;

        let reference = *pending.tx_hash();
        if reference != tx.reference {
            warn!(
                expected = %tx.reference,
                returned = %reference,
                "Ledger returned an unexpected transaction hash"
            );
        }

        Ok(reference)
    }

    async fn await_confirmation(
        &self,
        reference: B256,
        fee_budget: u64,
    ) -> Result<ConfirmationOutcome, TransactionError> {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            match self.provider.get_transaction_receipt(reference).await {
                Ok(Some(receipt)) => {
                    let fee_used = receipt.gas_used as u64;
                    let block_number = receipt.block_number.unwrap_or(0);

                    debug!(
                        tx_hash = %reference,
                        block_number = block_number,
                        fee_used = fee_used,
                        "Receipt received"
                    );

                    return Ok(ConfirmationOutcome::from_receipt(
                        receipt.status(),
                        fee_used,
                        fee_budget,
                        block_number,
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %reference, error = %e, "Receipt poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(TransactionError::ConfirmationTimeout {
                    seconds: self.confirmation_timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn read_contract_value(
        &self,
        registry: &RegistryHandle,
        document_id: &str,
    ) -> Result<Option<ContentDigest>, LedgerError> {
        let contract = TwinRegistry::new(registry.address, self.provider.clone());

        let twin = match contract.getTwin(document_id.to_string()).call().await {
            Ok(twin) => twin,
            Err(alloy::contract::Error::TransportError(e)) => {
                if let RpcError::ErrorResp(payload) = &e {
                    // getTwin reverts for ids the registry has never seen
                    debug!(document_id = %document_id, reason = %payload.message, "Twin not in registry");
                    return Ok(None);
                }
                return Err(LedgerError::ContractRead(e.to_string()));
            }
            Err(e) => {
                debug!(document_id = %document_id, error = %e, "Undecodable registry value");
                return Ok(None);
            }
        };

        let digest = ContentDigest::from(twin.hash);
        if twin.twinId != document_id || digest.is_zero() {
            return Ok(None);
        }

        Ok(Some(digest))
    }

    async fn transaction_known(&self, reference: B256) -> Result<bool, LedgerError> {
        let tx = self
            .provider
            .get_transaction_by_hash(reference)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(tx.is_some())
    }
}
