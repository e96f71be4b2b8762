//! Decides whether a document needs a new anchor
//!
//! False positives (a redundant anchor) are acceptable, false negatives are
//! not: every lookup failure resolves to "update needed".

use std::fmt;

use alloy::primitives::B256;
use tracing::{debug, warn};

use crate::canonical::DigestAlgorithm;
use crate::client::LedgerClient;
use crate::config::AnchorConfig;
use crate::contract_info::RegistryHandle;
use crate::error::RecordError;
use crate::store::RecordStore;
use crate::types::{AnchorRecord, ContentDigest};

/// What confirmed an unchanged document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    LocalRecord,
    Ledger,
}

/// Why a document needs anchoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateReason {
    /// No usable local record and no ledger confirmation
    NoRecord,
    /// Local record holds an older digest
    DigestChanged { recorded: ContentDigest },
    /// Local record exists but cannot be trusted
    StaleRecord(String),
    /// Registry holds a different digest
    LedgerMismatch { stored: ContentDigest },
    /// Registry lookup failed
    LedgerUnavailable(String),
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateReason::NoRecord => f.write_str("no anchor record"),
            UpdateReason::DigestChanged { recorded } => write!(f, "content changed since {recorded}"),
            UpdateReason::StaleRecord(cause) => write!(f, "stale record: {cause}"),
            UpdateReason::LedgerMismatch { stored } => write!(f, "registry holds {stored}"),
            UpdateReason::LedgerUnavailable(cause) => write!(f, "registry lookup failed: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    Unchanged(DecisionSource),
    UpdateNeeded(UpdateReason),
}

impl ChangeDecision {
    pub fn needs_update(&self) -> bool {
        matches!(self, ChangeDecision::UpdateNeeded(_))
    }
}

/// Compares fresh digests against the local record, then optionally the
/// registry
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    ledger_kind: String,
    node: String,
    algorithm: DigestAlgorithm,
    cross_check: bool,
    verify_reference: bool,
}

impl ChangeDetector {
    /// Records written for another `ledger_kind` or `node` are stale
    pub fn new(ledger_kind: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            ledger_kind: ledger_kind.into(),
            node: node.into(),
            algorithm: DigestAlgorithm::default(),
            cross_check: false,
            verify_reference: false,
        }
    }

    pub fn from_config(config: &AnchorConfig, ledger_kind: &str, node: &str) -> Self {
        Self::new(ledger_kind, node)
            .with_algorithm(config.digest_algorithm)
            .with_cross_check(config.ledger_cross_check)
            .with_reference_check(config.verify_record_reference)
    }

    /// Records hashed with another algorithm are stale
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Ask the registry when there is no usable local record
    pub fn with_cross_check(mut self, enabled: bool) -> Self {
        self.cross_check = enabled;
        self
    }

    /// Require the ledger to still know a record's transaction
    pub fn with_reference_check(mut self, enabled: bool) -> Self {
        self.verify_reference = enabled;
        self
    }

    /// Reject records written against another ledger
    pub fn check_record(&self, record: &AnchorRecord) -> Result<(), RecordError> {
        if record.ledger_kind != self.ledger_kind {
            return Err(RecordError::LedgerMismatch {
                field: "ledgerKind",
                recorded: record.ledger_kind.clone(),
                current: self.ledger_kind.clone(),
            });
        }
        if record.node != self.node {
            return Err(RecordError::LedgerMismatch {
                field: "node",
                recorded: record.node.clone(),
                current: self.node.clone(),
            });
        }
        if record.algorithm != self.algorithm {
            return Err(RecordError::LedgerMismatch {
                field: "algorithm",
                recorded: record.algorithm.to_string(),
                current: self.algorithm.to_string(),
            });
        }
        Ok(())
    }

    pub async fn decide<L: LedgerClient + ?Sized>(
        &self,
        store: &dyn RecordStore,
        ledger: &L,
        registry: &RegistryHandle,
        document_id: &str,
        fresh: ContentDigest,
    ) -> ChangeDecision {
        let mut fallback = UpdateReason::NoRecord;

        match store.read(document_id) {
            Ok(Some(record)) => match self.check_record(&record) {
                Ok(()) if record.digest != fresh => {
                    return ChangeDecision::UpdateNeeded(UpdateReason::DigestChanged {
                        recorded: record.digest,
                    });
                }
                Ok(()) => match self.verify_record_reference(ledger, &record).await {
                    Ok(()) => return ChangeDecision::Unchanged(DecisionSource::LocalRecord),
                    Err(e) => {
                        warn!(document_id = %document_id, error = %e, "Treating anchor record as stale");
                        fallback = UpdateReason::StaleRecord(e.to_string());
                    }
                },
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "Treating anchor record as stale");
                    fallback = UpdateReason::StaleRecord(e.to_string());
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "Treating anchor record as stale");
                fallback = UpdateReason::StaleRecord(e.to_string());
            }
        }

        if !self.cross_check {
            return ChangeDecision::UpdateNeeded(fallback);
        }

        match ledger.read_contract_value(registry, document_id).await {
            Ok(Some(stored)) if stored == fresh => {
                debug!(document_id = %document_id, digest = %fresh, "Registry confirms digest");
                ChangeDecision::Unchanged(DecisionSource::Ledger)
            }
            Ok(Some(stored)) => ChangeDecision::UpdateNeeded(UpdateReason::LedgerMismatch { stored }),
            Ok(None) => ChangeDecision::UpdateNeeded(fallback),
            Err(e) => {
                debug!(document_id = %document_id, error = %e, "Registry cross-check failed");
                ChangeDecision::UpdateNeeded(UpdateReason::LedgerUnavailable(e.to_string()))
            }
        }
    }

    /// Shorthand for `decide(..).needs_update()`
    pub async fn needs_update<L: LedgerClient + ?Sized>(
        &self,
        store: &dyn RecordStore,
        ledger: &L,
        registry: &RegistryHandle,
        document_id: &str,
        fresh: ContentDigest,
    ) -> bool {
        self.decide(store, ledger, registry, document_id, fresh)
            .await
            .needs_update()
    }

    async fn verify_record_reference<L: LedgerClient + ?Sized>(
        &self,
        ledger: &L,
        record: &AnchorRecord,
    ) -> Result<(), RecordError> {
        if !self.verify_reference {
            return Ok(());
        }

        let unknown = || RecordError::UnknownReference(record.transaction_reference.clone());
        let reference: B256 = record
            .transaction_reference
            .parse()
            .map_err(|_| unknown())?;

        match ledger.transaction_known(reference).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(unknown()),
            Err(e) => {
                debug!(tx_hash = %reference, error = %e, "Reference lookup failed");
                Err(unknown())
            }
        }
    }
}
