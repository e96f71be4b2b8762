//! Anchoring orchestrator
//!
//! Drives every document through hash → decide → submit → record, strictly
//! in collection order and one at a time. A failed document is logged and
//! the loop moves on; only configuration and connectivity problems abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::canonical::Canonicalizer;
use crate::client::{ConfirmationFailure, ConfirmationOutcome, LedgerClient};
use crate::config::{AnchorConfig, RecordPolicy, SaltPolicy};
use crate::contract_info::RegistryHandle;
use crate::detector::{ChangeDecision, ChangeDetector};
use crate::document::{generate_salt, TwinDocument};
use crate::error::{AnchorResult, ConfigError, TransactionError};
use crate::nonce::NonceSequencer;
use crate::store::RecordStore;
use crate::transaction::{DraftTransaction, FeeTerms, LedgerAccount, SignedTransaction};
use crate::types::{AnchorRecord, ContentDigest, DocumentOutcome, DocumentState, RunReport};

/// Anchors a document collection onto the registry
pub struct AnchorService<L: LedgerClient> {
    config: AnchorConfig,
    ledger: L,
    store: Box<dyn RecordStore>,
    registry: RegistryHandle,
    account: LedgerAccount,
    ledger_kind: String,
    canonicalizer: Canonicalizer,
    detector: ChangeDetector,
    sequencer: NonceSequencer,
    cancel: Arc<AtomicBool>,
}

impl<L: LedgerClient> AnchorService<L> {
    /// Create a new anchor service
    ///
    /// Fails if the credential is unusable, cannot write to the registry, or
    /// the configured ledger kind differs from the deployment's.
    pub fn new(
        config: AnchorConfig,
        ledger: L,
        store: Box<dyn RecordStore>,
        registry: RegistryHandle,
    ) -> AnchorResult<Self> {
        let account = LedgerAccount::from_private_key(&config.private_key)?;
        registry.ensure_minter(account.address())?;

        let ledger_kind = match &config.ledger_kind {
            Some(kind) if kind != &registry.ledger_kind => {
                return Err(ConfigError::LedgerKindMismatch {
                    configured: kind.clone(),
                    deployed: registry.ledger_kind.clone(),
                }
                .into())
            }
            Some(kind) => kind.clone(),
            None => registry.ledger_kind.clone(),
        };

        info!(
            address = %account.address(),
            contract = %registry.name,
            "Registry write permission verified"
        );

        let detector = ChangeDetector::from_config(&config, &ledger_kind, ledger.endpoint());
        let canonicalizer = Canonicalizer::new(config.digest_algorithm);

        Ok(Self {
            config,
            ledger,
            store,
            registry,
            account,
            ledger_kind,
            canonicalizer,
            detector,
            sequencer: NonceSequencer::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that stops the run before the next document once set
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn account(&self) -> Address {
        self.account.address()
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Anchor every document that changed since its last anchor
    ///
    /// Returns `Err` only for run-level failures; per-document failures are
    /// in the report.
    pub async fn run(&mut self, documents: Vec<TwinDocument>) -> AnchorResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("anchor_run", run_id = %run_id);
        self.run_documents(run_id, documents).instrument(span).await
    }

    async fn run_documents(
        &mut self,
        run_id: Uuid,
        documents: Vec<TwinDocument>,
    ) -> AnchorResult<RunReport> {
        let mut report = RunReport::new(run_id);
        let account = self.account.address();

        let on_chain_count = self.ledger.transaction_count(account).await?;
        self.sequencer = NonceSequencer::new();
        self.sequencer.initialize(account, on_chain_count)?;

        info!(
            documents = documents.len(),
            account = %account,
            start_nonce = on_chain_count,
            endpoint = %self.ledger.endpoint(),
            record_policy = ?self.config.record_policy,
            salt_policy = ?self.config.salt_policy,
            "Anchor run starting"
        );

        let mut remaining = documents.into_iter();
        while let Some(document) = remaining.next() {
            if self.cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                report.not_attempted.push(document.id);
                report.not_attempted.extend(remaining.by_ref().map(|d| d.id));
                warn!(
                    not_attempted = report.not_attempted.len(),
                    "Cancellation requested, stopping before next document"
                );
                break;
            }

            let outcome = self.anchor_document(document).await;
            report.outcomes.push(outcome);
        }

        report.finished_at = Some(Utc::now());

        info!(
            total = report.outcomes.len(),
            skipped = report.skipped(),
            recorded = report.recorded(),
            failed = report.failed(),
            submitted = report.submitted(),
            cancelled = report.cancelled,
            nonces_used = self.sequencer.issued(account),
            "Anchor run complete"
        );

        Ok(report)
    }

    /// Run one document to a terminal state
    async fn anchor_document(&mut self, document: TwinDocument) -> DocumentOutcome {
        let mut outcome = DocumentOutcome::new(&document.id);
        let document_id = document.id.clone();

        if let Err(e) = self.process(document, &mut outcome).await {
            outcome.fail(&e);
            error!(
                document_id = %document_id,
                error_code = e.error_code(),
                nonce = ?outcome.nonce,
                tx_hash = ?outcome.tx_hash,
                error = %e,
                "FAIL"
            );
        }

        outcome
    }

    async fn process(
        &mut self,
        mut document: TwinDocument,
        outcome: &mut DocumentOutcome,
    ) -> AnchorResult<()> {
        if self.config.salt_policy == SaltPolicy::Always {
            salt_document(&mut document)?;
        }

        let mut digest = self.canonicalizer.digest(&document.content);
        outcome.digest = Some(digest);
        outcome.advance(DocumentState::Hashed)?;

        let decision = self
            .detector
            .decide(
                self.store.as_ref(),
                &self.ledger,
                &self.registry,
                &document.id,
                digest,
            )
            .await;

        match decision {
            ChangeDecision::Unchanged(source) => {
                outcome.advance(DocumentState::Skipped)?;
                info!(document_id = %document.id, digest = %digest, source = ?source, "SKIP");
                return Ok(());
            }
            ChangeDecision::UpdateNeeded(reason) => {
                debug!(document_id = %document.id, reason = %reason, "Anchor needed");
                outcome.advance(DocumentState::NeedsSubmit)?;
            }
        }

        if self.config.salt_policy == SaltPolicy::OnUpdate {
            salt_document(&mut document)?;
            digest = self.canonicalizer.digest(&document.content);
            outcome.digest = Some(digest);
        }

        let account = self.account.address();
        let nonce = self.sequencer.next(account)?;
        outcome.nonce = Some(nonce);

        let signed = match self.prepare(&document.id, digest, nonce).await {
            Ok(signed) => signed,
            Err(e) => {
                self.release_nonce(nonce);
                return Err(e.into());
            }
        };

        let reference = match self.ledger.submit(&signed).await {
            Ok(reference) => reference,
            Err(e) => {
                if matches!(e, TransactionError::NonceConflict { .. }) {
                    self.resync_nonces().await;
                } else if e.never_reached_ledger() {
                    self.release_nonce(nonce);
                }
                return Err(e.into());
            }
        };

        let tx_hash = format!("0x{}", hex::encode(reference.as_slice()));
        outcome.tx_hash = Some(tx_hash.clone());
        outcome.advance(DocumentState::Submitted)?;

        info!(
            document_id = %document.id,
            nonce = nonce,
            tx_hash = %tx_hash,
            fee_budget = signed.fee.fee_budget,
            digest = %digest,
            "SUBMIT"
        );

        let mut record = AnchorRecord {
            document_id: document.id.clone(),
            ledger_kind: self.ledger_kind.clone(),
            node: self.ledger.endpoint().to_string(),
            digest,
            algorithm: self.canonicalizer.algorithm(),
            transaction_reference: tx_hash.clone(),
            anchored_at: Utc::now(),
            confirmed: true,
        };

        if self.config.record_policy == RecordPolicy::AfterBroadcast {
            record.confirmed = false;
            self.store.save(&document.id, &record)?;
            outcome.confirmed = false;
            outcome.advance(DocumentState::Recorded)?;
            info!(document_id = %document.id, tx_hash = %tx_hash, "Recorded after broadcast");
            return Ok(());
        }

        match self
            .ledger
            .await_confirmation(reference, signed.fee.fee_budget)
            .await?
        {
            ConfirmationOutcome::Success(receipt) => {
                outcome.fee_used = Some(receipt.fee_used);
                outcome.confirmed = true;
                outcome.advance(DocumentState::Confirmed)?;

                record.anchored_at = Utc::now();
                self.store.save(&document.id, &record)?;
                outcome.advance(DocumentState::Recorded)?;

                info!(
                    document_id = %document.id,
                    tx_hash = %tx_hash,
                    block_number = receipt.block_number,
                    fee_used = receipt.fee_used,
                    "Anchor confirmed and recorded"
                );
                Ok(())
            }
            ConfirmationOutcome::Failed(ConfirmationFailure::FeeExhausted { used, budget }) => {
                outcome.fee_used = Some(used);
                Err(TransactionError::FeeExhausted { used, budget }.into())
            }
            ConfirmationOutcome::Failed(ConfirmationFailure::Reverted { fee_used }) => {
                outcome.fee_used = Some(fee_used);
                Err(TransactionError::Reverted { tx_hash }.into())
            }
        }
    }

    /// Build, fee-estimate and sign the registry call
    async fn prepare(
        &self,
        document_id: &str,
        digest: ContentDigest,
        nonce: u64,
    ) -> Result<SignedTransaction, TransactionError> {
        let draft = DraftTransaction::post_twin_hash(
            self.account.address(),
            self.registry.address,
            self.ledger.chain_id(),
            nonce,
            document_id,
            digest,
        );

        let ceiling = self.config.fee_ceiling();
        let estimate = match self.ledger.estimate_fee(&draft).await {
            Ok(estimate) => estimate,
            Err(e) => match ceiling {
                Some(budget) => {
                    warn!(
                        document_id = %document_id,
                        error = %e,
                        fee_budget = budget,
                        "Fee estimation failed, using configured budget"
                    );
                    budget
                }
                None => return Err(e),
            },
        };

        let price = self
            .ledger
            .fee_unit_price()
            .await
            .map_err(|e| TransactionError::FeeEstimationFailed(e.to_string()))?;

        let fee = FeeTerms::from_estimate(estimate, self.config.fee_margin, ceiling, price)?;

        debug!(
            document_id = %document_id,
            nonce = nonce,
            estimate = estimate,
            fee_budget = fee.fee_budget,
            fee_unit_price = fee.fee_unit_price,
            "Transaction fee fixed"
        );

        draft.with_fee(fee).sign(&self.account).await
    }

    /// Keep a conflicting nonce spent and catch up with the ledger's count
    async fn resync_nonces(&mut self) {
        let account = self.account.address();
        let count = match self.ledger.transaction_count(account).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not re-read transaction count after nonce conflict");
                return;
            }
        };
        match self.sequencer.resync(account, count) {
            Ok(next) => debug!(on_chain_count = count, next_nonce = next, "Nonce sequence resynced"),
            Err(e) => warn!(error = %e, "Could not resync nonce sequence"),
        }
    }

    fn release_nonce(&mut self, nonce: u64) {
        let account = self.account.address();
        match self.sequencer.release(account, nonce) {
            Ok(()) => debug!(nonce = nonce, "Nonce released for reuse"),
            Err(e) => warn!(nonce = nonce, error = %e, "Could not release nonce"),
        }
    }
}

fn salt_document(document: &mut TwinDocument) -> AnchorResult<()> {
    document.apply_salt(generate_salt());
    document.write_back()?;
    debug!(document_id = %document.id, salt = ?document.salt(), "Document salted");
    Ok(())
}
