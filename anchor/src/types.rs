//! Types for the anchoring engine

use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::canonical::DigestAlgorithm;
use crate::error::{AnchorError, RecordError};

/// Fixed-length digest of a document's canonical encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Digest length in bytes
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 0x-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The all-zero value a registry returns for unknown ids
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| RecordError::InvalidDigest(e.to_string()))?;

        if bytes.len() != Self::LEN {
            return Err(RecordError::InvalidDigest(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl From<B256> for ContentDigest {
    fn from(value: B256) -> Self {
        Self(value.0)
    }
}

impl From<ContentDigest> for B256 {
    fn from(value: ContentDigest) -> Self {
        B256::from(value.0)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Proof that a document's digest was anchored on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    /// Twin identifier the record belongs to
    pub document_id: String,

    /// Ledger kind identifier (DLT_TYPE) the anchor was written to
    pub ledger_kind: String,

    /// RPC endpoint the anchor was written through
    pub node: String,

    /// Anchored content digest
    pub digest: ContentDigest,

    /// Hash function that produced `digest`
    #[serde(default)]
    pub algorithm: DigestAlgorithm,

    /// Hash of the anchoring transaction
    pub transaction_reference: String,

    /// When the record was written
    pub anchored_at: DateTime<Utc>,

    /// False when written right after broadcast, before any receipt
    #[serde(default = "default_confirmed")]
    pub confirmed: bool,
}

fn default_confirmed() -> bool {
    true
}

/// Per-document pipeline state
///
/// `PENDING → HASHED → {SKIPPED | NEEDS_SUBMIT} → SUBMITTED → {CONFIRMED → RECORDED | FAILED}`.
/// Failures before submission (salting, signing, fee estimation) also land in
/// `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    Pending,
    Hashed,
    Skipped,
    NeedsSubmit,
    Submitted,
    Confirmed,
    Recorded,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "PENDING",
            DocumentState::Hashed => "HASHED",
            DocumentState::Skipped => "SKIPPED",
            DocumentState::NeedsSubmit => "NEEDS_SUBMIT",
            DocumentState::Submitted => "SUBMITTED",
            DocumentState::Confirmed => "CONFIRMED",
            DocumentState::Recorded => "RECORDED",
            DocumentState::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(&self, next: DocumentState) -> bool {
        use DocumentState::*;

        matches!(
            (self, next),
            (Pending, Hashed)
                | (Pending, Failed)
                | (Hashed, Skipped)
                | (Hashed, NeedsSubmit)
                | (NeedsSubmit, Submitted)
                | (NeedsSubmit, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Recorded)
                | (Submitted, Failed)
                | (Confirmed, Recorded)
                | (Confirmed, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentState::Skipped | DocumentState::Recorded | DocumentState::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DocumentState::Skipped | DocumentState::Recorded)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one document's pass through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub state: DocumentState,
    pub digest: Option<ContentDigest>,
    pub nonce: Option<u64>,
    pub tx_hash: Option<String>,
    pub fee_used: Option<u64>,
    /// False for after-broadcast records, whose transaction was not awaited
    pub confirmed: bool,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
}

impl DocumentOutcome {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            state: DocumentState::Pending,
            digest: None,
            nonce: None,
            tx_hash: None,
            fee_used: None,
            confirmed: false,
            error: None,
            error_code: None,
        }
    }

    /// Move to `next`, refusing transitions the pipeline does not allow
    pub fn advance(&mut self, next: DocumentState) -> Result<(), AnchorError> {
        if !self.state.can_transition_to(next) {
            return Err(AnchorError::Internal(format!(
                "invalid state transition for {}: {} -> {}",
                self.document_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Terminate in `FAILED`, keeping the cause
    pub fn fail(&mut self, error: &AnchorError) {
        self.state = DocumentState::Failed;
        self.error = Some(error.to_string());
        self.error_code = Some(error.error_code());
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Aggregated result of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<DocumentOutcome>,
    /// Documents never attempted because cancellation was requested
    pub not_attempted: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            not_attempted: Vec::new(),
            cancelled: false,
        }
    }

    fn count(&self, state: DocumentState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn skipped(&self) -> usize {
        self.count(DocumentState::Skipped)
    }

    pub fn recorded(&self) -> usize {
        self.count(DocumentState::Recorded)
    }

    pub fn failed(&self) -> usize {
        self.count(DocumentState::Failed)
    }

    /// Documents whose transaction reached the ledger
    pub fn submitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.tx_hash.is_some()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn outcome(&self, document_id: &str) -> Option<&DocumentOutcome> {
        self.outcomes.iter().find(|o| o.document_id == document_id)
    }

    /// Process exit status: 0 only if every document succeeded
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() || self.cancelled {
            1
        } else {
            0
        }
    }
}
