//! Error types for the anchoring engine
//!
//! Errors are split by the boundary they stop at: configuration and
//! connectivity problems abort the whole run, transaction problems only fail
//! the document being anchored, and record problems downgrade to
//! "needs anchoring".

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the anchoring engine
#[derive(Error, Debug)]
pub enum AnchorError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ledger connectivity errors
    #[error("Ledger connection error: {0}")]
    Ledger(#[from] LedgerError),

    /// Local anchor record errors
    #[error("Anchor record error: {0}")]
    Record(#[from] RecordError),

    /// Transaction errors
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid private key format")]
    InvalidPrivateKey,

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Failed to read contract info {}: {message}", .path.display())]
    ContractInfo { path: PathBuf, message: String },

    #[error("Contract {name} not found in {}", .path.display())]
    MissingContract { name: String, path: PathBuf },

    #[error("Signer {signer} has no write permission on {contract} (minter is {minter})")]
    NotMinter {
        signer: String,
        minter: String,
        contract: String,
    },

    #[error("Ledger kind mismatch: configured {configured}, contract deployed on {deployed}")]
    LedgerKindMismatch { configured: String, deployed: String },

    #[error("Cannot read document folders at {}: {message}", .path.display())]
    DocumentsDir { path: PathBuf, message: String },

    #[error("Twin is missing file: {}", .0.display())]
    MissingDocument(PathBuf),

    #[error("Invalid twin document {}: {message}", .path.display())]
    InvalidDocument { path: PathBuf, message: String },

    #[error("Duplicate twin id {id} in {}", .path.display())]
    DuplicateDocumentId { id: String, path: PathBuf },
}

/// Ledger connectivity errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid ledger endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to connect to ledger RPC at {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Ledger RPC request failed: {0}")]
    Rpc(String),

    #[error("Ledger connection timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Registry read failed: {0}")]
    ContractRead(String),
}

/// Local record errors; every variant except a failed write means the
/// record is stale and the document needs anchoring
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Cannot read anchor record {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("Corrupt anchor record {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("Anchor record belongs to {found}, expected {expected}")]
    DocumentMismatch { expected: String, found: String },

    #[error("Anchor record {field} is {recorded}, current run uses {current}")]
    LedgerMismatch {
        field: &'static str,
        recorded: String,
        current: String,
    },

    #[error("Ledger no longer knows transaction {0}")]
    UnknownReference(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Failed to write anchor record {}: {message}", .path.display())]
    WriteFailed { path: PathBuf, message: String },
}

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction failed to submit: {0}")]
    SubmissionFailed(String),

    #[error("Transaction rejected by ledger: {reason}")]
    Rejected { reason: String },

    #[error("Nonce {nonce} already used on the ledger: {reason}")]
    NonceConflict { nonce: u64, reason: String },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Out of gas: used {used} of {budget}; increase DLT_GAS_PROVIDED={budget} if this transaction should succeed")]
    FeeExhausted { used: u64, budget: u64 },

    #[error("Fee estimate {estimate} exceeds fee budget DLT_GAS_PROVIDED={budget}")]
    EstimateExceedsBudget { estimate: u64, budget: u64 },

    #[error("Fee estimation failed: {0}")]
    FeeEstimationFailed(String),

    #[error("Transaction timed out waiting for confirmation after {seconds}s")]
    ConfirmationTimeout { seconds: u64 },

    #[error("Nonce error: {0}")]
    NonceError(String),

    #[error("Failed to sign transaction: {0}")]
    SigningFailed(String),

    #[error("Failed to encode transaction data: {0}")]
    EncodingError(String),
}

// Node refusals meaning the nonce is already taken by another transaction
const NONCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "already known",
    "known transaction",
    "replacement transaction underpriced",
    "nonce has already been used",
];

/// How far an error is allowed to propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Treated as "needs anchoring", never surfaced as a failure
    Recoverable,
    /// Fails the current document only
    Document,
    /// Aborts the run before or between documents
    Fatal,
}

impl AnchorError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AnchorError::Config(_) => ErrorSeverity::Fatal,
            AnchorError::Ledger(_) => ErrorSeverity::Fatal,
            AnchorError::Record(e) => e.severity(),
            AnchorError::Transaction(_) => ErrorSeverity::Document,
            AnchorError::Internal(_) => ErrorSeverity::Document,
        }
    }

    /// Check if this error must stop the run
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Fatal)
    }

    /// Get a short error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            AnchorError::Config(_) => "CONFIG_ERROR",
            AnchorError::Ledger(_) => "CONNECTIVITY_ERROR",
            AnchorError::Record(RecordError::WriteFailed { .. }) => "RECORD_WRITE_ERROR",
            AnchorError::Record(_) => "STALE_RECORD",
            AnchorError::Transaction(e) => e.error_code(),
            AnchorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl RecordError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            RecordError::WriteFailed { .. } => ErrorSeverity::Document,
            _ => ErrorSeverity::Recoverable,
        }
    }
}

impl TransactionError {
    fn error_code(&self) -> &'static str {
        match self {
            TransactionError::FeeExhausted { .. } => "FEE_EXHAUSTED",
            TransactionError::EstimateExceedsBudget { .. } => "FEE_EXHAUSTED",
            _ => "SUBMISSION_FAILURE",
        }
    }

    /// Classify a node's refusal to accept a broadcast of `nonce`
    pub fn rejection(nonce: u64, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let lowered = reason.to_ascii_lowercase();
        if NONCE_CONFLICT_MARKERS.iter().any(|m| lowered.contains(m)) {
            TransactionError::NonceConflict { nonce, reason }
        } else {
            TransactionError::Rejected { reason }
        }
    }

    /// Whether the ledger definitely did not accept the transaction, so its
    /// nonce was never consumed
    pub fn never_reached_ledger(&self) -> bool {
        matches!(
            self,
            TransactionError::Rejected { .. }
                | TransactionError::EstimateExceedsBudget { .. }
                | TransactionError::FeeEstimationFailed(_)
                | TransactionError::SigningFailed(_)
                | TransactionError::EncodingError(_)
        )
    }
}

/// Result type alias using AnchorError
pub type AnchorResult<T> = std::result::Result<T, AnchorError>;

/// Extension trait for converting foreign errors to AnchorError
pub trait ResultExt<T> {
    /// Convert to AnchorError with context
    fn anchor_context(self, context: &str) -> AnchorResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn anchor_context(self, context: &str) -> AnchorResult<T> {
        self.map_err(|e| AnchorError::Internal(format!("{}: {}", context, e)))
    }
}
