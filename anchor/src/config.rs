//! Configuration for the anchoring engine
//!
//! Built once at startup from defaults, an optional TOML file and the
//! environment (highest precedence), then handed to every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::canonical::DigestAlgorithm;
use crate::error::ConfigError;
use crate::store::RecordLayout;

/// When a salt is injected into a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaltPolicy {
    /// Documents are never rewritten
    #[default]
    Never,
    /// Fresh salt only for documents that already need anchoring
    OnUpdate,
    /// Fresh salt before hashing, so every run anchors
    Always,
}

/// When the local anchor record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordPolicy {
    /// After a successful receipt
    #[default]
    AfterConfirmation,
    /// Right after broadcast; the receipt is not awaited
    AfterBroadcast,
}

/// Anchoring engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    /// Ledger kind identifier (DLT_TYPE)
    #[serde(default)]
    pub ledger_kind: Option<String>,

    /// RPC endpoint; falls back to the node in the contract info file
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Signing credential
    #[serde(default)]
    pub private_key: String,

    /// Fee budget ceiling per transaction (0 = no ceiling)
    #[serde(default)]
    pub fee_budget: u64,

    /// Multiplier applied to the fee estimate
    #[serde(default = "default_fee_margin")]
    pub fee_margin: u64,

    /// Root holding one folder per twin
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,

    /// Document file expected in every twin folder
    #[serde(default = "default_document_file")]
    pub document_file: String,

    /// Folders under `docs_dir` that are not twins
    #[serde(default = "default_excluded_folders")]
    pub excluded_folders: Vec<String>,

    #[serde(default = "default_contract_info_file")]
    pub contract_info_file: PathBuf,

    #[serde(default = "default_contract_name")]
    pub contract_name: String,

    #[serde(default)]
    pub record_layout: RecordLayout,

    /// Sidecar layout directory
    #[serde(default = "default_record_dir")]
    pub record_dir: PathBuf,

    /// Consolidated layout file
    #[serde(default = "default_record_file")]
    pub record_file: PathBuf,

    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,

    #[serde(default)]
    pub salt_policy: SaltPolicy,

    #[serde(default)]
    pub record_policy: RecordPolicy,

    /// Ask the registry when no local record exists
    #[serde(default)]
    pub ledger_cross_check: bool,

    /// Treat records whose transaction the ledger forgot as stale
    #[serde(default)]
    pub verify_record_reference: bool,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_confirmation_poll_millis")]
    pub confirmation_poll_millis: u64,
}

fn default_fee_margin() -> u64 {
    2
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("./docs")
}

fn default_document_file() -> String {
    "index.json".to_string()
}

fn default_excluded_folders() -> Vec<String> {
    vec!["static".to_string(), "new-twin".to_string()]
}

fn default_contract_info_file() -> PathBuf {
    PathBuf::from("./docs/static/contract/contract-info.json")
}

fn default_contract_name() -> String {
    "TwinRegistry".to_string()
}

fn default_record_dir() -> PathBuf {
    PathBuf::from(".anchor-records")
}

fn default_record_file() -> PathBuf {
    PathBuf::from("anchor-records.json")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_confirmation_poll_millis() -> u64 {
    500
}

/// Environment variable → configuration key
const ENV_BINDINGS: &[(&str, &str)] = &[
    ("DLT_TYPE", "ledger_kind"),
    ("DLT_HTTP_NODE", "rpc_url"),
    ("DLT_PRIVATE_KEY", "private_key"),
    ("DLT_GAS_PROVIDED", "fee_budget"),
    ("FEE_MARGIN", "fee_margin"),
    ("TWIN_DOCUMENT_FOLDERS", "docs_dir"),
    ("TWIN_DOCUMENT_FILE", "document_file"),
    ("CONTRACT_INFO_FILE", "contract_info_file"),
    ("CONTRACT_NAME", "contract_name"),
    ("RECORD_LAYOUT", "record_layout"),
    ("RECORD_DIR", "record_dir"),
    ("RECORD_FILE", "record_file"),
    ("DIGEST_ALGORITHM", "digest_algorithm"),
    ("SALT_POLICY", "salt_policy"),
    ("RECORD_POLICY", "record_policy"),
    ("LEDGER_CROSS_CHECK", "ledger_cross_check"),
    ("VERIFY_RECORD_REFERENCE", "verify_record_reference"),
    ("CONNECT_TIMEOUT_SECS", "connect_timeout_secs"),
    ("CONFIRMATION_TIMEOUT_SECS", "confirmation_timeout_secs"),
    ("CONFIRMATION_POLL_MILLIS", "confirmation_poll_millis"),
];

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            ledger_kind: None,
            rpc_url: None,
            private_key: String::new(),
            fee_budget: 0,
            fee_margin: default_fee_margin(),
            docs_dir: default_docs_dir(),
            document_file: default_document_file(),
            excluded_folders: default_excluded_folders(),
            contract_info_file: default_contract_info_file(),
            contract_name: default_contract_name(),
            record_layout: RecordLayout::default(),
            record_dir: default_record_dir(),
            record_file: default_record_file(),
            digest_algorithm: DigestAlgorithm::default(),
            salt_policy: SaltPolicy::default(),
            record_policy: RecordPolicy::default(),
            ledger_cross_check: false,
            verify_record_reference: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            confirmation_poll_millis: default_confirmation_poll_millis(),
        }
    }
}

impl AnchorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load defaults, then `file` if given, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        for (var, key) in ENV_BINDINGS {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        if let Ok(value) = std::env::var("EXCLUDED_FOLDERS") {
            builder = builder.set_override("excluded_folders", split_list(&value))?;
        }

        let config: AnchorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.private_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("DLT_PRIVATE_KEY".into()));
        }

        if self.fee_margin == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fee_margin".into(),
                message: "must be at least 1".into(),
            });
        }

        for (field, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("confirmation_timeout_secs", self.confirmation_timeout_secs),
            ("confirmation_poll_millis", self.confirmation_poll_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }

        if self.document_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "document_file".into(),
                message: "must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Fee ceiling, if one is configured
    pub fn fee_ceiling(&self) -> Option<u64> {
        (self.fee_budget > 0).then_some(self.fee_budget)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_millis)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
