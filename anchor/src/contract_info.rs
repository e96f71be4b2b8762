//! Shared contract info file published by the registry deploy tool

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;

/// One deployed contract as written by the deploy tool
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    /// Ledger kind the contract was deployed to
    pub dlt_type: String,
    /// RPC endpoint used for the deployment
    pub node: String,
    /// Only account allowed to post twin hashes
    pub minter: String,
    pub address: String,
    /// Kept opaque; the engine uses its own bindings
    #[serde(default)]
    pub abi: Value,
}

impl ContractInfo {
    /// Load the entry for `name` from a contract info file keyed by name
    pub fn load(path: &Path, name: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ContractInfo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut entries: HashMap<String, ContractInfo> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ContractInfo {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        entries.remove(name).ok_or_else(|| ConfigError::MissingContract {
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Read-only handle on the deployed registry contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHandle {
    pub name: String,
    pub address: Address,
    pub ledger_kind: String,
    pub node: String,
    pub minter: Address,
    pub source: PathBuf,
}

impl RegistryHandle {
    /// Load and validate the named contract entry
    pub fn load(path: &Path, name: &str) -> Result<Self, ConfigError> {
        let info = ContractInfo::load(path, name)?;
        let handle = Self::from_info(name, &info, path)?;

        debug!(
            contract = %handle.name,
            address = %handle.address,
            ledger_kind = %handle.ledger_kind,
            "Registry contract loaded"
        );
        Ok(handle)
    }

    pub fn from_info(name: &str, info: &ContractInfo, source: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            address: parse_address(&info.address)?,
            ledger_kind: info.dlt_type.clone(),
            node: info.node.clone(),
            minter: parse_address(&info.minter)?,
            source: source.to_path_buf(),
        })
    }

    /// Fail unless `signer` may write to the registry
    pub fn ensure_minter(&self, signer: Address) -> Result<(), ConfigError> {
        if signer != self.minter {
            return Err(ConfigError::NotMinter {
                signer: signer.to_string(),
                minter: self.minter.to_string(),
                contract: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn parse_address(s: &str) -> Result<Address, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(s.to_string()))
}
