//! Twin Anchor
//!
//! Anchors digests of digital twin documents onto an on-chain TwinRegistry.
//! Each run hashes every document canonically, skips the ones whose last
//! anchor still matches, and submits the rest with gap-free nonces.

pub mod canonical;
pub mod client;
pub mod config;
pub mod contract_info;
pub mod detector;
pub mod document;
pub mod error;
pub mod nonce;
pub mod service;
pub mod store;
pub mod transaction;
pub mod types;
pub mod verify;


pub use canonical::{Canonicalizer, DigestAlgorithm};
pub use client::{AlloyLedger, LedgerClient};
pub use config::{AnchorConfig, RecordPolicy, SaltPolicy};
pub use contract_info::RegistryHandle;
pub use document::{DocumentCollection, TwinDocument};
pub use error::{AnchorError, AnchorResult};
pub use service::AnchorService;
pub use store::{open_store, RecordStore};
pub use types::*;
