//! Canonical encoding and digests of twin documents
//!
//! Documents are encoded as compact JSON with object keys sorted
//! lexicographically at every depth, so key order and whitespace in the
//! source file never affect the digest. Numbers keep their source text
//! (serde_json `arbitrary_precision`), so values beyond `u64`/`f64` range
//! are never rounded before hashing.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::types::ContentDigest;

/// Hash function applied to canonical bytes
///
/// One algorithm is selected per deployment. Digests from different
/// algorithms are never comparable, so switching invalidates every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// Collision-resistant, native to the registry's ledger
    #[default]
    Keccak256,
    /// Fast checksum for cheap change detection
    Blake3,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Keccak256 => "keccak256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> ContentDigest {
        match self {
            DigestAlgorithm::Keccak256 => ContentDigest::from(keccak256(bytes)),
            DigestAlgorithm::Blake3 => ContentDigest::new(*blake3::hash(bytes).as_bytes()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keccak256" | "keccak" => Ok(DigestAlgorithm::Keccak256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(ConfigError::InvalidValue {
                field: "digest_algorithm".into(),
                message: format!("unknown algorithm {other}"),
            }),
        }
    }
}

/// Deterministic document encoder and hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Canonicalizer {
    algorithm: DigestAlgorithm,
}

impl Canonicalizer {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Canonical byte encoding of a structured document
    pub fn canonical_bytes(value: &Value) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        write_canonical(value, &mut out);
        out
    }

    /// Digest of the document's canonical encoding
    pub fn digest(&self, value: &Value) -> ContentDigest {
        self.algorithm.digest(&Self::canonical_bytes(value))
    }
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_canonical(item, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::String(s) => write_string(s, out),
        // null, booleans and numbers print their own text in compact form
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json's Display for a string value applies JSON escaping
    out.extend_from_slice(Value::String(s.to_owned()).to_string().as_bytes());
}
