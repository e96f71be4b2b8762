//! Check a single document against its anchors

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::canonical::Canonicalizer;
use crate::client::LedgerClient;
use crate::contract_info::RegistryHandle;
use crate::document::TwinDocument;
use crate::error::AnchorResult;
use crate::store::RecordStore;
use crate::types::ContentDigest;

/// Result of comparing a document with the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// Registry holds the document's current digest
    Verified,
    /// Registry holds another digest
    Mismatch,
    /// Registry has nothing for the document
    NotAnchored,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Verified => "verified",
            Verdict::Mismatch => "mismatch",
            Verdict::NotAnchored => "not anchored",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub document_id: String,
    pub digest: ContentDigest,
    /// Digest in the local record, if one is usable
    pub recorded: Option<ContentDigest>,
    /// Digest the registry returns
    pub anchored: Option<ContentDigest>,
    pub verdict: Verdict,
}

impl Verification {
    pub fn record_matches(&self) -> bool {
        self.recorded == Some(self.digest)
    }

    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }
}

/// Compare a document's digest with its local record and the registry
///
/// The registry value decides the verdict. A failed registry read is an
/// error, not "not anchored".
pub async fn verify_document<L: LedgerClient + ?Sized>(
    document: &TwinDocument,
    canonicalizer: &Canonicalizer,
    store: &dyn RecordStore,
    ledger: &L,
    registry: &RegistryHandle,
) -> AnchorResult<Verification> {
    let digest = canonicalizer.digest(&document.content);
    let recorded = store.load(&document.id).map(|record| record.digest);
    let anchored = ledger.read_contract_value(registry, &document.id).await?;

    let verdict = match anchored {
        Some(value) if value == digest => Verdict::Verified,
        Some(_) => Verdict::Mismatch,
        None => Verdict::NotAnchored,
    };

    info!(
        document_id = %document.id,
        digest = %digest,
        recorded = ?recorded,
        anchored = ?anchored,
        verdict = %verdict,
        "Verification complete"
    );

    Ok(Verification {
        document_id: document.id.clone(),
        digest,
        recorded,
        anchored,
        verdict,
    })
}
