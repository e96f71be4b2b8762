//! Local anchor record store
//!
//! Records are the engine's memory of what it last anchored. Reads never
//! fail: a missing, unreadable or corrupt record is reported as absent,
//! which the change detector turns into "needs anchoring". Writes replace
//! the target file atomically through a temp file in the same directory.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::AnchorConfig;
use crate::error::{AnchorResult, RecordError};
use crate::types::AnchorRecord;

/// Persisted last-known anchor per document
pub trait RecordStore: Send + Sync {
    /// Load the record for a document, or `None` if missing or unusable
    fn load(&self, document_id: &str) -> Option<AnchorRecord> {
        match self.read(document_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    document_id = %document_id,
                    error = %e,
                    "Ignoring unusable anchor record"
                );
                None
            }
        }
    }

    /// Read with the reason a record could not be used
    fn read(&self, document_id: &str) -> Result<Option<AnchorRecord>, RecordError>;

    /// Persist a record, replacing any previous one for the document
    fn save(&self, document_id: &str, record: &AnchorRecord) -> AnchorResult<()>;
}

/// On-disk layout of the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// One JSON file per document
    #[default]
    Sidecar,
    /// One JSON object keyed by document id
    Consolidated,
}

/// Open the store selected by configuration
pub fn open_store(config: &AnchorConfig) -> Box<dyn RecordStore> {
    match config.record_layout {
        RecordLayout::Sidecar => Box::new(SidecarStore::new(&config.record_dir)),
        RecordLayout::Consolidated => Box::new(ConsolidatedStore::new(&config.record_file)),
    }
}

/// Per-document record files under one directory
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
}

impl SidecarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the record for `document_id`
    pub fn record_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(document_id)))
    }
}

impl RecordStore for SidecarStore {
    fn read(&self, document_id: &str) -> Result<Option<AnchorRecord>, RecordError> {
        let path = self.record_path(document_id);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(document_id = %document_id, "No anchor record");
                return Ok(None);
            }
            Err(e) => {
                return Err(RecordError::Unreadable {
                    path,
                    message: e.to_string(),
                })
            }
        };

        let record: AnchorRecord =
            serde_json::from_slice(&bytes).map_err(|e| RecordError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        // Sanitized file names can collide; never trust another twin's record
        if record.document_id != document_id {
            return Err(RecordError::DocumentMismatch {
                expected: document_id.to_string(),
                found: record.document_id,
            });
        }

        Ok(Some(record))
    }

    fn save(&self, document_id: &str, record: &AnchorRecord) -> AnchorResult<()> {
        let path = self.record_path(document_id);
        let bytes = to_pretty_json(record, &path)?;
        write_atomic(&path, &bytes).map_err(|e| RecordError::WriteFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;

        debug!(document_id = %document_id, path = %path.display(), "Anchor record saved");
        Ok(())
    }
}

/// All records in a single JSON object keyed by document id
#[derive(Debug, Clone)]
pub struct ConsolidatedStore {
    path: PathBuf,
}

impl ConsolidatedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, AnchorRecord>, RecordError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(RecordError::Unreadable {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| RecordError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

impl RecordStore for ConsolidatedStore {
    fn read(&self, document_id: &str) -> Result<Option<AnchorRecord>, RecordError> {
        let mut records = self.read_all()?;
        match records.remove(document_id) {
            Some(record) if record.document_id != document_id => {
                Err(RecordError::DocumentMismatch {
                    expected: document_id.to_string(),
                    found: record.document_id,
                })
            }
            other => Ok(other),
        }
    }

    fn save(&self, document_id: &str, record: &AnchorRecord) -> AnchorResult<()> {
        let mut records = match self.read_all() {
            Ok(records) => records,
            Err(e) => {
                // Unreadable entries are already treated as absent
                warn!(error = %e, "Replacing unreadable consolidated record file");
                BTreeMap::new()
            }
        };
        records.insert(document_id.to_string(), record.clone());

        let bytes = to_pretty_json(&records, &self.path)?;
        write_atomic(&self.path, &bytes).map_err(|e| RecordError::WriteFailed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        debug!(document_id = %document_id, path = %self.path.display(), "Anchor record saved");
        Ok(())
    }
}

fn to_pretty_json<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>, RecordError> {
    serde_json::to_vec_pretty(value).map_err(|e| RecordError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a partial file
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn file_stem(document_id: &str) -> String {
    document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
