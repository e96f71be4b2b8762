//! Twin document folders and salting

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use alloy::primitives::keccak256;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AnchorConfig;
use crate::error::{AnchorResult, ConfigError, ResultExt};
use crate::store::write_atomic;
use crate::types::ContentDigest;

/// Field holding the twin identifier
pub const DOCUMENT_ID_FIELD: &str = "dt-id";

/// Field holding the injected salt
pub const SALT_FIELD: &str = "salt";

/// One twin document loaded from its folder
#[derive(Debug, Clone, PartialEq)]
pub struct TwinDocument {
    pub id: String,
    pub folder: String,
    pub path: PathBuf,
    pub content: Value,
}

impl TwinDocument {
    pub fn load(path: &Path, folder: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidDocument {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let content: Value = serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidDocument {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::from_value(folder, path, content)
    }

    pub fn from_value(folder: &str, path: &Path, content: Value) -> Result<Self, ConfigError> {
        let id = content
            .as_object()
            .ok_or_else(|| ConfigError::InvalidDocument {
                path: path.to_path_buf(),
                message: "document is not a JSON object".into(),
            })?
            .get(DOCUMENT_ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::InvalidDocument {
                path: path.to_path_buf(),
                message: format!("missing string field \"{DOCUMENT_ID_FIELD}\""),
            })?
            .to_string();

        Ok(Self {
            id,
            folder: folder.to_string(),
            path: path.to_path_buf(),
            content,
        })
    }

    pub fn salt(&self) -> Option<&str> {
        self.content.get(SALT_FIELD).and_then(Value::as_str)
    }

    /// Replace the salt in memory; `write_back` persists it
    pub fn apply_salt(&mut self, salt: String) {
        if let Value::Object(map) = &mut self.content {
            map.insert(SALT_FIELD.to_string(), Value::String(salt));
        }
    }

    /// YAML companion rewritten together with the JSON file
    pub fn yaml_path(&self) -> PathBuf {
        self.path.with_extension("yaml")
    }

    /// Rewrite the document file, and its YAML companion if present
    pub fn write_back(&self) -> AnchorResult<()> {
        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        self.content
            .serialize(&mut serializer)
            .anchor_context("encoding salted document")?;

        write_atomic(&self.path, &json).anchor_context("writing salted document")?;

        let yaml_path = self.yaml_path();
        if yaml_path.is_file() {
            let yaml = serde_yaml::to_string(&yaml_value(&self.content))
                .anchor_context("encoding salted yaml")?;
            write_atomic(&yaml_path, yaml.as_bytes()).anchor_context("writing salted yaml")?;
        }

        debug!(document_id = %self.id, path = %self.path.display(), "Salted document written");
        Ok(())
    }
}

// serde_json numbers keep their source text and serialize as a private
// struct, so the YAML companion is built from plain scalars
fn yaml_value(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Null => serde_yaml::Value::Null,
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Number(n) => yaml_number(n),
        Value::String(s) => serde_yaml::Value::String(s.clone()),
        Value::Array(items) => serde_yaml::Value::Sequence(items.iter().map(yaml_value).collect()),
        Value::Object(map) => serde_yaml::Value::Mapping(
            map.iter()
                .map(|(key, item)| (serde_yaml::Value::String(key.clone()), yaml_value(item)))
                .collect(),
        ),
    }
}

fn yaml_number(n: &serde_json::Number) -> serde_yaml::Value {
    if let Some(u) = n.as_u64() {
        serde_yaml::Value::Number(u.into())
    } else if let Some(i) = n.as_i64() {
        serde_yaml::Value::Number(i.into())
    } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
        // YAML has no arbitrary precision; the JSON file stays exact
        serde_yaml::Value::Number(f.into())
    } else {
        serde_yaml::Value::String(n.to_string())
    }
}

/// Fresh random salt: keccak256 of 32 random bytes in 0x-hex
pub fn generate_salt() -> String {
    salt_from_entropy(rand::random())
}

fn salt_from_entropy(entropy: [u8; 32]) -> String {
    let preimage = format!("0x{}", hex::encode(entropy));
    ContentDigest::from(keccak256(preimage.as_bytes())).to_hex()
}

/// Document folders under one root
#[derive(Debug, Clone)]
pub struct DocumentCollection {
    root: PathBuf,
    document_file: String,
    excluded: Vec<String>,
}

impl DocumentCollection {
    pub fn new(root: impl Into<PathBuf>, document_file: impl Into<String>, excluded: Vec<String>) -> Self {
        Self {
            root: root.into(),
            document_file: document_file.into(),
            excluded,
        }
    }

    pub fn from_config(config: &AnchorConfig) -> Self {
        Self::new(
            &config.docs_dir,
            config.document_file.clone(),
            config.excluded_folders.clone(),
        )
    }

    /// Every twin, ordered by folder name
    ///
    /// A folder without its document file, or with an invalid one, fails the
    /// whole load.
    pub fn load(&self) -> Result<Vec<TwinDocument>, ConfigError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ConfigError::DocumentsDir {
            path: self.root.clone(),
            message: e.to_string(),
        })?;

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigError::DocumentsDir {
                path: self.root.clone(),
                message: e.to_string(),
            })?;

            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if self.excluded.iter().any(|excluded| excluded == &name) {
                debug!(folder = %name, "Skipping excluded folder");
                continue;
            }
            folders.push(name);
        }
        folders.sort();

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut documents = Vec::with_capacity(folders.len());

        for folder in folders {
            let document = self.load_folder(&folder)?;
            if let Some(first) = seen.insert(document.id.clone(), document.path.clone()) {
                debug!(document_id = %document.id, first = %first.display(), "Duplicate twin id");
                return Err(ConfigError::DuplicateDocumentId {
                    id: document.id,
                    path: document.path,
                });
            }
            documents.push(document);
        }

        info!(root = %self.root.display(), count = documents.len(), "Twin documents loaded");
        Ok(documents)
    }

    /// Load the document of a single folder
    pub fn load_folder(&self, folder: &str) -> Result<TwinDocument, ConfigError> {
        let path = self.root.join(folder).join(&self.document_file);
        if !path.is_file() {
            return Err(ConfigError::MissingDocument(path));
        }
        TwinDocument::load(&path, folder)
    }
}
