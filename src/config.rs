//! Model configuration
//!
//! Options controlling how the data model is built and how documents are
//! transcoded. Everything that is plain data derives serde so configs can
//! be loaded from JSON; hooks, digest builders and validators are
//! function objects installed programmatically and are skipped during
//! (de)serialization.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use sha2::{Digest, Sha256};

use crate::document::tree::DocumentNode;
use crate::models::column::DataType;
use crate::validation::DocumentValidator;

/// Hook rewriting the whole parsed document tree, run once per document
pub type TreeHook = Rc<dyn Fn(Rc<DocumentNode>) -> Rc<DocumentNode>>;

/// Hook rewriting (or dropping, by returning `None`) a node, run once per
/// deduplicated node
pub type NodeHook = Rc<dyn Fn(DocumentNode) -> Option<DocumentNode>>;

/// User-installed rewrite hooks
#[derive(Default, Clone)]
pub struct Hooks {
    /// Invoked once on the fully parsed document tree
    pub document_tree: Option<TreeHook>,
    /// Invoked once per deduplicated node, before registration
    pub document_tree_node: Option<NodeHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("document_tree", &self.document_tree.is_some())
            .field("document_tree_node", &self.document_tree_node.is_some())
            .finish()
    }
}

/// Factory producing a fresh digest instance per hashed node
#[derive(Clone)]
pub struct HashBuilder(pub Arc<dyn Fn() -> Box<dyn DynDigest>>);

impl HashBuilder {
    /// Create a fresh digest
    pub fn digest(&self) -> Box<dyn DynDigest> {
        (self.0)()
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        HashBuilder(Arc::new(|| Box::new(Sha256::new()) as Box<dyn DynDigest>))
    }
}

impl fmt::Debug for HashBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashBuilder(..)")
    }
}

/// Record-hash settings: column name, digest size and digest factory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordHashConfig {
    /// Name of the hash column added to every record
    pub column_name: String,
    /// Digest size in bytes; longer digests are truncated to this size
    pub size: usize,
    /// Digest factory (defaults to SHA-256)
    #[serde(skip)]
    pub builder: HashBuilder,
}

impl Default for RecordHashConfig {
    fn default() -> Self {
        RecordHashConfig {
            column_name: "xtab_record_hash".to_string(),
            size: 32,
            builder: HashBuilder::default(),
        }
    }
}

/// Per-field transform override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    /// Prevent any transformation on this field
    Disabled,
    /// Store repeated values as one comma-separated string
    Join,
    /// Pull the child table's fields up, prefixing their names
    Elevate,
    /// Pull the child table's fields up without prefixing
    ElevateWoPrefix,
}

/// Per-field configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Override the column data type detected from the schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    /// Override the transform applied to this field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformConfig>,
}

/// Per-table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Deduplicate rows by content hash (default) or keep one row per
    /// occurrence
    pub reuse: bool,
    /// Force the choice transform on or off instead of the default
    /// heuristic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice_transform: Option<bool>,
    /// Storage-engine hint, carried through to the storage collaborator
    pub as_columnstore: bool,
    /// Per-field overrides, keyed by field name
    pub fields: BTreeMap<String, FieldConfig>,
    /// Opaque extra arguments handed through to the storage
    /// collaborator (extra column or constraint definitions); not
    /// interpreted by the transcoding core
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<serde_json::Value>,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            reuse: true,
            choice_transform: None,
            as_columnstore: false,
            fields: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }
}

/// Extra column added to the root table, filled from caller-supplied
/// metadata at flatten time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataColumn {
    /// Column name
    pub name: String,
    /// Column data type
    pub data_type: DataType,
}

/// Top-level model configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Emit ordinal position columns for repeated children
    pub row_numbers: bool,
    /// Storage-engine hint, carried through to the storage collaborator
    pub as_columnstore: bool,
    /// Record-hash settings
    pub record_hash: RecordHashConfig,
    /// Extra root-table columns filled from caller metadata
    pub metadata_columns: Vec<MetadataColumn>,
    /// Per-table configuration, keyed by table name
    pub tables: BTreeMap<String, TableConfig>,
    /// Document/node rewrite hooks
    #[serde(skip)]
    pub hooks: Hooks,
    /// Validation collaborator consulted before parsing, unless the
    /// caller skips validation; when absent a well-formedness check is
    /// used
    #[serde(skip)]
    pub validator: Option<Rc<dyn DocumentValidator>>,
}

impl ModelConfig {
    /// Table config for `table_name`, falling back to defaults
    pub fn table(&self, table_name: &str) -> TableConfig {
        self.tables.get(table_name).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("row_numbers", &self.row_numbers)
            .field("as_columnstore", &self.as_columnstore)
            .field("record_hash", &self.record_hash)
            .field("metadata_columns", &self.metadata_columns)
            .field("tables", &self.tables)
            .field("hooks", &self.hooks)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ModelConfig::default();
        assert!(!config.row_numbers);
        assert_eq!(config.record_hash.column_name, "xtab_record_hash");
        assert_eq!(config.record_hash.size, 32);
        assert!(config.table("anything").reuse);
    }

    #[test]
    fn test_config_from_json() {
        let config: ModelConfig = serde_json::from_str(
            r#"{
                "row_numbers": true,
                "tables": {
                    "shipment": {
                        "reuse": false,
                        "fields": {"notes": {"transform": "disabled"}}
                    }
                }
            }"#,
        )
        .unwrap();
        assert!(config.row_numbers);
        let table = config.table("shipment");
        assert!(!table.reuse);
        assert_eq!(
            table.fields["notes"].transform,
            Some(TransformConfig::Disabled)
        );
    }

    #[test]
    fn test_default_hash_builder_is_sha256() {
        let config = RecordHashConfig::default();
        let mut digest = config.builder.digest();
        digest.update(b"abc");
        let out = digest.finalize();
        assert_eq!(
            hex::encode(&out),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
