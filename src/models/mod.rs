//! Schema model
//!
//! In-memory representation of the relational model derived from an XML
//! schema: tables, columns, relations, and the transform tables recorded
//! during simplification.

pub mod column;
pub mod data_model;
pub mod relation;
pub mod simplify;
pub mod table;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use column::{Column, DataType, Occurs};
pub use data_model::DataModel;
pub use relation::Relation;
pub use table::{DataTable, ModelGroup, TableField};

/// One step of a field's name chain: the original element name and, for
/// steps introduced by relations, the target type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Original XML element name
    pub name: String,
    /// Target type for relation links, `None` for column links
    pub type_name: Option<String>,
}

impl ChainLink {
    /// Column-style link (no target type)
    pub fn column(name: &str) -> Self {
        ChainLink {
            name: name.to_string(),
            type_name: None,
        }
    }

    /// Relation-style link pointing at a type
    pub fn relation(name: &str, type_name: &str) -> Self {
        ChainLink {
            name: name.to_string(),
            type_name: Some(type_name.to_string()),
        }
    }
}

/// Path of original element names a field passed through due to
/// elevation, most specific last
pub type NameChain = Vec<ChainLink>;

/// Transform applied to a whole table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTransform {
    /// Collapsed to generic `type`/`value` columns
    Choice,
}

/// Transform applied to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    /// Repeated values stored as one comma-separated string
    Join,
    /// Child fields pulled into the parent, names prefixed
    Elevate,
    /// Child fields pulled into the parent without prefixing
    ElevateWoPrefix,
    /// Kept as a relation
    None,
}

impl FieldTransform {
    /// True for the two elevation variants
    pub fn is_elevate(&self) -> bool {
        matches!(self, FieldTransform::Elevate | FieldTransform::ElevateWoPrefix)
    }
}

/// Table-level transforms recorded by the simplification engine, keyed
/// by type name
pub type TypesTransforms = HashMap<String, TypeTransform>;

/// Field-level transforms recorded by the simplification engine, keyed
/// by (type name, field name); the value holds the target type (for
/// relations) and the transform kind
pub type FieldsTransforms = HashMap<(String, String), (Option<String>, FieldTransform)>;
