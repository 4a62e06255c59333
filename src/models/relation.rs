//! Relation model

use serde::{Deserialize, Serialize};

use super::column::Occurs;
use super::NameChain;

/// A relation between two tables.
///
/// The same payload backs single (0-1/1-1) and multi (0-n/1-n)
/// relations; the owning [`TableField`](super::TableField) variant
/// distinguishes the two. Targets are referenced by type name, never by
/// pointer, so the schema graph can be cyclic without ownership issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Name of the field holding the relation in the parent table
    pub name: String,
    /// Path of original element names, accounting for elevated fields
    pub name_chain: NameChain,
    /// Target table type name
    pub target_type: String,
    /// Target table name
    pub target_name: String,
    /// Occurrence range
    pub occurs: Occurs,
    /// Nested-sequence tag used to reconstruct sibling interleaving
    pub ngroup: Option<String>,
}

impl Relation {
    /// Key column name used for a single relation's foreign key.
    ///
    /// The target name is not repeated when the relation name already
    /// ends with it.
    pub fn key_field_name(&self) -> String {
        if self.name.ends_with(&self.target_name) {
            format!("fk_{}", self.name)
        } else {
            format!("{}_fk_{}", self.name, self.target_name)
        }
    }

    /// Join-table name used for a multi relation to a reused target.
    pub fn join_table_name(&self, owner_name: &str) -> String {
        if self.name.ends_with(&self.target_name) {
            format!("{}_{}", owner_name, self.name)
        } else {
            format!("{}_{}_{}", owner_name, self.name, self.target_name)
        }
    }
}
