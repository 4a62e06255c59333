//! Table model
//!
//! A [`DataTable`] represents one database table translated from an XML
//! schema complex type. Fields are kept as an ordered list of a closed
//! sum type over columns, single relations and multi relations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::column::{Column, DataType, Occurs};
use super::relation::Relation;
use super::{ChainLink, NameChain};
use crate::config::TableConfig;
use crate::errors::{Error, Result};

/// XSD model group of the complex type backing a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGroup {
    /// All fields may have values at the same time
    Sequence,
    /// Only one field can have a value at a time
    Choice,
}

/// One ordered field of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableField {
    /// Scalar column
    Column(Column),
    /// 0-1 or 1-1 relation to another table
    Single(Relation),
    /// 0-n or 1-n relation to another table
    Multi(Relation),
}

impl TableField {
    /// Field name
    pub fn name(&self) -> &str {
        match self {
            TableField::Column(col) => &col.name,
            TableField::Single(rel) | TableField::Multi(rel) => &rel.name,
        }
    }

    /// Name chain of the field
    pub fn name_chain(&self) -> &NameChain {
        match self {
            TableField::Column(col) => &col.name_chain,
            TableField::Single(rel) | TableField::Multi(rel) => &rel.name_chain,
        }
    }

    /// Nested-sequence tag of the field
    pub fn ngroup(&self) -> Option<&str> {
        match self {
            TableField::Column(col) => col.ngroup.as_deref(),
            TableField::Single(rel) | TableField::Multi(rel) => rel.ngroup.as_deref(),
        }
    }
}

/// A database table translated from an XML schema complex type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTable {
    /// Table name, derived from the first element name seen for the type
    pub name: String,
    /// XSD complex type name; unique model-wide
    pub type_name: String,
    /// Is this the root table?
    pub is_root_table: bool,
    /// Was this table created to wrap multiple root elements?
    pub is_virtual_node: bool,
    /// Model group extracted from the XSD
    pub model_group: ModelGroup,
    /// Rows deduplicated by content hash (reused) or one row per
    /// occurrence (duplicated)
    pub is_reused: bool,
    /// Table-level configuration
    pub config: TableConfig,
    /// Ordered field list
    pub fields: Vec<TableField>,
    /// Number of multi relations targeting this table
    pub(crate) incoming_multi: usize,
    /// Already visited by the simplification pass
    pub(crate) is_simplified: bool,
    /// Survives pruning after simplification
    pub(crate) keep: bool,
    /// Parent table type, set by dependency computation; a duplicated
    /// table must have exactly one
    pub parent: Option<String>,
    /// Types this table depends on (must exist before it can be written)
    pub dependencies: BTreeSet<String>,
    /// Referenced by a foreign key somewhere in the model
    pub referenced_as_fk: bool,
}

impl DataTable {
    pub fn new(
        table_name: &str,
        type_name: &str,
        is_root_table: bool,
        is_virtual_node: bool,
        model_group: ModelGroup,
        config: TableConfig,
    ) -> DataTable {
        let is_reused = config.reuse;
        DataTable {
            name: table_name.to_string(),
            type_name: type_name.to_string(),
            is_root_table,
            is_virtual_node,
            model_group,
            is_reused,
            config,
            fields: Vec::new(),
            incoming_multi: 0,
            is_simplified: false,
            keep: false,
            parent: None,
            dependencies: BTreeSet::new(),
            referenced_as_fk: false,
        }
    }

    /// Append a scalar column.
    ///
    /// No validation beyond a basic range check; the simplification pass
    /// decides later whether repeated values are representable.
    #[allow(clippy::too_many_arguments)]
    pub fn add_column(
        &mut self,
        name: &str,
        data_type: DataType,
        occurs: Occurs,
        min_length: Option<u32>,
        max_length: Option<u32>,
        is_attr: bool,
        is_content: bool,
        allow_empty: bool,
        ngroup: Option<String>,
    ) -> Result<()> {
        if let Some(max) = occurs.max {
            if occurs.min > max {
                return Err(Error::Invariant(format!(
                    "column '{}' has min occurs {} greater than max occurs {}",
                    name, occurs.min, max
                )));
            }
        }
        if let DataType::Other(type_name) = &data_type {
            tracing::warn!(
                "unknown type '{}' for column '{}' of table '{}', treating as string \
                 (this can be overridden by providing a field type in the configuration)",
                type_name,
                name,
                self.name
            );
        }
        self.fields.push(TableField::Column(Column {
            name: name.to_string(),
            name_chain: vec![ChainLink::column(name)],
            data_type,
            occurs,
            min_length,
            max_length,
            is_attr,
            is_content,
            allow_empty,
            ngroup,
        }));
        Ok(())
    }

    /// Append a 0-1/1-1 relation; fails if max occurrences is not one.
    pub fn add_relation_single(
        &mut self,
        name: &str,
        target_type: &str,
        target_name: &str,
        occurs: Occurs,
        ngroup: Option<String>,
    ) -> Result<()> {
        if !occurs.is_single() {
            return Err(Error::Invariant(format!(
                "attempting to add a 1-1 relation '{}' with max occurrences different from 1",
                name
            )));
        }
        self.fields.push(TableField::Single(Relation {
            name: name.to_string(),
            name_chain: vec![ChainLink::relation(name, target_type)],
            target_type: target_type.to_string(),
            target_name: target_name.to_string(),
            occurs,
            ngroup,
        }));
        Ok(())
    }

    /// Append a 0-n/1-n relation; fails if max occurrences equals one.
    pub fn add_relation_multi(
        &mut self,
        name: &str,
        target_type: &str,
        target_name: &str,
        occurs: Occurs,
        ngroup: Option<String>,
    ) -> Result<()> {
        if occurs.is_single() {
            return Err(Error::Invariant(format!(
                "attempting to add a 1-n relation '{}' with max occurrences equal to 1",
                name
            )));
        }
        self.fields.push(TableField::Multi(Relation {
            name: name.to_string(),
            name_chain: vec![ChainLink::relation(name, target_type)],
            target_type: target_type.to_string(),
            target_name: target_name.to_string(),
            occurs,
            ngroup,
        }));
        Ok(())
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.fields.iter().find_map(|field| match field {
            TableField::Column(col) if col.name == name => Some(col),
            _ => None,
        })
    }

    /// Look up a single relation by name
    pub fn single_relation(&self, name: &str) -> Option<&Relation> {
        self.fields.iter().find_map(|field| match field {
            TableField::Single(rel) if rel.name == name => Some(rel),
            _ => None,
        })
    }

    /// Look up a multi relation by name
    pub fn multi_relation(&self, name: &str) -> Option<&Relation> {
        self.fields.iter().find_map(|field| match field {
            TableField::Multi(rel) if rel.name == name => Some(rel),
            _ => None,
        })
    }

    /// Iterate over the table's columns in field order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.fields.iter().filter_map(|field| match field {
            TableField::Column(col) => Some(col),
            _ => None,
        })
    }

    /// Iterate over the table's single relations in field order
    pub fn single_relations(&self) -> impl Iterator<Item = &Relation> {
        self.fields.iter().filter_map(|field| match field {
            TableField::Single(rel) => Some(rel),
            _ => None,
        })
    }

    /// Iterate over the table's multi relations in field order
    pub fn multi_relations(&self) -> impl Iterator<Item = &Relation> {
        self.fields.iter().filter_map(|field| match field {
            TableField::Multi(rel) => Some(rel),
            _ => None,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns().count()
    }

    pub fn single_relation_count(&self) -> usize {
        self.single_relations().count()
    }

    pub fn multi_relation_count(&self) -> usize {
        self.multi_relations().count()
    }

    /// Local key column name for this table's records
    pub fn pk_column(&self, temp: bool) -> String {
        if temp {
            format!("temp_pk_{}", self.name)
        } else {
            format!("pk_{}", self.name)
        }
    }
}
