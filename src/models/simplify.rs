//! Simplification engine
//!
//! Rewrites the table graph bottom-up to reduce the number of generated
//! tables, recording every transform so parsing and unparsing stay
//! bijective:
//!
//! - **choice collapsing**: a choice-model table whose columns share one
//!   scalar type collapses to generic `type`/`value` columns;
//! - **relation elevation**: a singular child's fields are pulled up
//!   into the parent, with prefixed names;
//! - **column joining**: repeated scalar values are stored as one
//!   comma-separated string.
//!
//! Tables left unreachable afterwards are pruned.

use std::mem;

use super::column::{Column, DataType, Occurs};
use super::relation::Relation;
use super::table::{DataTable, ModelGroup, TableField};
use super::{ChainLink, DataModel, FieldTransform, FieldsTransforms, TypeTransform, TypesTransforms};
use crate::config::{TableConfig, TransformConfig};
use crate::errors::{Error, Result};

impl DataModel {
    /// Simplify the table graph starting at the root table, then prune
    /// tables no surviving relation points at.
    pub(crate) fn simplify(&mut self) -> Result<()> {
        let root = self.root_table.clone();
        let mut types_transforms = TypesTransforms::new();
        let mut fields_transforms = FieldsTransforms::new();
        self.simplify_table(&root, &mut types_transforms, &mut fields_transforms)?;

        self.tables.get_mut(&root).unwrap().keep = true;
        let before = self.tables.len();
        self.tables.retain(|_, table| table.keep);
        tracing::debug!(
            pruned = before - self.tables.len(),
            kept = self.tables.len(),
            "schema simplification done"
        );

        self.types_transforms = types_transforms;
        self.fields_transforms = fields_transforms;
        Ok(())
    }

    /// Simplify one table, children before parent.
    fn simplify_table(
        &mut self,
        type_name: &str,
        types_transforms: &mut TypesTransforms,
        fields_transforms: &mut FieldsTransforms,
    ) -> Result<()> {
        {
            let table = self
                .tables
                .get_mut(type_name)
                .ok_or_else(|| Error::Invariant(format!("unknown table type '{type_name}'")))?;
            if table.is_simplified {
                return Ok(());
            }
            table.is_simplified = true;
        }

        if self.choice_transform_applicable(type_name)? {
            self.transform_to_choice(type_name);
            types_transforms.insert(type_name.to_string(), TypeTransform::Choice);
            return Ok(());
        }

        let config = self.tables[type_name].config.clone();
        let fields = mem::take(&mut self.tables.get_mut(type_name).unwrap().fields);

        // live counts over all current fields, kept in sync while fields
        // are moved and elevated (the elevate-without-prefix rule depends
        // on them)
        let mut column_count = fields
            .iter()
            .filter(|f| matches!(f, TableField::Column(_)))
            .count();
        let mut single_count = fields
            .iter()
            .filter(|f| matches!(f, TableField::Single(_)))
            .count();

        let mut out_fields: Vec<TableField> = Vec::with_capacity(fields.len());
        for field in fields {
            match field {
                TableField::Column(column) => {
                    if self.column_join_transform(type_name, &config, &column)? {
                        fields_transforms.insert(
                            (type_name.to_string(), column.name.clone()),
                            (None, FieldTransform::Join),
                        );
                    }
                    out_fields.push(TableField::Column(column));
                }
                TableField::Single(relation) => {
                    self.simplify_table(&relation.target_type, types_transforms, fields_transforms)?;
                    let transform = self.single_relation_transform(
                        type_name,
                        &config,
                        &relation,
                        column_count,
                        single_count,
                    )?;
                    match transform {
                        Some(kind) => {
                            single_count -= 1;
                            let child_fields =
                                self.tables[&relation.target_type].fields.clone();
                            let prefix = match kind {
                                FieldTransform::Elevate => format!("{}_", relation.name),
                                _ => String::new(),
                            };
                            for child_field in &child_fields {
                                let elevated = elevate_field(child_field, &prefix, &relation);
                                match &elevated {
                                    TableField::Column(_) => column_count += 1,
                                    TableField::Single(_) => single_count += 1,
                                    TableField::Multi(_) => {}
                                }
                                out_fields.push(elevated);
                            }
                            fields_transforms.insert(
                                (type_name.to_string(), relation.name.clone()),
                                (Some(relation.target_type.clone()), kind),
                            );
                        }
                        None => {
                            fields_transforms.insert(
                                (type_name.to_string(), relation.name.clone()),
                                (Some(relation.target_type.clone()), FieldTransform::None),
                            );
                            self.tables
                                .get_mut(&relation.target_type)
                                .unwrap()
                                .keep = true;
                            out_fields.push(TableField::Single(relation));
                        }
                    }
                }
                TableField::Multi(relation) => {
                    self.simplify_table(&relation.target_type, types_transforms, fields_transforms)?;
                    match config
                        .fields
                        .get(&relation.name)
                        .and_then(|f| f.transform)
                    {
                        None | Some(TransformConfig::Disabled) => {}
                        Some(other) => {
                            return Err(Error::SchemaConfig(format!(
                                "transform '{other:?}' cannot be applied to field '{}' of table '{}'",
                                relation.name, self.tables[type_name].name
                            )));
                        }
                    }
                    fields_transforms.insert(
                        (type_name.to_string(), relation.name.clone()),
                        (Some(relation.target_type.clone()), FieldTransform::None),
                    );
                    self.tables
                        .get_mut(&relation.target_type)
                        .unwrap()
                        .keep = true;
                    out_fields.push(TableField::Multi(relation));
                }
            }
        }

        self.tables.get_mut(type_name).unwrap().fields = out_fields;
        Ok(())
    }

    /// Decide whether a column's repeated values are joined; errors on a
    /// repeatable column whose type cannot be joined, unless an explicit
    /// type override whitelists it.
    fn column_join_transform(
        &self,
        type_name: &str,
        config: &TableConfig,
        column: &Column,
    ) -> Result<bool> {
        let field_config = config.fields.get(&column.name);
        let has_type_override = field_config.map_or(false, |f| f.data_type.is_some());
        match field_config.and_then(|f| f.transform) {
            Some(TransformConfig::Disabled) => Ok(false),
            Some(TransformConfig::Join) => {
                if !has_type_override {
                    column.can_join_values_as_string()?;
                }
                Ok(true)
            }
            Some(other) => Err(Error::SchemaConfig(format!(
                "transform '{other:?}' cannot be applied to field '{}' of table '{}'",
                column.name, self.tables[type_name].name
            ))),
            None => {
                if !has_type_override {
                    column.can_join_values_as_string()?;
                }
                Ok(true)
            }
        }
    }

    /// Decide the transform for a singular relation: explicit config, or
    /// the default elevation heuristic.
    fn single_relation_transform(
        &self,
        type_name: &str,
        config: &TableConfig,
        relation: &Relation,
        column_count: usize,
        single_count: usize,
    ) -> Result<Option<FieldTransform>> {
        match config.fields.get(&relation.name).and_then(|f| f.transform) {
            Some(TransformConfig::Disabled) => Ok(None),
            Some(TransformConfig::Elevate) => Ok(Some(FieldTransform::Elevate)),
            Some(TransformConfig::ElevateWoPrefix) => Ok(Some(FieldTransform::ElevateWoPrefix)),
            Some(other) => Err(Error::SchemaConfig(format!(
                "transform '{other:?}' cannot be applied to field '{}' of table '{}'",
                relation.name, self.tables[type_name].name
            ))),
            None => {
                let child = &self.tables[&relation.target_type];
                // elevate a mandatory or small child, but never one that
                // is the target of a multi relation elsewhere
                if (relation.occurs.min == 1 || child.column_count() <= 4)
                    && child.incoming_multi == 0
                {
                    if column_count == 0 && single_count == 1 {
                        Ok(Some(FieldTransform::ElevateWoPrefix))
                    } else {
                        Ok(Some(FieldTransform::Elevate))
                    }
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Check whether a table can be collapsed to `type`/`value` columns:
    /// a choice model group, no relations, and a single shared column
    /// type.
    fn can_choice_transform(table: &DataTable) -> bool {
        if table.model_group != ModelGroup::Choice {
            return false;
        }
        if table.single_relation_count() > 0 || table.multi_relation_count() > 0 {
            return false;
        }
        let mut types = table.columns().map(|c| &c.data_type);
        match types.next() {
            Some(first) => types.all(|t| t == first),
            None => false,
        }
    }

    /// Apply config or the default heuristic (collapsing must actually
    /// shrink the column list).
    fn choice_transform_applicable(&self, type_name: &str) -> Result<bool> {
        let table = &self.tables[type_name];
        let possible = Self::can_choice_transform(table);
        match table.config.choice_transform {
            Some(true) => {
                if possible {
                    Ok(true)
                } else {
                    Err(Error::SchemaConfig(format!(
                        "choice transform cannot be applied to table '{}': it requires a choice \
                         model group, no relations and a single shared column type",
                        table.name
                    )))
                }
            }
            Some(false) => Ok(false),
            None => Ok(possible && table.column_count() > 2),
        }
    }

    /// Replace the table's columns with generic `type`/`value` columns.
    fn transform_to_choice(&mut self, type_name: &str) {
        let table = self.tables.get_mut(type_name).unwrap();
        let columns: Vec<&Column> = table.columns().collect();

        let name_lengths: Vec<u32> = columns
            .iter()
            .map(|c| c.name.chars().count() as u32)
            .collect();
        let value_type = columns[0].data_type.clone();
        let min_lengths: Option<Vec<u32>> = columns.iter().map(|c| c.min_length).collect();
        let max_lengths: Option<Vec<u32>> = columns.iter().map(|c| c.max_length).collect();
        let allow_empty = columns.iter().any(|c| c.allow_empty);

        let type_column = Column {
            name: "type".to_string(),
            name_chain: vec![ChainLink::column("type")],
            data_type: DataType::String,
            occurs: Occurs::ONE,
            min_length: name_lengths.iter().copied().min(),
            max_length: name_lengths.iter().copied().max(),
            is_attr: false,
            is_content: false,
            allow_empty: false,
            ngroup: None,
        };
        let value_column = Column {
            name: "value".to_string(),
            name_chain: vec![ChainLink::column("value")],
            data_type: value_type,
            occurs: Occurs::ONE,
            min_length: min_lengths.map(|lens| lens.into_iter().min().unwrap_or(0)),
            max_length: max_lengths.map(|lens| lens.into_iter().max().unwrap_or(0)),
            is_attr: false,
            is_content: false,
            allow_empty,
            ngroup: None,
        };
        table.fields = vec![
            TableField::Column(type_column),
            TableField::Column(value_column),
        ];
    }
}

/// Clone a child field into its new parent: prefix the name, extend the
/// name chain with the elevated relation's link, and weaken the
/// occurrence range when the relation itself was optional.
fn elevate_field(field: &TableField, prefix: &str, relation: &Relation) -> TableField {
    let link = ChainLink::relation(&relation.name, &relation.target_type);
    let weaken = relation.occurs.min == 0;
    let rewrite_chain = |chain: &super::NameChain| {
        let mut new_chain = Vec::with_capacity(chain.len() + 1);
        new_chain.push(link.clone());
        new_chain.extend(chain.iter().cloned());
        new_chain
    };
    match field {
        TableField::Column(column) => {
            let mut elevated = column.clone();
            elevated.name = format!("{prefix}{}", column.name);
            elevated.name_chain = rewrite_chain(&column.name_chain);
            if weaken {
                elevated.occurs = Occurs::new(0, column.occurs.max);
            }
            TableField::Column(elevated)
        }
        TableField::Single(child_rel) => {
            let mut elevated = child_rel.clone();
            elevated.name = format!("{prefix}{}", child_rel.name);
            elevated.name_chain = rewrite_chain(&child_rel.name_chain);
            if weaken {
                elevated.occurs = Occurs::new(0, child_rel.occurs.max);
            }
            TableField::Single(elevated)
        }
        TableField::Multi(child_rel) => {
            let mut elevated = child_rel.clone();
            elevated.name = format!("{prefix}{}", child_rel.name);
            elevated.name_chain = rewrite_chain(&child_rel.name_chain);
            if weaken {
                elevated.occurs = Occurs::new(0, child_rel.occurs.max);
            }
            TableField::Multi(elevated)
        }
    }
}
