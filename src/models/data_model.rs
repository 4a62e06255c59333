//! Data model
//!
//! The entry point of the crate: builds the table graph from a parsed
//! schema, simplifies it, and exposes the transform tables and the
//! dependency-ordered table sequence consumed by the transcoder and the
//! storage collaborator.

use std::collections::BTreeMap;
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::column::{DataType, Occurs};
use super::table::{DataTable, ModelGroup, TableField};
use super::{FieldsTransforms, TypesTransforms};
use crate::config::ModelConfig;
use crate::document::{Document, ParseOptions};
use crate::errors::{Error, Result};
use crate::import::{ComplexTypeDecl, ElementDecl, ResolvedType, SimpleTypeDecl, XsdSchema};

/// A data model based on an XML schema and its relational equivalent.
///
/// Builds a table per complex type from a parsed schema, simplifies the
/// table graph in place while recording every transform, and freezes a
/// topologically sorted table order for the storage collaborator.
#[derive(Debug)]
pub struct DataModel {
    /// Short identifier for the model
    pub name: Option<String>,
    /// Model configuration
    pub config: ModelConfig,
    /// All surviving tables, keyed by type name
    pub tables: BTreeMap<String, DataTable>,
    /// Bijective table-name → type-name map
    pub names_types_map: BTreeMap<String, String>,
    /// Type name of the root table
    pub root_table: String,
    /// Table-level transforms recorded during simplification
    pub types_transforms: TypesTransforms,
    /// Field-level transforms recorded during simplification
    pub fields_transforms: FieldsTransforms,
    /// Type names in insert/create order (foreign-key targets first)
    pub ordered_table_keys: Vec<String>,
    /// Text rendering of the model tree before simplification
    pub source_tree: String,
    /// Text rendering of the model tree after simplification
    pub target_tree: String,
}

impl DataModel {
    /// Build a model from an XSD file
    pub fn from_xsd_file(
        path: impl AsRef<Path>,
        name: Option<&str>,
        config: ModelConfig,
    ) -> Result<DataModel> {
        let schema = crate::import::parse_xsd_file(path)?;
        DataModel::build(&schema, name, config)
    }

    /// Build a model from XSD content
    pub fn from_xsd_str(
        content: &str,
        name: Option<&str>,
        config: ModelConfig,
    ) -> Result<DataModel> {
        let schema = crate::import::parse_xsd_str(content)?;
        DataModel::build(&schema, name, config)
    }

    /// Build a model from a parsed schema declaration tree.
    ///
    /// Parses the schema into one table per complex type, checks the
    /// user configuration, simplifies the table graph, prunes
    /// unreachable tables and computes the dependency order.
    pub fn build(schema: &XsdSchema, name: Option<&str>, config: ModelConfig) -> Result<DataModel> {
        schema.check_not_empty()?;
        let mut model = DataModel {
            name: name.map(|s| s.to_string()),
            config,
            tables: BTreeMap::new(),
            names_types_map: BTreeMap::new(),
            root_table: String::new(),
            types_transforms: TypesTransforms::new(),
            fields_transforms: FieldsTransforms::new(),
            ordered_table_keys: Vec::new(),
            source_tree: String::new(),
            target_tree: String::new(),
        };

        let root_type = if schema.roots.len() == 1 {
            model.parse_tree(schema, &schema.roots[0], true)?
        } else {
            model.parse_virtual_root(schema)?
        };
        model.root_table = root_type;
        model.source_tree = model.repr_tree();

        // reject config entries that reference unknown tables
        for table_name in model.config.tables.keys() {
            if !model.names_types_map.contains_key(table_name) {
                return Err(Error::SchemaConfig(format!(
                    "table '{table_name}' provided in config does not exist"
                )));
            }
        }

        model.simplify()?;
        model.target_tree = model.repr_tree();
        model.compute_dependencies()?;
        model.compute_order()?;

        tracing::debug!(
            tables = model.tables.len(),
            root = %model.root_table,
            "data model built"
        );
        Ok(model)
    }

    /// Tables in create/insert order (foreign-key targets first)
    pub fn ordered_tables(&self) -> impl Iterator<Item = &DataTable> {
        self.ordered_table_keys.iter().map(|key| &self.tables[key])
    }

    /// Tables in drop/delete order (foreign-key holders first)
    pub fn ordered_tables_reversed(&self) -> impl Iterator<Item = &DataTable> {
        self.ordered_table_keys
            .iter()
            .rev()
            .map(|key| &self.tables[key])
    }

    /// Table holding the document root
    pub fn root(&self) -> &DataTable {
        &self.tables[&self.root_table]
    }

    /// Parse an XML file against this model
    pub fn parse_xml_file(
        &self,
        path: impl AsRef<Path>,
        options: &ParseOptions,
    ) -> Result<Document<'_>> {
        let mut doc = Document::new(self);
        doc.parse_xml_file(path, options)?;
        Ok(doc)
    }

    /// Parse in-memory XML content against this model
    pub fn parse_xml_bytes(
        &self,
        content: &[u8],
        file_path: Option<&str>,
        options: &ParseOptions,
    ) -> Result<Document<'_>> {
        let mut doc = Document::new(self);
        doc.parse_xml_bytes(content, file_path, options)?;
        Ok(doc)
    }

    /// Append a column to a table; basic range checks only
    #[allow(clippy::too_many_arguments)]
    pub fn add_column(
        &mut self,
        type_name: &str,
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
        self.table_mut(type_name)?.add_column(
            name,
            data_type,
            occurs,
            min_length,
            max_length,
            is_attr,
            is_content,
            allow_empty,
            ngroup,
        )
    }

    /// Append a 0-1/1-1 relation to a table
    pub fn add_relation_single(
        &mut self,
        type_name: &str,
        name: &str,
        target_type: &str,
        occurs: Occurs,
        ngroup: Option<String>,
    ) -> Result<()> {
        let target_name = self.table_name_of(target_type)?;
        self.table_mut(type_name)?
            .add_relation_single(name, target_type, &target_name, occurs, ngroup)
    }

    /// Append a 0-n/1-n relation to a table and register the parent edge
    /// on the target
    pub fn add_relation_multi(
        &mut self,
        type_name: &str,
        name: &str,
        target_type: &str,
        occurs: Occurs,
        ngroup: Option<String>,
    ) -> Result<()> {
        let target_name = self.table_name_of(target_type)?;
        self.table_mut(type_name)?
            .add_relation_multi(name, target_type, &target_name, occurs, ngroup)?;
        self.table_mut(target_type)?.incoming_multi += 1;
        Ok(())
    }

    fn table_mut(&mut self, type_name: &str) -> Result<&mut DataTable> {
        self.tables
            .get_mut(type_name)
            .ok_or_else(|| Error::Invariant(format!("unknown table type '{type_name}'")))
    }

    fn table_name_of(&self, type_name: &str) -> Result<String> {
        self.tables
            .get(type_name)
            .map(|t| t.name.clone())
            .ok_or_else(|| Error::Invariant(format!("unknown table type '{type_name}'")))
    }

    /// Parse one schema element (and its type subtree) into tables.
    ///
    /// Tables are named after the first element name seen for their
    /// type; element names colliding across distinct types get a numeric
    /// suffix so the name/type association stays bijective.
    fn parse_tree(
        &mut self,
        schema: &XsdSchema,
        element: &ElementDecl,
        is_root: bool,
    ) -> Result<String> {
        let type_name = schema
            .named_complex_type(&element.type_ref)
            .unwrap_or_else(|| element.name.clone());

        if self.tables.contains_key(&type_name) {
            return Ok(type_name);
        }

        let table_name = self.claim_table_name(&element.name, &type_name);

        let resolved = schema.resolve(&element.type_ref)?;
        let model_group = match &resolved {
            ResolvedType::Complex(complex) => complex.model_group,
            ResolvedType::Simple(_) => ModelGroup::Sequence,
        };
        let table = DataTable::new(
            &table_name,
            &type_name,
            is_root,
            false,
            model_group,
            self.config.table(&table_name),
        );
        self.tables.insert(type_name.clone(), table);

        match resolved {
            ResolvedType::Simple(simple) => {
                // an element with a simple type stands alone as a table
                // with a single content column
                self.add_value_column(&type_name, &simple)?;
            }
            ResolvedType::Complex(complex) => {
                self.parse_complex(schema, &type_name, complex)?;
            }
        }

        Ok(type_name)
    }

    fn parse_complex(
        &mut self,
        schema: &XsdSchema,
        type_name: &str,
        complex: &ComplexTypeDecl,
    ) -> Result<()> {
        for attr in &complex.attributes {
            self.add_column(
                type_name,
                &attr.name,
                attr.simple_type.data_type.clone(),
                Occurs::OPTIONAL,
                attr.simple_type.min_length,
                attr.simple_type.max_length,
                true,
                false,
                attr.simple_type.allow_empty,
                None,
            )?;
        }

        for child in &complex.children {
            let resolved = schema.resolve(&child.type_ref)?;
            match resolved {
                ResolvedType::Complex(child_complex)
                    if child_complex.children.is_empty()
                        && child_complex.attributes.is_empty()
                        && child_complex.simple_content.is_some() =>
                {
                    // complex wrapper around a plain simple type
                    let simple = child_complex.simple_content.clone().unwrap();
                    self.add_column(
                        type_name,
                        &child.name,
                        simple.data_type,
                        child.occurs,
                        simple.min_length,
                        simple.max_length,
                        false,
                        false,
                        simple.allow_empty,
                        child.ngroup.clone(),
                    )?;
                }
                ResolvedType::Simple(simple) => {
                    self.add_column(
                        type_name,
                        &child.name,
                        simple.data_type,
                        child.occurs,
                        simple.min_length,
                        simple.max_length,
                        false,
                        false,
                        simple.allow_empty,
                        child.ngroup.clone(),
                    )?;
                }
                ResolvedType::Complex(_) => {
                    let child_type = self.parse_tree(schema, child, false)?;
                    if child.occurs.is_single() {
                        self.add_relation_single(
                            type_name,
                            &child.name,
                            &child_type,
                            child.occurs,
                            child.ngroup.clone(),
                        )?;
                    } else {
                        self.add_relation_multi(
                            type_name,
                            &child.name,
                            &child_type,
                            child.occurs,
                            child.ngroup.clone(),
                        )?;
                    }
                }
            }
        }

        if complex.mixed || complex.simple_content.is_some() {
            let simple = complex
                .simple_content
                .clone()
                .unwrap_or_else(|| SimpleTypeDecl::plain(DataType::String));
            self.add_value_column(type_name, &simple)?;
        }
        Ok(())
    }

    /// Content column of a mixed or simple-content element
    fn add_value_column(&mut self, type_name: &str, simple: &SimpleTypeDecl) -> Result<()> {
        self.add_column(
            type_name,
            "value",
            simple.data_type.clone(),
            Occurs::OPTIONAL,
            simple.min_length,
            simple.max_length,
            false,
            true,
            simple.allow_empty,
            None,
        )
    }

    /// Wrapper table holding multiple schema root elements
    fn parse_virtual_root(&mut self, schema: &XsdSchema) -> Result<String> {
        let root_name = self
            .name
            .clone()
            .unwrap_or_else(|| "document".to_string());
        let type_name = root_name.clone();
        let table_name = self.claim_table_name(&root_name, &type_name);
        let table = DataTable::new(
            &table_name,
            &type_name,
            true,
            true,
            ModelGroup::Sequence,
            self.config.table(&table_name),
        );
        self.tables.insert(type_name.clone(), table);

        for element in &schema.roots {
            let child_type = self.parse_tree(schema, element, false)?;
            if element.occurs.is_single() {
                self.add_relation_single(
                    &type_name,
                    &element.name,
                    &child_type,
                    element.occurs,
                    None,
                )?;
            } else {
                self.add_relation_multi(
                    &type_name,
                    &element.name,
                    &child_type,
                    element.occurs,
                    None,
                )?;
            }
        }
        Ok(type_name)
    }

    fn claim_table_name(&mut self, element_name: &str, type_name: &str) -> String {
        let mut table_name = element_name.to_string();
        if self.names_types_map.contains_key(&table_name) {
            let mut i = 1;
            while self
                .names_types_map
                .contains_key(&format!("{element_name}_{i}"))
            {
                i += 1;
            }
            table_name = format!("{element_name}_{i}");
        }
        self.names_types_map
            .insert(table_name.clone(), type_name.to_string());
        table_name
    }

    /// Compute per-table dependencies from the surviving relations.
    ///
    /// A relation to a reused target makes the target a dependency (its
    /// rows must exist before they can be referenced); a relation to a
    /// duplicated target reverses the edge (the parent row must exist
    /// before the child row referencing it). A duplicated table reached
    /// from more than one parent edge is a fatal schema error.
    pub(crate) fn compute_dependencies(&mut self) -> Result<()> {
        let keys: Vec<String> = self.tables.keys().cloned().collect();
        for key in keys {
            let relations: Vec<(bool, String)> = self.tables[&key]
                .fields
                .iter()
                .filter_map(|field| match field {
                    TableField::Single(rel) => Some((false, rel.target_type.clone())),
                    TableField::Multi(rel) => Some((true, rel.target_type.clone())),
                    TableField::Column(_) => None,
                })
                .collect();
            for (is_multi, target_type) in relations {
                let target = self.tables.get(&target_type).ok_or_else(|| {
                    Error::Invariant(format!("relation targets unknown type '{target_type}'"))
                })?;
                if target.parent.is_some() && !target.is_reused {
                    return Err(Error::SchemaConfig(format!(
                        "table '{}' is not reused and has more than one parent table",
                        target.name
                    )));
                }
                let target_reused = target.is_reused;
                self.tables.get_mut(&target_type).unwrap().parent = Some(key.clone());
                if target_reused {
                    self.tables
                        .get_mut(&key)
                        .unwrap()
                        .dependencies
                        .insert(target_type.clone());
                    self.tables.get_mut(&target_type).unwrap().referenced_as_fk = true;
                    if is_multi {
                        // the join table holds a foreign key back to the
                        // owning table
                        self.tables.get_mut(&key).unwrap().referenced_as_fk = true;
                    }
                } else {
                    self.tables
                        .get_mut(&target_type)
                        .unwrap()
                        .dependencies
                        .insert(key.clone());
                    self.tables.get_mut(&key).unwrap().referenced_as_fk = true;
                }
            }
        }
        Ok(())
    }

    /// Topologically sort tables over the dependency graph; nodes are
    /// inserted in lexical key order so ties break deterministically.
    pub(crate) fn compute_order(&mut self) -> Result<()> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut indices = BTreeMap::new();
        for key in self.tables.keys() {
            indices.insert(key.clone(), graph.add_node(key.clone()));
        }
        for (key, table) in &self.tables {
            for dep in &table.dependencies {
                if let Some(&dep_idx) = indices.get(dep) {
                    graph.add_edge(dep_idx, indices[key], ());
                }
            }
        }
        let order = toposort(&graph, None).map_err(|cycle| {
            Error::SchemaConfig(format!(
                "cyclic dependency between tables involving '{}'",
                graph[cycle.node_id()]
            ))
        })?;
        self.ordered_table_keys = order.into_iter().map(|idx| graph[idx].clone()).collect();
        Ok(())
    }

    /// Text rendering of the model tree, starting at the root table
    fn repr_tree(&self) -> String {
        let mut lines = Vec::new();
        let mut visited = vec![self.root_table.clone()];
        self.repr_tree_lines(&self.root_table, &mut visited, 0, &mut lines);
        lines.join("\n")
    }

    fn repr_tree_lines(
        &self,
        type_name: &str,
        visited: &mut Vec<String>,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        let Some(table) = self.tables.get(type_name) else {
            return;
        };
        let pad = "    ".repeat(depth);
        for field in &table.fields {
            match field {
                TableField::Column(col) => {
                    out.push(format!(
                        "{pad}{}{}: {}",
                        col.name,
                        col.occurs,
                        col.data_type.xsd_name()
                    ));
                }
                TableField::Single(rel) | TableField::Multi(rel) => {
                    let choice_mark = self
                        .tables
                        .get(&rel.target_type)
                        .filter(|t| t.model_group == ModelGroup::Choice)
                        .map(|_| " (choice)")
                        .unwrap_or("");
                    if visited.iter().any(|v| v == &rel.target_type) {
                        out.push(format!("{pad}{}{}{choice_mark}: ...", rel.name, rel.occurs));
                    } else {
                        out.push(format!("{pad}{}{}{choice_mark}:", rel.name, rel.occurs));
                        visited.push(rel.target_type.clone());
                        self.repr_tree_lines(&rel.target_type, visited, depth + 1, out);
                        visited.pop();
                    }
                }
            }
        }
    }
}
