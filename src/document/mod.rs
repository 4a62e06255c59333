//! Document handling
//!
//! A [`Document`] ties one XML file's data to a data model: parsing into
//! the normalized tree, flattening into table records, converting back
//! to a tree and re-serializing to XML, plus the ordered batch contract
//! offered to storage collaborators.

pub mod flatten;
pub mod tree;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::rc::Rc;

use crate::errors::Result;
use crate::models::table::DataTable;
use crate::models::DataModel;
use crate::validation::{DocumentValidator, WellFormedValidator};
use crate::xml::{Namespaces, XmlConverter, XmlElement};

pub use crate::xml::ParseOptions;
pub use flatten::{FlatTables, Record, TableData, Value};
pub use tree::{Content, DocumentNode, NodeHash, NodeValue};

/// Longest file path recorded in the root table's bookkeeping column
const MAX_RECORDED_PATH: usize = 255;

/// Truncate to the recording limit without splitting a UTF-8 character
fn truncate_recorded_path(mut path: String) -> String {
    if path.len() > MAX_RECORDED_PATH {
        let mut cut = MAX_RECORDED_PATH;
        while !path.is_char_boundary(cut) {
            cut -= 1;
        }
        path.truncate(cut);
    }
    path
}

/// A single XML document's data, based on a given data model
#[derive(Debug)]
pub struct Document<'a> {
    /// The data model this document conforms to
    pub model: &'a DataModel,
    /// Flat table records of the parsed document
    pub data: FlatTables,
    /// Path of the parsed file, when parsed from a file
    pub xml_file_path: Option<String>,
}

/// One table's batch of new records, plus its join-table batches, as
/// handed to the storage collaborator
pub struct InsertBatch<'a> {
    pub table: &'a DataTable,
    pub records: &'a [Record],
    pub relations: Vec<(&'a str, &'a [Record])>,
}

impl<'a> Document<'a> {
    pub fn new(model: &'a DataModel) -> Document<'a> {
        Document {
            model,
            data: FlatTables::default(),
            xml_file_path: None,
        }
    }

    /// Parse an XML file, validating first unless skipped.
    ///
    /// With validation skipped the file is streamed; otherwise it is
    /// read once so the validation collaborator sees the same bytes.
    pub fn parse_xml_file(&mut self, path: impl AsRef<Path>, options: &ParseOptions) -> Result<()> {
        let path = path.as_ref();
        let path_str = truncate_recorded_path(path.display().to_string());

        if !options.skip_validation {
            let content = std::fs::read(path)?;
            return self.parse_xml_bytes(&content, Some(&path_str), options);
        }

        self.xml_file_path = Some(path_str);
        tracing::info!(file = ?path, "parsing XML file");
        let reader = BufReader::new(File::open(path)?);
        let mut converter = XmlConverter::new(self.model);
        let tree = converter.parse_reader(reader, options)?;
        self.finish_parse(tree)
    }

    /// Parse in-memory XML content, validating first unless skipped
    pub fn parse_xml_bytes(
        &mut self,
        content: &[u8],
        file_path: Option<&str>,
        options: &ParseOptions,
    ) -> Result<()> {
        self.xml_file_path = file_path.map(|p| truncate_recorded_path(p.to_string()));

        if options.skip_validation {
            tracing::debug!("skipping document validation");
        } else {
            match &self.model.config.validator {
                Some(validator) => validator.validate(content)?,
                None => WellFormedValidator::default().validate(content)?,
            }
        }

        let mut converter = XmlConverter::new(self.model);
        let tree = converter.parse_reader(content, options)?;
        self.finish_parse(tree)
    }

    /// Flatten an already-built document tree into this document
    pub fn flatten_tree(&mut self, tree: Rc<DocumentNode>) -> Result<()> {
        self.finish_parse(tree)
    }

    fn finish_parse(&mut self, tree: Rc<DocumentNode>) -> Result<()> {
        let tree = match &self.model.config.hooks.document_tree {
            Some(hook) => {
                tracing::info!("running document tree hook");
                hook(tree)
            }
            None => tree,
        };
        self.data = flatten::doc_tree_to_flat_data(
            self.model,
            &tree,
            self.xml_file_path.as_deref(),
            None,
        )?;
        tracing::debug!(records = self.data.record_count(), "document flattened");
        Ok(())
    }

    /// Fill the configured metadata columns on the root record from
    /// caller-supplied values
    pub fn set_metadata(&mut self, metadata: &HashMap<String, Value>) {
        let root = self.model.root();
        let pk_column = root.pk_column(true);
        let Some(root_data) = self.data.tables.get_mut(&self.model.root_table) else {
            return;
        };
        let Some(record) = root_data
            .records
            .iter_mut()
            .find(|r| r.get(&pk_column).and_then(Value::as_int) == Some(1))
        else {
            return;
        };
        for meta_col in &self.model.config.metadata_columns {
            if let Some(value) = metadata.get(&meta_col.name) {
                record.insert(meta_col.name.clone(), value.clone());
            }
        }
    }

    /// Rebuild the normalized document tree from the flat records
    pub fn flat_data_to_doc_tree(&self) -> Result<Rc<DocumentNode>> {
        flatten::flat_data_to_doc_tree(self.model, &self.data)
    }

    /// Rebuild the XML element tree from the flat records
    pub fn to_xml(&self, nsmap: Option<&Namespaces>) -> Result<XmlElement> {
        let mut converter = XmlConverter::new(self.model);
        converter.document_tree = Some(self.flat_data_to_doc_tree()?);
        converter.to_xml(nsmap)
    }

    /// Rebuild pretty-printed XML bytes from the flat records
    pub fn to_xml_string(&self, nsmap: Option<&Namespaces>, indent: &str) -> Result<String> {
        Ok(self.to_xml(nsmap)?.to_xml_string(indent, true))
    }

    /// Per-table record batches in insert order (dependencies first);
    /// tables without records for this document are skipped
    pub fn insert_batches(&self) -> Vec<InsertBatch<'_>> {
        self.model
            .ordered_tables()
            .filter_map(|table| {
                self.data.tables.get(&table.type_name).map(|data| InsertBatch {
                    table,
                    records: &data.records,
                    relations: data
                        .relations
                        .iter()
                        .map(|(name, rows)| (name.as_str(), rows.as_slice()))
                        .collect(),
                })
            })
            .collect()
    }

    /// Tables in delete/drop order (reverse of the insert order)
    pub fn delete_order(&self) -> Vec<&DataTable> {
        self.model.ordered_tables_reversed().collect()
    }
}

impl fmt::Display for Document<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.model.name.as_deref().unwrap_or("unnamed");
        if self.data.tables.is_empty() {
            return write!(f, "empty {name} document");
        }
        writeln!(
            f,
            "parsed {} into a {name} document: {} records",
            self.xml_file_path.as_deref().unwrap_or("<stream>"),
            self.data.record_count()
        )?;
        for (type_name, data) in &self.data.tables {
            if let Some(table) = self.model.tables.get(type_name) {
                writeln!(f, "   {}: {}", table.name, data.records.len())?;
            }
        }
        Ok(())
    }
}
