//! xml-tabular - SDK for converting XML documents into a normalized
//! relational model and back
//!
//! Provides:
//! - Schema import: an XSD-subset reader producing a neutral schema
//!   declaration tree
//! - Schema model: one table per complex type, simplified in place
//!   (choice collapsing, relation elevation, column joining) with every
//!   transform recorded for bijective round trips
//! - Transcoding: XML ↔ normalized document tree ↔ flat, deduplicated
//!   table records, with content-hash based structural deduplication
//! - XML serialization: byte-faithful reconstruction of the original
//!   document, including nested repeat-group interleaving and choice
//!   reconstruction

pub mod config;
pub mod document;
pub mod errors;
pub mod import;
pub mod models;
pub mod validation;
pub mod xml;

// Re-export commonly used types
pub use config::{
    FieldConfig, Hooks, MetadataColumn, ModelConfig, RecordHashConfig, TableConfig,
    TransformConfig,
};
pub use document::{Document, FlatTables, InsertBatch, ParseOptions, Record, Value};
pub use document::{Content, DocumentNode, NodeValue};
pub use errors::{Error, Result};
pub use import::{parse_xsd_file, parse_xsd_str, XsdSchema};
pub use models::{Column, DataModel, DataTable, DataType, FieldTransform, Occurs, Relation};
pub use validation::{DocumentValidator, WellFormedValidator};
pub use xml::{Namespaces, XmlConverter, XmlElement};
