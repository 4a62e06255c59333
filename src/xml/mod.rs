//! XML conversion
//!
//! Transcoding between XML byte streams and the normalized document
//! tree, in both directions. Parsing offers an iterative strategy
//! (single forward pass over the event stream, constant memory) and a
//! recursive strategy (whole document in memory); both are observably
//! equivalent.

pub mod converter;
pub mod element;
pub mod serializer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use converter::XmlConverter;
pub use element::XmlElement;

/// Namespace map applied to the root element on output: prefix (or
/// `None` for the default namespace) → namespace URI
pub type Namespaces = BTreeMap<Option<String>, String>;

/// Options for parsing an XML document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Skip the validation collaborator before parsing
    pub skip_validation: bool,
    /// Salvage a best-effort tree from malformed input instead of
    /// failing
    pub recover: bool,
    /// Use iterative (streaming) parsing; slightly slower but with
    /// constant memory on large documents
    pub iterparse: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            skip_validation: true,
            recover: false,
            iterparse: true,
        }
    }
}
