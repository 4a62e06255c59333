//! Schema import
//!
//! Neutral declaration tree for an XML schema: typed elements and
//! attributes with occurrence constraints and complex/simple type
//! distinctions. The [`xsd`] reader produces this tree from an XSD file;
//! it can also be constructed directly for schemas coming from other
//! sources.

pub mod xsd;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::models::column::{DataType, Occurs};
use crate::models::ModelGroup;

pub use xsd::{parse_xsd_file, parse_xsd_str};

/// A simple (scalar) type with its restrictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleTypeDecl {
    /// Scalar data type
    pub data_type: DataType,
    /// Minimum length restriction
    pub min_length: Option<u32>,
    /// Maximum length restriction
    pub max_length: Option<u32>,
    /// Whether the empty string is a valid value
    pub allow_empty: bool,
}

impl SimpleTypeDecl {
    /// An unrestricted type of the given kind
    pub fn plain(data_type: DataType) -> SimpleTypeDecl {
        SimpleTypeDecl {
            data_type,
            min_length: None,
            max_length: None,
            allow_empty: true,
        }
    }
}

/// An attribute declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDecl {
    /// Attribute name
    pub name: String,
    /// Value type
    pub simple_type: SimpleTypeDecl,
}

/// Reference from an element to its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    /// Named type, resolved against the schema's type maps (falling back
    /// to the XSD built-in types)
    Named(String),
    /// Anonymous complex type declared inline
    InlineComplex(Box<ComplexTypeDecl>),
    /// Anonymous simple type declared inline
    InlineSimple(SimpleTypeDecl),
    /// No declared type; behaves as an unrestricted string
    AnyType,
}

/// An element declaration.
///
/// `occurs` is the element's effective occurrence range with the
/// enclosing model groups' ranges cascaded in; `ngroup` tags elements of
/// a repeatable nested sequence so their sibling interleaving can be
/// reconstructed when generating XML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDecl {
    /// Element local name
    pub name: String,
    /// Element type
    pub type_ref: TypeRef,
    /// Effective occurrence range
    pub occurs: Occurs,
    /// Repeatable-nested-sequence tag shared by sibling elements
    pub ngroup: Option<String>,
}

/// A complex type declaration with its model group flattened into an
/// ordered child-element list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexTypeDecl {
    /// Top-level model group of the type
    pub model_group: ModelGroup,
    /// Mixed content
    pub mixed: bool,
    /// Attribute declarations
    pub attributes: Vec<AttributeDecl>,
    /// Child elements in document order, with effective occurrence
    /// ranges and ngroup tags
    pub children: Vec<ElementDecl>,
    /// Base simple type for simple-content types
    pub simple_content: Option<SimpleTypeDecl>,
}

/// A type reference resolved against a schema
#[derive(Debug)]
pub enum ResolvedType<'a> {
    Simple(SimpleTypeDecl),
    Complex(&'a ComplexTypeDecl),
}

/// A parsed schema: root element declarations plus named type maps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XsdSchema {
    /// Target namespace of the schema, if declared
    pub target_namespace: Option<String>,
    /// Top-level element declarations
    pub roots: Vec<ElementDecl>,
    /// Named complex types
    pub complex_types: BTreeMap<String, ComplexTypeDecl>,
    /// Named simple types
    pub simple_types: BTreeMap<String, SimpleTypeDecl>,
}

impl XsdSchema {
    /// Resolve a type reference to its declaration.
    ///
    /// Named references try the schema's complex types, then its simple
    /// types, then the XSD built-ins (with unknown names preserved
    /// permissively as string-like types).
    pub fn resolve<'a>(&'a self, type_ref: &'a TypeRef) -> Result<ResolvedType<'a>> {
        match type_ref {
            TypeRef::Named(name) => {
                if let Some(complex) = self.complex_types.get(name) {
                    return Ok(ResolvedType::Complex(complex));
                }
                if let Some(simple) = self.simple_types.get(name) {
                    return Ok(ResolvedType::Simple(simple.clone()));
                }
                Ok(ResolvedType::Simple(SimpleTypeDecl::plain(
                    DataType::from_xsd(name),
                )))
            }
            TypeRef::InlineComplex(complex) => Ok(ResolvedType::Complex(&**complex)),
            TypeRef::InlineSimple(simple) => Ok(ResolvedType::Simple(simple.clone())),
            TypeRef::AnyType => Ok(ResolvedType::Simple(SimpleTypeDecl::plain(DataType::String))),
        }
    }

    /// Named complex type local name for an element, when its type is a
    /// named complex type
    pub fn named_complex_type(&self, type_ref: &TypeRef) -> Option<String> {
        match type_ref {
            TypeRef::Named(name) if self.complex_types.contains_key(name) => Some(name.clone()),
            _ => None,
        }
    }

    /// Validate that the schema has at least one root element
    pub fn check_not_empty(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(Error::SchemaConfig(
                "schema declares no top-level element".to_string(),
            ));
        }
        Ok(())
    }
}
