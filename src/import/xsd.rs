//! XSD reader
//!
//! Reads a practical subset of W3C XML Schema into the neutral
//! declaration tree consumed by the model builder. Model groups are
//! flattened into ordered child lists with effective occurrence ranges;
//! repeatable nested sequences tag their children with an `ngroup` so
//! the original sibling interleaving can be reconstructed on output.
//!
//! Unsupported constructs (`xs:import`, `xs:include`, `xs:group` and
//! `xs:attributeGroup` references, `xs:complexContent`, substitution
//! groups) are rejected with a schema configuration error.

use std::collections::BTreeMap;
use std::path::Path;

use super::{
    AttributeDecl, ComplexTypeDecl, ElementDecl, SimpleTypeDecl, TypeRef, XsdSchema,
};
use crate::errors::{Error, Result};
use crate::models::column::{DataType, Occurs};
use crate::models::ModelGroup;
use crate::xml::element::XmlElement;

/// Parse an XSD document from a string
pub fn parse_xsd_str(content: &str) -> Result<XsdSchema> {
    let root = XmlElement::from_str_content(content, false)?;
    parse_schema(&root)
}

/// Parse an XSD document from a file
pub fn parse_xsd_file(path: impl AsRef<Path>) -> Result<XsdSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_xsd_str(&content)
}

/// Strip any namespace prefix from a QName-ish string
fn local(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// Cascade an enclosing group's effective occurrence range onto a
/// particle's own range; a choice parent makes its children optional.
fn cascade(parent_eff: Occurs, parent_model: ModelGroup, own: Occurs) -> Occurs {
    let parent_min = if parent_model == ModelGroup::Choice {
        0
    } else {
        parent_eff.min
    };
    Occurs {
        min: parent_min.min(own.min),
        max: match (parent_eff.max, own.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        },
    }
}

fn parse_occurs_attrs(el: &XmlElement) -> Result<Occurs> {
    let min = match el.attr("minOccurs") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| Error::SchemaConfig(format!("invalid minOccurs '{raw}'")))?,
        None => 1,
    };
    let max = match el.attr("maxOccurs") {
        Some("unbounded") => None,
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| Error::SchemaConfig(format!("invalid maxOccurs '{raw}'")))?,
        ),
        None => Some(1),
    };
    Ok(Occurs { min, max })
}

struct XsdContext<'a> {
    simple_nodes: BTreeMap<String, &'a XmlElement>,
    resolved_simple: BTreeMap<String, SimpleTypeDecl>,
    resolving: Vec<String>,
    ngroup_counter: u32,
}

impl<'a> XsdContext<'a> {
    fn next_ngroup(&mut self) -> String {
        self.ngroup_counter += 1;
        format!("g{}", self.ngroup_counter)
    }

    /// Resolve a simple type by name: named schema types first, then the
    /// XSD built-ins (unknown names preserved permissively).
    fn resolve_simple_name(&mut self, name: &str) -> Result<SimpleTypeDecl> {
        if let Some(resolved) = self.resolved_simple.get(name) {
            return Ok(resolved.clone());
        }
        if let Some(node) = self.simple_nodes.get(name).copied() {
            if self.resolving.iter().any(|n| n == name) {
                return Err(Error::SchemaConfig(format!(
                    "circular simpleType definition '{name}'"
                )));
            }
            self.resolving.push(name.to_string());
            let resolved = self.parse_simple_type(node)?;
            self.resolving.pop();
            self.resolved_simple
                .insert(name.to_string(), resolved.clone());
            return Ok(resolved);
        }
        Ok(SimpleTypeDecl::plain(DataType::from_xsd(name)))
    }

    /// Parse an `xs:simpleType` node (restriction or union form)
    fn parse_simple_type(&mut self, el: &XmlElement) -> Result<SimpleTypeDecl> {
        for child in &el.children {
            match child.local_name() {
                "restriction" => return self.parse_restriction(child),
                "union" => return self.parse_union(child),
                "list" => {
                    tracing::warn!("xs:list treated as an unrestricted string");
                    return Ok(SimpleTypeDecl::plain(DataType::String));
                }
                "annotation" => {}
                other => {
                    return Err(Error::SchemaConfig(format!(
                        "unsupported simpleType construct 'xs:{other}'"
                    )));
                }
            }
        }
        Ok(SimpleTypeDecl::plain(DataType::String))
    }

    fn parse_restriction(&mut self, el: &XmlElement) -> Result<SimpleTypeDecl> {
        let base = el.attr("base").ok_or_else(|| {
            Error::SchemaConfig("xs:restriction without a base type".to_string())
        })?;
        let base_decl = self.resolve_simple_name(local(base))?;

        let mut min_length = None;
        let mut max_length = None;
        let mut enum_lengths: Vec<u32> = Vec::new();
        for facet in &el.children {
            let value = facet.attr("value");
            match (facet.local_name(), value) {
                ("minLength", Some(v)) => {
                    min_length = v.parse::<u32>().ok();
                }
                ("maxLength", Some(v)) => {
                    max_length = v.parse::<u32>().ok();
                }
                ("length", Some(v)) => {
                    let len = v.parse::<u32>().ok();
                    min_length = len;
                    max_length = len;
                }
                ("enumeration", Some(v)) => {
                    enum_lengths.push(v.chars().count() as u32);
                }
                _ => {}
            }
        }

        let mut merged = SimpleTypeDecl {
            data_type: base_decl.data_type,
            min_length: merge_bound(min_length, base_decl.min_length, u32::min),
            max_length: merge_bound(max_length, base_decl.max_length, u32::max),
            allow_empty: true,
        };
        if !enum_lengths.is_empty() {
            merged.min_length = enum_lengths.iter().copied().min();
            merged.max_length = enum_lengths.iter().copied().max();
        }
        merged.allow_empty = merged.min_length.map_or(true, |min| min == 0);
        Ok(merged)
    }

    fn parse_union(&mut self, el: &XmlElement) -> Result<SimpleTypeDecl> {
        let mut members: Vec<SimpleTypeDecl> = Vec::new();
        if let Some(names) = el.attr("memberTypes") {
            for name in names.split_whitespace() {
                members.push(self.resolve_simple_name(local(name))?);
            }
        }
        for child in el.children_named("simpleType") {
            members.push(self.parse_simple_type(child)?);
        }
        if members.is_empty() {
            return Ok(SimpleTypeDecl::plain(DataType::String));
        }
        let first = members[0].data_type.clone();
        let data_type = if members.iter().all(|m| m.data_type == first) {
            first
        } else {
            DataType::String
        };
        let min_length = members
            .iter()
            .map(|m| m.min_length)
            .collect::<Option<Vec<u32>>>()
            .map(|mins| mins.into_iter().min().unwrap_or(0));
        let max_length = members
            .iter()
            .map(|m| m.max_length)
            .collect::<Option<Vec<u32>>>()
            .map(|maxes| maxes.into_iter().max().unwrap_or(0));
        let allow_empty = members.iter().any(|m| m.allow_empty);
        Ok(SimpleTypeDecl {
            data_type,
            min_length,
            max_length,
            allow_empty,
        })
    }

    /// Parse an `xs:complexType` node
    fn parse_complex_type(&mut self, el: &XmlElement) -> Result<ComplexTypeDecl> {
        let mut complex = ComplexTypeDecl {
            model_group: ModelGroup::Sequence,
            mixed: el.attr("mixed") == Some("true"),
            attributes: Vec::new(),
            children: Vec::new(),
            simple_content: None,
        };
        for child in &el.children {
            match child.local_name() {
                "sequence" | "all" | "choice" => {
                    if child.local_name() == "choice" {
                        complex.model_group = ModelGroup::Choice;
                    }
                    let children =
                        self.parse_group(child, Occurs::ONE, ModelGroup::Sequence)?;
                    complex.children.extend(children);
                }
                "attribute" => {
                    complex.attributes.push(self.parse_attribute(child)?);
                }
                "simpleContent" => {
                    let (base, mut attributes) = self.parse_simple_content(child)?;
                    complex.simple_content = Some(base);
                    complex.attributes.append(&mut attributes);
                }
                "complexContent" => {
                    return Err(Error::SchemaConfig(
                        "xs:complexContent is not supported".to_string(),
                    ));
                }
                "group" | "attributeGroup" => {
                    return Err(Error::SchemaConfig(format!(
                        "xs:{} references are not supported",
                        child.local_name()
                    )));
                }
                "annotation" => {}
                "anyAttribute" | "any" => {
                    tracing::warn!("ignoring xs:{} wildcard", child.local_name());
                }
                other => {
                    return Err(Error::SchemaConfig(format!(
                        "unsupported complexType construct 'xs:{other}'"
                    )));
                }
            }
        }
        Ok(complex)
    }

    /// Parse a model group, flattening nested groups.
    ///
    /// Children of a repeatable sequence share a fresh ngroup tag;
    /// elements always take the tag of their immediately enclosing
    /// group.
    fn parse_group(
        &mut self,
        el: &XmlElement,
        parent_eff: Occurs,
        parent_model: ModelGroup,
    ) -> Result<Vec<ElementDecl>> {
        let model = if el.local_name() == "choice" {
            ModelGroup::Choice
        } else {
            ModelGroup::Sequence
        };
        let own = parse_occurs_attrs(el)?;
        let eff = cascade(parent_eff, parent_model, own);
        let ngroup = if own.max != Some(1) && model == ModelGroup::Sequence {
            Some(self.next_ngroup())
        } else {
            None
        };

        let mut out = Vec::new();
        for child in &el.children {
            match child.local_name() {
                "element" => {
                    out.push(self.parse_element(child, eff, model, ngroup.clone())?);
                }
                "sequence" | "all" | "choice" => {
                    out.extend(self.parse_group(child, eff, model)?);
                }
                "group" => {
                    return Err(Error::SchemaConfig(
                        "xs:group references are not supported".to_string(),
                    ));
                }
                "annotation" => {}
                "any" => {
                    tracing::warn!("ignoring xs:any wildcard");
                }
                other => {
                    return Err(Error::SchemaConfig(format!(
                        "unsupported model group construct 'xs:{other}'"
                    )));
                }
            }
        }
        Ok(out)
    }

    fn parse_element(
        &mut self,
        el: &XmlElement,
        parent_eff: Occurs,
        parent_model: ModelGroup,
        ngroup: Option<String>,
    ) -> Result<ElementDecl> {
        if el.attr("ref").is_some() {
            return Err(Error::SchemaConfig(
                "xs:element references are not supported".to_string(),
            ));
        }
        let name = el
            .attr("name")
            .ok_or_else(|| Error::SchemaConfig("xs:element without a name".to_string()))?
            .to_string();
        let occurs = cascade(parent_eff, parent_model, parse_occurs_attrs(el)?);

        let type_ref = if let Some(type_name) = el.attr("type") {
            TypeRef::Named(local(type_name).to_string())
        } else if let Some(complex) = el.find_child("complexType") {
            TypeRef::InlineComplex(Box::new(self.parse_complex_type(complex)?))
        } else if let Some(simple) = el.find_child("simpleType") {
            TypeRef::InlineSimple(self.parse_simple_type(simple)?)
        } else {
            tracing::warn!("element '{name}' has no declared type, treating as string");
            TypeRef::AnyType
        };

        Ok(ElementDecl {
            name,
            type_ref,
            occurs,
            ngroup,
        })
    }

    fn parse_attribute(&mut self, el: &XmlElement) -> Result<AttributeDecl> {
        let name = el
            .attr("name")
            .ok_or_else(|| Error::SchemaConfig("xs:attribute without a name".to_string()))?
            .to_string();
        let simple_type = if let Some(type_name) = el.attr("type") {
            self.resolve_simple_name(local(type_name))?
        } else if let Some(simple) = el.find_child("simpleType") {
            self.parse_simple_type(simple)?
        } else {
            SimpleTypeDecl::plain(DataType::String)
        };
        Ok(AttributeDecl { name, simple_type })
    }

    fn parse_simple_content(
        &mut self,
        el: &XmlElement,
    ) -> Result<(SimpleTypeDecl, Vec<AttributeDecl>)> {
        for child in &el.children {
            match child.local_name() {
                "extension" | "restriction" => {
                    let base = child.attr("base").ok_or_else(|| {
                        Error::SchemaConfig("xs:simpleContent without a base type".to_string())
                    })?;
                    let base_decl = self.resolve_simple_name(local(base))?;
                    let mut attributes = Vec::new();
                    for attr in child.children_named("attribute") {
                        attributes.push(self.parse_attribute(attr)?);
                    }
                    return Ok((base_decl, attributes));
                }
                "annotation" => {}
                other => {
                    return Err(Error::SchemaConfig(format!(
                        "unsupported simpleContent construct 'xs:{other}'"
                    )));
                }
            }
        }
        Err(Error::SchemaConfig(
            "empty xs:simpleContent".to_string(),
        ))
    }
}

fn merge_bound(own: Option<u32>, base: Option<u32>, pick: fn(u32, u32) -> u32) -> Option<u32> {
    match (own, base) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_schema(root: &XmlElement) -> Result<XsdSchema> {
    if root.local_name() != "schema" {
        return Err(Error::SchemaConfig(format!(
            "expected xs:schema root element, found '{}'",
            root.name
        )));
    }

    let mut ctx = XsdContext {
        simple_nodes: BTreeMap::new(),
        resolved_simple: BTreeMap::new(),
        resolving: Vec::new(),
        ngroup_counter: 0,
    };

    // named simple types are collected up front so forward references
    // resolve
    for child in &root.children {
        if child.local_name() == "simpleType" {
            if let Some(name) = child.attr("name") {
                ctx.simple_nodes.insert(name.to_string(), child);
            }
        }
    }

    let mut schema = XsdSchema {
        target_namespace: root.attr("targetNamespace").map(|s| s.to_string()),
        ..Default::default()
    };

    for child in &root.children {
        match child.local_name() {
            "element" => {
                let element =
                    ctx.parse_element(child, Occurs::ONE, ModelGroup::Sequence, None)?;
                schema.roots.push(element);
            }
            "complexType" => {
                let name = child.attr("name").ok_or_else(|| {
                    Error::SchemaConfig("top-level complexType without a name".to_string())
                })?;
                let complex = ctx.parse_complex_type(child)?;
                schema.complex_types.insert(name.to_string(), complex);
            }
            "simpleType" => {
                let name = child.attr("name").ok_or_else(|| {
                    Error::SchemaConfig("top-level simpleType without a name".to_string())
                })?;
                let resolved = ctx.resolve_simple_name(name)?;
                schema.simple_types.insert(name.to_string(), resolved);
            }
            "import" | "include" | "redefine" => {
                return Err(Error::SchemaConfig(format!(
                    "xs:{} is not supported",
                    child.local_name()
                )));
            }
            "annotation" | "notation" => {}
            other => {
                return Err(Error::SchemaConfig(format!(
                    "unsupported top-level construct 'xs:{other}'"
                )));
            }
        }
    }

    schema.check_not_empty()?;
    Ok(schema)
}
