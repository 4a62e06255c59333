//! Document-tree to XML conversion
//!
//! Rebuilds the original XML structure from a normalized tree, inverting
//! the schema simplification: elevated fields reopen their recorded name
//! chains as nested elements, choice-collapsed nodes turn back into the
//! original alternative element, and fields of a repeatable nested
//! sequence are interleaved in their original sibling order.

use super::converter::XmlConverter;
use super::element::XmlElement;
use super::Namespaces;
use crate::errors::{Error, Result};
use crate::document::tree::DocumentNode;
use crate::models::table::TableField;
use crate::models::{ChainLink, TypeTransform};

impl<'a> XmlConverter<'a> {
    /// Convert the held document tree into an XML element tree.
    ///
    /// `nsmap` entries are rendered as namespace declarations on the
    /// root element. Namespaced attributes and the root element's own
    /// attributes are the caller's to copy in.
    pub fn to_xml(&self, nsmap: Option<&Namespaces>) -> Result<XmlElement> {
        let tree = self
            .document_tree
            .as_ref()
            .ok_or_else(|| Error::Invariant("no document tree to serialize".to_string()))?;
        let root_name = self
            .model
            .tables
            .get(&tree.type_name)
            .ok_or_else(|| {
                Error::Invariant(format!("no table for node type '{}'", tree.type_name))
            })?
            .name
            .clone();
        let mut element = self.make_xml_node(tree, &root_name)?;
        if self.model.root().is_virtual_node {
            element = element.children.into_iter().next().ok_or_else(|| {
                Error::Invariant("virtual root wraps no document element".to_string())
            })?;
        }
        if let Some(nsmap) = nsmap {
            let mut attributes = Vec::with_capacity(nsmap.len() + element.attributes.len());
            for (prefix, uri) in nsmap {
                let key = match prefix {
                    None => "xmlns".to_string(),
                    Some(prefix) => format!("xmlns:{prefix}"),
                };
                attributes.push((key, uri.clone()));
            }
            attributes.append(&mut element.attributes);
            element.attributes = attributes;
        }
        Ok(element)
    }

    /// Serialize the held document tree to pretty-printed XML bytes
    pub fn to_xml_string(&self, nsmap: Option<&Namespaces>, indent: &str) -> Result<String> {
        Ok(self.to_xml(nsmap)?.to_xml_string(indent, true))
    }

    /// Build the XML element for one node.
    ///
    /// Walks the table's post-simplification field order while keeping a
    /// stack of in-progress elements keyed by each field's name chain:
    /// shared chain prefixes keep their frames open, departed frames are
    /// closed (and dropped when they stayed empty). Fields tagged with
    /// an ngroup are buffered and interleaved round-robin when the group
    /// changes.
    fn make_xml_node(&self, node: &DocumentNode, name: &str) -> Result<XmlElement> {
        let table = self.model.tables.get(&node.type_name).ok_or_else(|| {
            Error::Invariant(format!("no table for node type '{}'", node.type_name))
        })?;

        let mut stack: Vec<(Option<String>, XmlElement)> =
            vec![(Some(node.type_name.clone()), XmlElement::new(name))];
        let mut prev_chain: Vec<ChainLink> = Vec::new();
        let mut prev_ngroup: Option<String> = None;
        let mut ngroup_stack: Vec<Vec<XmlElement>> = Vec::new();

        for field in &table.fields {
            let full_chain = field.name_chain();
            let chain = &full_chain[..full_chain.len().saturating_sub(1)];

            // close frames this field's chain no longer shares
            let mut depth = prev_chain.len();
            while depth > 0
                && (depth > chain.len() || chain[depth - 1].name != prev_chain[depth - 1].name)
            {
                let (frame_type, completed) = stack
                    .pop()
                    .ok_or_else(|| Error::Invariant("element stack underflow".to_string()))?;
                if let Some(element) = self.invert_choice(frame_type.as_deref(), completed) {
                    if !element.is_hollow() {
                        parent_of(&mut stack)?.children.push(element);
                    }
                }
                depth -= 1;
            }
            // open the remainder of this field's chain
            while depth < chain.len() {
                stack.push((
                    chain[depth].type_name.clone(),
                    XmlElement::new(&chain[depth].name),
                ));
                depth += 1;
            }
            prev_chain = chain.to_vec();

            let leaf_name = &full_chain
                .last()
                .ok_or_else(|| Error::Invariant("field with empty name chain".to_string()))?
                .name;
            let mut children: Vec<XmlElement> = Vec::new();
            let mut attributes: Vec<(String, String)> = Vec::new();
            let mut text_content: Option<String> = None;

            match field {
                TableField::Column(col) => {
                    if let Some(values) = node.content.values(&col.name) {
                        if col.is_attr {
                            if let Some(first) = values.first() {
                                attributes.push((leaf_name.clone(), first.clone()));
                            }
                        } else if col.is_content {
                            text_content = values.first().cloned();
                        } else {
                            for value in values {
                                let mut child = XmlElement::new(leaf_name);
                                child.text = Some(value.clone());
                                children.push(child);
                            }
                        }
                    }
                }
                TableField::Single(rel) => {
                    if let Some(child) =
                        node.content.nodes(&rel.name).and_then(|nodes| nodes.first())
                    {
                        children.push(self.make_xml_node(child, leaf_name)?);
                    }
                }
                TableField::Multi(rel) => {
                    if let Some(nodes) = node.content.nodes(&rel.name) {
                        for child in nodes {
                            children.push(self.make_xml_node(child, leaf_name)?);
                        }
                    }
                }
            }

            // leaving an ngroup: interleave the buffered runs
            let field_ngroup = field.ngroup().map(str::to_string);
            if prev_ngroup.is_some() && field_ngroup != prev_ngroup {
                interleave_groups(&mut ngroup_stack, parent_of(&mut stack)?);
            }
            prev_ngroup = field_ngroup;

            if !children.is_empty() {
                if field.ngroup().is_some() {
                    ngroup_stack.push(children);
                } else {
                    parent_of(&mut stack)?.children.append(&mut children);
                }
            }
            for (key, value) in attributes {
                parent_of(&mut stack)?.set_attr(&key, &value);
            }
            if let Some(text) = text_content {
                parent_of(&mut stack)?.text = Some(text);
            }
        }

        if !ngroup_stack.is_empty() {
            interleave_groups(&mut ngroup_stack, parent_of(&mut stack)?);
        }

        // close whatever chain frames remain
        while stack.len() > 1 {
            let (frame_type, completed) = stack.pop().expect("stack length checked");
            if let Some(element) = self.invert_choice(frame_type.as_deref(), completed) {
                if !element.children.is_empty() {
                    parent_of(&mut stack)?.children.push(element);
                }
            }
        }

        let (frame_type, element) = stack.pop().expect("root frame always present");
        self.invert_choice(frame_type.as_deref(), element)
            .ok_or_else(|| {
                Error::Invariant(format!(
                    "choice node of type '{}' is missing its type/value pair",
                    node.type_name
                ))
            })
    }

    /// Replace a choice-collapsed frame's synthetic `type`/`value`
    /// children by the original alternative element
    fn invert_choice(&self, frame_type: Option<&str>, element: XmlElement) -> Option<XmlElement> {
        let Some(type_name) = frame_type else {
            return Some(element);
        };
        if self.model.types_transforms.get(type_name) != Some(&TypeTransform::Choice) {
            return Some(element);
        }
        let alternative = element.find_child("type")?.text.clone()?;
        let value_text = element.find_child("value").and_then(|c| c.text.clone());
        let mut rebuilt = XmlElement::new(&element.name);
        let mut child = XmlElement::new(&alternative);
        child.text = value_text;
        rebuilt.children.push(child);
        Some(rebuilt)
    }
}

fn parent_of<'s>(
    stack: &'s mut [(Option<String>, XmlElement)],
) -> Result<&'s mut XmlElement> {
    stack
        .last_mut()
        .map(|(_, element)| element)
        .ok_or_else(|| Error::Invariant("element stack underflow".to_string()))
}

/// Round-robin zip of buffered ngroup runs: A,B,A,B instead of A,A,B,B
fn interleave_groups(groups: &mut Vec<Vec<XmlElement>>, parent: &mut XmlElement) {
    let longest = groups.iter().map(Vec::len).max().unwrap_or(0);
    let mut iterators: Vec<std::vec::IntoIter<XmlElement>> =
        groups.drain(..).map(Vec::into_iter).collect();
    for _ in 0..longest {
        for iterator in iterators.iter_mut() {
            if let Some(element) = iterator.next() {
                parent.children.push(element);
            }
        }
    }
}
