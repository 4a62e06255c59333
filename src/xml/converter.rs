//! XML to document-tree conversion
//!
//! Applies the transforms recorded by the simplification engine while
//! parsing (elevated children are dissolved into their parent, choice
//! tables are rewritten to `type`/`value` entries), computes a content
//! hash per node over the simplified field list in schema order, and
//! deduplicates nodes through a per-parse hash registry.

use std::collections::HashMap;
use std::io::BufRead;
use std::rc::Rc;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::element::XmlElement;
use super::ParseOptions;
use crate::document::tree::{Content, DocumentNode, NodeHash, NodeValue};
use crate::errors::{Error, Result};
use crate::models::table::TableField;
use crate::models::{DataModel, FieldTransform, TypeTransform};

/// Per-parse dedup registry: type name → hash → registered node (a
/// `None` entry records a node dropped by the node hook, so identical
/// nodes stay dropped)
type HashMaps = HashMap<String, HashMap<NodeHash, Option<Rc<DocumentNode>>>>;

/// Converts between XML documents and the normalized document tree for
/// one data model. Reusable across documents; all per-parse state is
/// local to a call.
pub struct XmlConverter<'a> {
    pub model: &'a DataModel,
    /// Tree produced by the last parse, or installed by the caller for
    /// serialization
    pub document_tree: Option<Rc<DocumentNode>>,
}

/// One in-progress element during iterative parsing
enum Frame {
    /// Element mapped to a table node
    Node {
        type_name: Option<String>,
        name: String,
        content: Content,
        text: String,
    },
    /// Element whose values join into its parent's content
    Joined { name: String, text: String },
}

impl<'a> XmlConverter<'a> {
    pub fn new(model: &'a DataModel) -> XmlConverter<'a> {
        XmlConverter {
            model,
            document_tree: None,
        }
    }

    /// Parse an XML document into the normalized tree.
    ///
    /// The iterative and recursive strategies produce equal trees; the
    /// iterative one processes the event stream in a single forward
    /// pass and releases each closed subtree as soon as it is folded
    /// into its parent.
    pub fn parse_reader<R: BufRead>(
        &mut self,
        reader: R,
        options: &ParseOptions,
    ) -> Result<Rc<DocumentNode>> {
        let tree = if options.iterparse {
            self.parse_iterative(reader, options.recover)?
        } else {
            let root = XmlElement::from_reader(reader, options.recover)?;
            self.parse_element_tree(&root)?
        };
        self.document_tree = Some(tree.clone());
        Ok(tree)
    }

    /// Recursive strategy: parse a whole in-memory element tree.
    pub fn parse_element_tree(&self, root: &XmlElement) -> Result<Rc<DocumentNode>> {
        let mut hash_maps = HashMaps::new();
        let root_type = self.model.root_table.clone();
        let doc;
        let doc_ref = if self.model.root().is_virtual_node {
            let mut wrapper = XmlElement::new(&root_type);
            wrapper.children.push(root.clone());
            doc = wrapper;
            &doc
        } else {
            root
        };
        let node = self.parse_xml_node(&root_type, doc_ref, &mut hash_maps)?;
        node.ok_or_else(|| Error::MalformedInput("document root node was dropped".to_string()))
    }

    fn parse_xml_node(
        &self,
        type_name: &str,
        elem: &XmlElement,
        hash_maps: &mut HashMaps,
    ) -> Result<Option<Rc<DocumentNode>>> {
        let mut content = self.node_content(type_name, elem, hash_maps)?;
        self.apply_choice_transform(type_name, &mut content);
        self.hash_and_dedup(type_name, content, hash_maps)
    }

    /// Build a node's content map from an element: attributes, mixed
    /// content text, joined leaf values, child nodes; children marked as
    /// elevated dissolve into this map with prefixed keys.
    fn node_content(
        &self,
        type_name: &str,
        elem: &XmlElement,
        hash_maps: &mut HashMaps,
    ) -> Result<Content> {
        let mut content = Content::new();
        for (key, value) in &elem.attributes {
            if let Some(local) = attribute_key(key) {
                content.push_value(local, value.clone());
            }
        }
        if let Some(text) = &elem.text {
            let text = text.trim();
            if !text.is_empty() {
                content.insert(
                    "value".to_string(),
                    NodeValue::Values(vec![text.to_string()]),
                );
            }
        }
        for child in &elem.children {
            let key = child.local_name().to_string();
            let lookup = self
                .model
                .fields_transforms
                .get(&(type_name.to_string(), key.clone()));
            match lookup {
                None | Some((_, FieldTransform::Join)) | Some((None, _)) => {
                    if let Some(text) = &child.text {
                        let text = text.trim();
                        if !text.is_empty() {
                            content.push_value(&key, text.to_string());
                        }
                    }
                }
                Some((Some(child_type), transform)) if transform.is_elevate() => {
                    let child_type = child_type.clone();
                    let transform = *transform;
                    let mut child_content =
                        self.node_content(&child_type, child, hash_maps)?;
                    self.apply_choice_transform(&child_type, &mut child_content);
                    let prefix = match transform {
                        FieldTransform::Elevate => format!("{key}_"),
                        _ => String::new(),
                    };
                    for (child_key, value) in child_content.0 {
                        content.insert(format!("{prefix}{child_key}"), value);
                    }
                }
                Some((Some(child_type), _)) => {
                    let child_type = child_type.clone();
                    if let Some(node) = self.parse_xml_node(&child_type, child, hash_maps)? {
                        content.push_node(&key, node);
                    }
                }
            }
        }
        Ok(content)
    }

    /// Iterative strategy: single forward pass with an explicit frame
    /// stack. A frame is finalized exactly once at its end event; the
    /// closed subtree is moved into its parent and only stays alive
    /// through the dedup registry or a still-open ancestor.
    fn parse_iterative<R: BufRead>(
        &self,
        reader: R,
        recover: bool,
    ) -> Result<Rc<DocumentNode>> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;
        reader.config_mut().check_end_names = !recover;

        let mut hash_maps = HashMaps::new();
        let root_table = self.model.root();
        let mut stack: Vec<Frame> = vec![Frame::Node {
            type_name: if root_table.is_virtual_node {
                Some(self.model.root_table.clone())
            } else {
                None
            },
            name: String::new(),
            content: Content::new(),
            text: String::new(),
        }];

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(start)) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                    let key = local_name(&name).to_string();
                    // schema-unknown nesting inside a joined leaf stays
                    // joined; otherwise look the element up in the
                    // parent frame's field transforms
                    let parent = match stack.last().expect("stack never empty") {
                        Frame::Joined { .. } => None,
                        Frame::Node { type_name, .. } => Some(type_name.clone()),
                    };
                    let Some(parent_type) = parent else {
                        stack.push(Frame::Joined {
                            name: key,
                            text: String::new(),
                        });
                        buf.clear();
                        continue;
                    };
                    let (node_type, joined) = match parent_type {
                        Some(parent_type) => {
                            match self
                                .model
                                .fields_transforms
                                .get(&(parent_type, key.clone()))
                            {
                                Some((Some(target), transform))
                                    if *transform != FieldTransform::Join =>
                                {
                                    (Some(target.clone()), false)
                                }
                                _ => (None, true),
                            }
                        }
                        None => (Some(self.model.root_table.clone()), false),
                    };
                    if joined {
                        stack.push(Frame::Joined {
                            name: key,
                            text: String::new(),
                        });
                    } else {
                        let mut content = Content::new();
                        for attr in start.attributes() {
                            match attr {
                                Ok(attr) => {
                                    let attr_key =
                                        String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                    if let Some(local) = attribute_key(&attr_key) {
                                        let value = attr.unescape_value().map_err(|e| {
                                            Error::MalformedInput(format!(
                                                "bad attribute value: {e}"
                                            ))
                                        })?;
                                        content.push_value(local, value.into_owned());
                                    }
                                }
                                Err(e) if recover => {
                                    tracing::warn!("skipping malformed attribute: {e}");
                                }
                                Err(e) => {
                                    return Err(Error::MalformedInput(format!(
                                        "malformed attribute: {e}"
                                    )));
                                }
                            }
                        }
                        stack.push(Frame::Node {
                            type_name: node_type,
                            name: key,
                            content,
                            text: String::new(),
                        });
                    }
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|e| Error::MalformedInput(format!("bad text content: {e}")))?;
                    match stack.last_mut().expect("stack never empty") {
                        Frame::Node { text: buffer, .. } | Frame::Joined { text: buffer, .. } => {
                            buffer.push_str(&text);
                        }
                    }
                }
                Ok(Event::CData(data)) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).to_string();
                    match stack.last_mut().expect("stack never empty") {
                        Frame::Node { text: buffer, .. } | Frame::Joined { text: buffer, .. } => {
                            buffer.push_str(&text);
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    if stack.len() == 1 {
                        if recover {
                            continue;
                        }
                        return Err(Error::MalformedInput(
                            "unmatched closing tag".to_string(),
                        ));
                    }
                    let frame = stack.pop().expect("stack never empty");
                    self.close_frame(frame, &mut stack, &mut hash_maps)?;
                }
                Ok(Event::Eof) => {
                    if stack.len() > 1 {
                        if !recover {
                            return Err(Error::MalformedInput(
                                "unexpected end of document".to_string(),
                            ));
                        }
                        while stack.len() > 1 {
                            let frame = stack.pop().expect("stack never empty");
                            self.close_frame(frame, &mut stack, &mut hash_maps)?;
                        }
                    }
                    break;
                }
                Ok(_) => {}
                Err(quick_xml::Error::IllFormed(e)) if recover => {
                    tracing::warn!("recovering from ill-formed XML: {e}");
                }
                Err(e) => {
                    return Err(Error::MalformedInput(format!(
                        "XML parsing error at position {}: {e}",
                        reader.error_position()
                    )));
                }
            }
            buf.clear();
        }

        // unwrap the sentinel frame
        let Some(Frame::Node {
            type_name, content, ..
        }) = stack.pop()
        else {
            return Err(Error::Invariant("sentinel frame lost".to_string()));
        };
        if let Some(root_type) = type_name {
            // virtual root wrapping multiple possible document roots
            let mut content = content;
            self.apply_choice_transform(&root_type, &mut content);
            return self
                .hash_and_dedup(&root_type, content, &mut hash_maps)?
                .ok_or_else(|| {
                    Error::MalformedInput("document root node was dropped".to_string())
                });
        }
        for (_, value) in content.iter() {
            if let Some(nodes) = value.nodes() {
                if let Some(first) = nodes.first() {
                    return Ok(first.clone());
                }
            }
        }
        Err(Error::MalformedInput("no root element found".to_string()))
    }

    /// Finalize one closed element: fold its text, apply the choice
    /// transform, then either dissolve it into the parent (elevated) or
    /// hash, deduplicate and attach it.
    fn close_frame(
        &self,
        frame: Frame,
        stack: &mut Vec<Frame>,
        hash_maps: &mut HashMaps,
    ) -> Result<()> {
        match frame {
            Frame::Joined { name, text } => {
                let text = text.trim();
                if !text.is_empty() {
                    if let Frame::Node { content, .. } =
                        stack.last_mut().expect("stack never empty")
                    {
                        content.push_value(&name, text.to_string());
                    }
                }
            }
            Frame::Node {
                type_name,
                name,
                mut content,
                text,
            } => {
                let text = text.trim();
                if !text.is_empty() {
                    content.insert(
                        "value".to_string(),
                        NodeValue::Values(vec![text.to_string()]),
                    );
                }
                let node_type = type_name.ok_or_else(|| {
                    Error::Invariant("node frame without a type".to_string())
                })?;
                self.apply_choice_transform(&node_type, &mut content);

                let parent_type = match stack.last() {
                    Some(Frame::Node { type_name, .. }) => type_name.clone(),
                    _ => None,
                };
                let transform = parent_type
                    .as_ref()
                    .and_then(|pt| {
                        self.model
                            .fields_transforms
                            .get(&(pt.clone(), name.clone()))
                    })
                    .map(|(_, transform)| *transform)
                    .unwrap_or(FieldTransform::None);

                if transform.is_elevate() {
                    let prefix = match transform {
                        FieldTransform::Elevate => format!("{name}_"),
                        _ => String::new(),
                    };
                    if let Frame::Node {
                        content: parent_content,
                        ..
                    } = stack.last_mut().expect("stack never empty")
                    {
                        for (child_key, value) in content.0 {
                            parent_content.insert(format!("{prefix}{child_key}"), value);
                        }
                    }
                } else if let Some(node) = self.hash_and_dedup(&node_type, content, hash_maps)? {
                    if let Frame::Node {
                        content: parent_content,
                        ..
                    } = stack.last_mut().expect("stack never empty")
                    {
                        parent_content.push_node(&name, node);
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite a choice-collapsed table's content to `type`/`value`
    pub(crate) fn apply_choice_transform(&self, type_name: &str, content: &mut Content) {
        if self.model.types_transforms.get(type_name) != Some(&TypeTransform::Choice) {
            return;
        }
        let Some((key, value)) = content.first().map(|(k, v)| (k.clone(), v.clone())) else {
            return;
        };
        let mut rewritten = Content::new();
        rewritten.insert("type".to_string(), NodeValue::Values(vec![key]));
        rewritten.insert("value".to_string(), value);
        *content = rewritten;
    }

    /// Content hash over the table's final simplified field list in
    /// schema order. Multi-relation child hashes are sorted before being
    /// mixed in, making the hash independent of input order.
    pub(crate) fn compute_node_hash(&self, type_name: &str, content: &Content) -> Result<NodeHash> {
        let table = self.model.tables.get(type_name).ok_or_else(|| {
            Error::Invariant(format!("no table for node type '{type_name}'"))
        })?;
        let mut digest = self.model.config.record_hash.builder.digest();
        for field in &table.fields {
            match field {
                TableField::Column(col) => match content.values(&col.name) {
                    Some(values) => digest.update(format!("{values:?}").as_bytes()),
                    None => digest.update(b"None"),
                },
                TableField::Single(rel) => {
                    match content.nodes(&rel.name).and_then(|nodes| nodes.first()) {
                        Some(node) => digest.update(&node.hash),
                        None => digest.update(b""),
                    }
                }
                TableField::Multi(rel) => {
                    let mut hashes: Vec<&[u8]> = content
                        .nodes(&rel.name)
                        .map(|nodes| nodes.iter().map(|n| n.hash.as_slice()).collect())
                        .unwrap_or_default();
                    hashes.sort_unstable();
                    for hash in hashes {
                        digest.update(hash);
                    }
                }
            }
        }
        let mut out = digest.finalize().to_vec();
        out.truncate(self.model.config.record_hash.size);
        Ok(out)
    }

    /// Hash a node's content and register it, returning the shared node
    /// for any later occurrence with the same (type, hash). The optional
    /// node hook runs once per distinct node and may drop it.
    fn hash_and_dedup(
        &self,
        type_name: &str,
        content: Content,
        hash_maps: &mut HashMaps,
    ) -> Result<Option<Rc<DocumentNode>>> {
        let hash = self.compute_node_hash(type_name, &content)?;
        if let Some(existing) = hash_maps
            .get(type_name)
            .and_then(|by_hash| by_hash.get(&hash))
        {
            return Ok(existing.clone());
        }
        let node = DocumentNode {
            type_name: type_name.to_string(),
            content,
            hash: hash.clone(),
        };
        let registered = match &self.model.config.hooks.document_tree_node {
            Some(hook) => hook(node).map(Rc::new),
            None => Some(Rc::new(node)),
        };
        hash_maps
            .entry(type_name.to_string())
            .or_default()
            .insert(hash, registered.clone());
        Ok(registered)
    }
}

/// Local part of a QName
fn local_name(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// Content key for an attribute, or `None` for namespace declarations
/// and schema-location attributes that are not data
fn attribute_key(key: &str) -> Option<&str> {
    if key == "xmlns" || key.starts_with("xmlns:") {
        return None;
    }
    let local = local_name(key);
    if local == "noNamespaceSchemaLocation" || local == "schemaLocation" {
        return None;
    }
    Some(local)
}
