//! Owned XML element tree
//!
//! A minimal document model used for whole-document parsing, schema
//! reading and XML generation. Reading is strict by default; a recovery
//! mode salvages a best-effort tree from malformed input instead of
//! failing.

use std::io::BufRead;

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::{Error, Result};

/// One XML element with attributes, child elements and text content
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    /// Qualified element name as written in the document
    pub name: String,
    /// Attributes in document order, namespace declarations excluded
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order
    pub children: Vec<XmlElement>,
    /// Text content (concatenated direct text, whitespace-trimmed)
    pub text: Option<String>,
}

impl XmlElement {
    pub fn new(name: &str) -> XmlElement {
        XmlElement {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Local part of the element name, with any namespace prefix removed
    pub fn local_name(&self) -> &str {
        match self.name.rsplit_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Set (or replace) an attribute
    pub fn set_attr(&mut self, key: &str, value: &str) {
        for attr in self.attributes.iter_mut() {
            if attr.0 == key {
                attr.1 = value.to_string();
                return;
            }
        }
        self.attributes.push((key.to_string(), value.to_string()));
    }

    /// Attribute value by key
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child element with the given local name
    pub fn find_child(&self, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// Child elements with the given local name
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.local_name() == local)
    }

    /// True when the element has no children, text or attributes
    pub fn is_hollow(&self) -> bool {
        self.children.is_empty() && self.text.is_none() && self.attributes.is_empty()
    }

    fn append_text(&mut self, more: &str) {
        match &mut self.text {
            Some(text) => text.push_str(more),
            None => self.text = Some(more.to_string()),
        }
    }

    /// Parse a document from a buffered reader.
    ///
    /// With `recover` set, tag-nesting errors are tolerated (end tags
    /// close the innermost open element) and a premature end of input
    /// closes all open elements; a byte stream with no root element
    /// still fails.
    pub fn from_reader<R: BufRead>(reader: R, recover: bool) -> Result<XmlElement> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;
        reader.config_mut().check_end_names = !recover;

        let mut buf = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(start)) => {
                    if root.is_some() && stack.is_empty() {
                        if recover {
                            break;
                        }
                        return Err(Error::MalformedInput(
                            "content after document root".to_string(),
                        ));
                    }
                    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                    let mut element = XmlElement::new(&name);
                    for attr in start.attributes() {
                        match attr {
                            Ok(attr) => {
                                let key =
                                    String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                if key == "xmlns" || key.starts_with("xmlns:") {
                                    continue;
                                }
                                let value = attr.unescape_value().map_err(|e| {
                                    Error::MalformedInput(format!(
                                        "bad attribute value: {e}"
                                    ))
                                })?;
                                element.attributes.push((key, value.into_owned()));
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
                    stack.push(element);
                }
                Ok(Event::End(_)) => match stack.pop() {
                    Some(element) => {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        } else {
                            root = Some(element);
                        }
                    }
                    None => {
                        if !recover {
                            return Err(Error::MalformedInput(
                                "unmatched closing tag".to_string(),
                            ));
                        }
                    }
                },
                Ok(Event::Text(text)) => {
                    let text = text.unescape().map_err(|e| {
                        Error::MalformedInput(format!("bad text content: {e}"))
                    })?;
                    if let Some(top) = stack.last_mut() {
                        top.append_text(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).to_string();
                    if let Some(top) = stack.last_mut() {
                        top.append_text(&text);
                    }
                }
                Ok(Event::Eof) => {
                    if !stack.is_empty() {
                        if !recover {
                            return Err(Error::MalformedInput(
                                "unexpected end of document".to_string(),
                            ));
                        }
                        // close whatever is still open, innermost first
                        while let Some(element) = stack.pop() {
                            if let Some(parent) = stack.last_mut() {
                                parent.children.push(element);
                            } else {
                                root = Some(element);
                            }
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

        root.ok_or_else(|| Error::MalformedInput("no root element found".to_string()))
    }

    /// Parse a document from a string slice
    pub fn from_str_content(content: &str, recover: bool) -> Result<XmlElement> {
        XmlElement::from_reader(content.as_bytes(), recover)
    }

    /// Serialize the element tree, pretty-printed.
    ///
    /// `indent` is repeated per nesting level; with `xml_declaration` an
    /// XML declaration line is emitted first. Output always ends with a
    /// newline.
    pub fn to_xml_string(&self, indent: &str, xml_declaration: bool) -> String {
        let mut out = String::new();
        if xml_declaration {
            out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        }
        self.write_into(&mut out, indent, 0);
        out
    }

    fn write_into(&self, out: &mut String, indent: &str, level: usize) {
        let pad = indent.repeat(level);
        out.push_str(&pad);
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&partial_escape(text.as_str()));
        }
        if self.children.is_empty() {
            out.push_str("</");
            out.push_str(&self.name);
            out.push_str(">\n");
            return;
        }
        out.push('\n');
        for child in &self.children {
            child.write_into(out, indent, level + 1);
        }
        out.push_str(&pad);
        out.push_str("</");
        out.push_str(&self.name);
        out.push_str(">\n");
    }
}
