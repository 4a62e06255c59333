//! Document tree
//!
//! A parsed XML document in its normalized form: immutable nodes keyed
//! by type name, with an ordered content map and a content hash. Once a
//! node is hashed and registered it is shared by every referencing
//! parent via `Rc`, never cloned or mutated.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// Content hash of a node, computed over its final simplified fields in
/// schema order
pub type NodeHash = Vec<u8>;

/// Value of one content entry
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// Scalar values in document order
    Values(Vec<String>),
    /// Child nodes in document order
    Nodes(Vec<Rc<DocumentNode>>),
}

impl NodeValue {
    /// Scalar values, if this entry holds any
    pub fn values(&self) -> Option<&[String]> {
        match self {
            NodeValue::Values(values) => Some(values),
            NodeValue::Nodes(_) => None,
        }
    }

    /// Child nodes, if this entry holds any
    pub fn nodes(&self) -> Option<&[Rc<DocumentNode>]> {
        match self {
            NodeValue::Nodes(nodes) => Some(nodes),
            NodeValue::Values(_) => None,
        }
    }
}

/// Ordered content map of a node, keyed by field name.
///
/// Keys keep document order; equality is order-insensitive, like the
/// map semantics the transcoder relies on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content(pub IndexMap<String, NodeValue>);

impl Content {
    pub fn new() -> Content {
        Content::default()
    }

    pub fn get(&self, key: &str) -> Option<&NodeValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: String, value: NodeValue) {
        self.0.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<NodeValue> {
        self.0.shift_remove(key)
    }

    /// Append a scalar value under `key`, creating the entry on first use
    pub fn push_value(&mut self, key: &str, value: String) {
        match self.0.get_mut(key) {
            Some(NodeValue::Values(values)) => values.push(value),
            Some(NodeValue::Nodes(_)) => {}
            None => {
                self.0
                    .insert(key.to_string(), NodeValue::Values(vec![value]));
            }
        }
    }

    /// Append a child node under `key`, creating the entry on first use
    pub fn push_node(&mut self, key: &str, node: Rc<DocumentNode>) {
        match self.0.get_mut(key) {
            Some(NodeValue::Nodes(nodes)) => nodes.push(node),
            Some(NodeValue::Values(_)) => {}
            None => {
                self.0.insert(key.to_string(), NodeValue::Nodes(vec![node]));
            }
        }
    }

    /// First entry in document order
    pub fn first(&self) -> Option<(&String, &NodeValue)> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scalar values stored under `key`
    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(NodeValue::values)
    }

    /// Child nodes stored under `key`
    pub fn nodes(&self, key: &str) -> Option<&[Rc<DocumentNode>]> {
        self.get(key).and_then(NodeValue::nodes)
    }
}

/// One node of the normalized document tree
#[derive(Clone, PartialEq)]
pub struct DocumentNode {
    /// Type name, matching a table of the data model
    pub type_name: String,
    /// Field name → values or child nodes
    pub content: Content,
    /// Content hash; empty until computed
    pub hash: NodeHash,
}

impl DocumentNode {
    pub fn new(type_name: &str, content: Content) -> DocumentNode {
        DocumentNode {
            type_name: type_name.to_string(),
            content,
            hash: NodeHash::new(),
        }
    }

    /// Recursively clear hashes, for comparisons against trees rebuilt
    /// from storage backends that do not persist record hashes
    pub fn without_hashes(&self) -> DocumentNode {
        let mut content = Content::new();
        for (key, value) in self.content.iter() {
            let stripped = match value {
                NodeValue::Values(values) => NodeValue::Values(values.clone()),
                NodeValue::Nodes(nodes) => NodeValue::Nodes(
                    nodes
                        .iter()
                        .map(|node| Rc::new(node.without_hashes()))
                        .collect(),
                ),
            };
            content.insert(key.clone(), stripped);
        }
        DocumentNode {
            type_name: self.type_name.clone(),
            content,
            hash: NodeHash::new(),
        }
    }

    /// Total number of nodes in this subtree (shared nodes counted once
    /// per reference)
    pub fn node_count(&self) -> usize {
        1 + self
            .content
            .iter()
            .filter_map(|(_, value)| value.nodes())
            .flatten()
            .map(|node| node.node_count())
            .sum::<usize>()
    }
}

impl fmt::Debug for DocumentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentNode")
            .field("type_name", &self.type_name)
            .field("content", &self.content)
            .field("hash", &hex::encode(&self.hash))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preserves_insertion_order() {
        let mut content = Content::new();
        content.push_value("b", "1".to_string());
        content.push_value("a", "2".to_string());
        content.push_value("b", "3".to_string());
        let keys: Vec<&String> = content.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(content.values("b").unwrap(), ["1", "3"]);
        assert_eq!(content.first().unwrap().0, "b");
    }

    #[test]
    fn test_content_equality_is_order_insensitive() {
        let mut left = Content::new();
        left.push_value("a", "1".to_string());
        left.push_value("b", "2".to_string());
        let mut right = Content::new();
        right.push_value("b", "2".to_string());
        right.push_value("a", "1".to_string());
        assert_eq!(left, right);
    }

    #[test]
    fn test_without_hashes() {
        let mut inner = DocumentNode::new("Child", Content::new());
        inner.hash = vec![1, 2, 3];
        let mut content = Content::new();
        content.push_node("child", Rc::new(inner));
        let mut node = DocumentNode::new("Parent", content);
        node.hash = vec![4, 5, 6];

        let stripped = node.without_hashes();
        assert!(stripped.hash.is_empty());
        assert!(stripped.content.nodes("child").unwrap()[0].hash.is_empty());
    }
}
