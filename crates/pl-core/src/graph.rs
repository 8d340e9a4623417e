//! Node-graph workflow model.
//!
//! The serialized form is a JSON object mapping node ids to
//! `{"class_type": "...", "inputs": {...}}`. Declaration order of the object is
//! kept: later scans rely on "first match" and "last match" semantics.

use std::borrow::Borrow;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::GraphError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single node input value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    /// Link to another node's output: `["<node id>", <output index>]`.
    Reference(NodeId, i64),
    List(Vec<Value>),
    /// Null, objects, and anything else the parsers never interpret.
    Other(serde_json::Value),
}

impl Value {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<(&NodeId, i64)> {
        match self {
            Self::Reference(node, output) => Some((node, *output)),
            _ => None,
        }
    }

    /// Node id a link-like value points at, read as its element `[0]`.
    ///
    /// Canonical references give their node id; any other non-empty list
    /// gives its first element rendered as text (`["5"]`, `["5", "0"]` and
    /// `["5", 0, 1]` all point at `"5"`); text gives its first character.
    /// Numbers, booleans, null, objects and empty values have no target.
    #[must_use]
    pub fn link_target(&self) -> Option<NodeId> {
        match self {
            Self::Reference(node, _) => Some(node.clone()),
            Self::List(items) => items.first().map(|first| NodeId(first.to_string())),
            Self::Text(text) => text.chars().next().map(|first| NodeId(first.to_string())),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Other(serde_json::Value::Null))
    }

    /// Whether the value counts as "set" when choosing between fallback keys.
    ///
    /// Empty text, zero, `false`, null and empty containers do not.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty(),
            Self::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
            Self::Bool(flag) => *flag,
            Self::Reference(..) => true,
            Self::List(items) => !items.is_empty(),
            Self::Other(serde_json::Value::Null) => false,
            Self::Other(serde_json::Value::Object(map)) => !map.is_empty(),
            Self::Other(_) => true,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Number(number) => serde_json::Value::Number(number.clone()),
            Self::Bool(flag) => serde_json::Value::Bool(*flag),
            Self::Reference(node, output) => {
                serde_json::json!([node.as_str(), output])
            }
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Other(raw) => raw.clone(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Number(number) => Self::Number(number),
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Array(items) => match reference_parts(&items) {
                Some((node, output)) => Self::Reference(node, output),
                None => Self::List(items.into_iter().map(Self::from).collect()),
            },
            other => Self::Other(other),
        }
    }
}

/// Text verbatim, everything else in compact JSON notation.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
            Self::Bool(flag) => write!(f, "{flag}"),
            _ => write!(f, "{}", self.to_json()),
        }
    }
}

fn reference_parts(items: &[serde_json::Value]) -> Option<(NodeId, i64)> {
    let [node, output] = items else {
        return None;
    };
    let output = output.as_i64()?;
    let node = match node {
        serde_json::Value::String(id) => id.clone(),
        serde_json::Value::Number(id) if id.is_u64() || id.is_i64() => id.to_string(),
        _ => return None,
    };
    Some((NodeId(node), output))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub class_type: String,
    pub inputs: IndexMap<String, Value>,
}

impl Node {
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// First input among `keys` whose value is truthy.
    #[must_use]
    pub fn first_truthy(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|key| self.inputs.get(*key))
            .find(|value| value.is_truthy())
    }

    /// Case-insensitive substring test on the declared node type.
    #[must_use]
    pub fn class_contains(&self, needle: &str) -> bool {
        self.class_type.to_lowercase().contains(needle)
    }
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    class_type: String,
    #[serde(default)]
    inputs: Option<IndexMap<String, serde_json::Value>>,
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        Self {
            class_type: raw.class_type,
            inputs: raw
                .inputs
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect(),
        }
    }
}

/// Ordered `(NodeId, Node)` sequence with lookup by id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowGraph {
    nodes: IndexMap<NodeId, Node>,
}

impl WorkflowGraph {
    /// Decodes a serialized workflow.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Decode`] when the blob is not JSON, the root is
    /// not an object, a node is not an object, `class_type` is not a string or
    /// `inputs` is neither an object nor null.
    pub fn from_json(blob: &str) -> Result<Self, GraphError> {
        let raw: IndexMap<String, RawNode> = serde_json::from_str(blob)?;
        Ok(raw
            .into_iter()
            .map(|(id, node)| (NodeId(id), Node::from(node)))
            .collect())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<(NodeId, Node)> for WorkflowGraph {
    fn from_iter<I: IntoIterator<Item = (NodeId, Node)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}
