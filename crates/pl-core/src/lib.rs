#![forbid(unsafe_code)]

mod graph;

pub use graph::{Node, NodeId, Value, WorkflowGraph};

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text field holding a serialized node-graph workflow.
pub const PROMPT_FIELD: &str = "prompt";

/// Text field holding an A1111-style parameter block.
pub const PARAMETERS_FIELD: &str = "parameters";

/// Message carried by [`ParsedMetadata::parse_error`] when graph parsing aborts.
pub const GRAPH_PARSE_ERROR: &str = "graph parse error";

/// Key under which the flat-text parser stores its opaque settings string.
pub const RAW_PARAMS_KEY: &str = "__raw__";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    None,
    FlatText,
    GraphWorkflow,
}

impl SourceFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FlatText => "flat_text",
            Self::GraphWorkflow => "graph_workflow",
        }
    }

    /// Human-readable producer name.
    #[must_use]
    pub const fn producer(self) -> &'static str {
        match self {
            Self::None => "no generation metadata",
            Self::FlatText => "A1111-style parameters",
            Self::GraphWorkflow => "node-graph workflow",
        }
    }
}

/// Normalized generation metadata produced by either parser.
///
/// A result with `parse_error` set carries nothing else: graph parsing is
/// all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ParsedMetadata {
    pub positive: Option<String>,
    pub negative: Option<String>,
    /// "kind: name" lines, unique by exact text, in detection order.
    pub model_lines: Vec<String>,
    pub loras: Vec<String>,
    pub params: IndexMap<String, String>,
    pub source_format: SourceFormat,
    pub parse_error: Option<String>,
}

impl ParsedMetadata {
    #[must_use]
    pub fn empty(source_format: SourceFormat) -> Self {
        Self {
            source_format,
            ..Self::default()
        }
    }

    /// Terminal "nothing recognized" result.
    #[must_use]
    pub fn no_metadata() -> Self {
        Self::empty(SourceFormat::None)
    }

    #[must_use]
    pub fn graph_failure() -> Self {
        Self {
            parse_error: Some(GRAPH_PARSE_ERROR.to_string()),
            ..Self::empty(SourceFormat::GraphWorkflow)
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.parse_error.is_some()
    }

    /// True when any prompt, model, LoRA or setting was recovered.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.positive.as_deref().is_some_and(|text| !text.is_empty())
            || self.negative.as_deref().is_some_and(|text| !text.is_empty())
            || !self.model_lines.is_empty()
            || !self.loras.is_empty()
            || !self.params.is_empty()
    }

    /// Appends a model line unless an identical one is already recorded.
    pub fn push_model_line(&mut self, line: String) {
        if !self.model_lines.contains(&line) {
            self.model_lines.push(line);
        }
    }

    /// The opaque settings string of a flat-text result, if any.
    #[must_use]
    pub fn raw_params(&self) -> Option<&str> {
        match self.source_format {
            SourceFormat::FlatText => self.params.get(RAW_PARAMS_KEY).map(String::as_str),
            _ => None,
        }
    }
}

/// Failure while decoding or walking a workflow graph.
///
/// Never surfaced through [`ParsedMetadata`]; the parser collapses it into
/// [`GRAPH_PARSE_ERROR`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow graph could not be decoded: {0}")]
    Decode(String),
    #[error("node {node}: input `{input}` has unexpected shape, expected {expected}")]
    UnexpectedShape {
        node: String,
        input: String,
        expected: &'static str,
    },
}

impl From<serde_json::Error> for GraphError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Read access to the text metadata fields of a decoded image.
pub trait MetadataFields {
    fn field(&self, key: &str) -> Option<&str>;
}

impl<S: BuildHasher> MetadataFields for HashMap<String, String, S> {
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl MetadataFields for BTreeMap<String, String> {
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl<S: BuildHasher> MetadataFields for IndexMap<String, String, S> {
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl MetadataFields for [(&str, &str)] {
    fn field(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
    }
}

impl<const N: usize> MetadataFields for [(&str, &str); N] {
    fn field(&self, key: &str) -> Option<&str> {
        self.as_slice().field(key)
    }
}
