#![forbid(unsafe_code)]

mod flat_parser;
mod graph_parser;

use pl_core::{MetadataFields, PARAMETERS_FIELD, PROMPT_FIELD, ParsedMetadata, SourceFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

pub use flat_parser::parse_flat;
pub use graph_parser::{extract_from_graph, parse_graph, try_parse_graph};

/// Which parser the text fields of an image select.
///
/// `prompt` wins over `parameters`; other keys are ignored.
#[must_use]
pub fn detect_format<F: MetadataFields + ?Sized>(fields: &F) -> SourceFormat {
    if fields.field(PROMPT_FIELD).is_some() {
        SourceFormat::GraphWorkflow
    } else if fields.field(PARAMETERS_FIELD).is_some() {
        SourceFormat::FlatText
    } else {
        SourceFormat::None
    }
}

/// Extracts generation metadata from the text fields of a decoded image.
///
/// Never fails: graph failures come back as
/// [`ParsedMetadata::graph_failure`], absent fields as
/// [`ParsedMetadata::no_metadata`].
#[must_use]
pub fn extract<F: MetadataFields + ?Sized>(fields: &F) -> ParsedMetadata {
    if let Some(blob) = fields.field(PROMPT_FIELD) {
        debug!(bytes = blob.len(), "dispatching `prompt` field to graph parser");
        return parse_graph(blob);
    }
    if let Some(text) = fields.field(PARAMETERS_FIELD) {
        debug!(bytes = text.len(), "dispatching `parameters` field to flat parser");
        return parse_flat(text);
    }
    debug!("no generation metadata fields present");
    ParsedMetadata::no_metadata()
}

/// Parser selection for a raw text blob that did not come with field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatHint {
    /// Graph when the blob looks like a JSON object, flat text otherwise.
    #[default]
    Auto,
    Graph,
    Flat,
}

/// A serialized workflow is a JSON object; A1111 blocks start with prompt text.
#[must_use]
pub fn looks_like_graph(text: &str) -> bool {
    text.trim_start().starts_with('{')
}

#[must_use]
pub fn parse_text(text: &str, hint: FormatHint) -> ParsedMetadata {
    let graph = match hint {
        FormatHint::Graph => true,
        FormatHint::Flat => false,
        FormatHint::Auto => looks_like_graph(text),
    };
    debug!(?hint, graph, "parsing raw text blob");
    if graph {
        parse_graph(text)
    } else {
        parse_flat(text)
    }
}

/// Compact one-line summary of a result, for logs and `--json` listings.
#[must_use]
pub fn summary_json(parsed: &ParsedMetadata) -> String {
    json!({
        "source_format": parsed.source_format.as_str(),
        "has_positive": parsed.positive.as_deref().is_some_and(|text| !text.is_empty()),
        "has_negative": parsed.negative.as_deref().is_some_and(|text| !text.is_empty()),
        "model_count": parsed.model_lines.len(),
        "lora_count": parsed.loras.len(),
        "param_count": parsed.params.len(),
        "parse_error": parsed.parse_error.clone(),
    })
    .to_string()
}
