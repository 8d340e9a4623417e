use pl_core::{GraphError, Node, NodeId, ParsedMetadata, SourceFormat, Value, WorkflowGraph};
use tracing::{debug, trace};

/// Sampler inputs copied into `params`, in output order.
const SAMPLER_PARAMS: [&str; 6] = ["seed", "steps", "cfg", "sampler_name", "scheduler", "denoise"];

/// Substrings that mark a text-encoder prompt as the negative one during the
/// fallback scan.
const NEGATIVE_HINTS: [&str; 3] = ["quality", "nsfw", "worst"];

const CHECKPOINT_NAME_KEYS: [&str; 3] = ["ckpt_name", "model_name", "ckpt_path"];
const UNET_NAME_KEYS: [&str; 3] = ["unet_name", "model", "name"];
const LORA_NAME_KEYS: [&str; 3] = ["lora_name", "model", "name"];

type RuleFn = fn(&mut GraphScan, &NodeId, &Node);

/// Classification rule: runs `apply` on every node whose lower-cased
/// `class_type` contains `needle`.
struct NodeRule {
    needle: &'static str,
    apply: RuleFn,
}

/// Evaluated in order for each node; a node may match several rules.
const NODE_RULES: &[NodeRule] = &[
    NodeRule {
        needle: "checkpointloader",
        apply: record_checkpoint,
    },
    NodeRule {
        needle: "unet",
        apply: record_unet,
    },
    NodeRule {
        needle: "ksampler",
        apply: record_sampler,
    },
    NodeRule {
        needle: "lora",
        apply: record_lora,
    },
    NodeRule {
        needle: "qwen",
        apply: record_qwen_prompts,
    },
];

#[derive(Debug, Default)]
struct GraphScan {
    parsed: ParsedMetadata,
    sampler: Option<NodeId>,
    qwen_positive: Option<String>,
    qwen_negative: Option<String>,
}

/// Outcome of following a sampler's prompt input to its text node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Text(String),
    /// Input missing or falsy, or the target has no text.
    Absent,
    /// Reference to a node id the graph does not contain.
    Dangling(NodeId),
    /// Target's `text` is itself a link or another non-string value.
    Linked(NodeId),
}

impl Resolution {
    /// A filled side is never overwritten by the fallbacks.
    fn is_filled(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty(),
            Self::Linked(_) => true,
            Self::Absent | Self::Dangling(_) => false,
        }
    }

    fn into_prompt(self, fallback: Option<String>) -> Option<String> {
        match self {
            Self::Text(text) if !text.is_empty() => Some(text),
            Self::Linked(_) => None,
            _ => fallback,
        }
    }
}

/// Parses a serialized node-graph workflow.
///
/// Any decode or shape failure collapses the whole result into
/// [`ParsedMetadata::graph_failure`]; nothing extracted before the failure
/// is kept.
#[must_use]
pub fn parse_graph(blob: &str) -> ParsedMetadata {
    match try_parse_graph(blob) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(%error, "graph workflow rejected");
            ParsedMetadata::graph_failure()
        }
    }
}

/// Like [`parse_graph`] but returns the typed failure instead of collapsing it.
///
/// # Errors
///
/// Returns [`GraphError`] when the blob does not decode or a value read by the
/// extraction has an unexpected shape.
pub fn try_parse_graph(blob: &str) -> Result<ParsedMetadata, GraphError> {
    let graph = WorkflowGraph::from_json(blob)?;
    extract_from_graph(&graph)
}

/// Runs the classification pass, prompt resolution and fallbacks over an
/// already decoded graph.
///
/// # Errors
///
/// Returns [`GraphError::UnexpectedShape`] for a truthy sampler prompt input
/// with no element `[0]` (a number, boolean or object), or a non-string prompt text met by the fallback scan.
pub fn extract_from_graph(graph: &WorkflowGraph) -> Result<ParsedMetadata, GraphError> {
    let mut scan = GraphScan {
        parsed: ParsedMetadata::empty(SourceFormat::GraphWorkflow),
        ..GraphScan::default()
    };

    for (id, node) in graph.iter() {
        let class_type = node.class_type.to_lowercase();
        for rule in NODE_RULES {
            if class_type.contains(rule.needle) {
                trace!(node = %id, class_type = %node.class_type, rule = rule.needle, "node matched");
                (rule.apply)(&mut scan, id, node);
            }
        }
    }

    scan.finish(graph)
}

impl GraphScan {
    fn finish(mut self, graph: &WorkflowGraph) -> Result<ParsedMetadata, GraphError> {
        let mut positive = Resolution::Absent;
        let mut negative = Resolution::Absent;

        if let Some(sampler_id) = self.sampler.take() {
            if let Some(sampler) = graph.get(sampler_id.as_str()) {
                positive = resolve_prompt(graph, &sampler_id, sampler, "positive")?;
                negative = resolve_prompt(graph, &sampler_id, sampler, "negative")?;
            }
        }

        if !positive.is_filled() && !negative.is_filled() {
            let (found_positive, found_negative) = scan_text_encoders(graph)?;
            if let Some(text) = found_positive {
                positive = Resolution::Text(text);
            }
            if let Some(text) = found_negative {
                negative = Resolution::Text(text);
            }
        }

        self.parsed.positive = positive.into_prompt(self.qwen_positive);
        self.parsed.negative = negative.into_prompt(self.qwen_negative);
        Ok(self.parsed)
    }
}

fn resolve_prompt(
    graph: &WorkflowGraph,
    sampler_id: &NodeId,
    sampler: &Node,
    input: &str,
) -> Result<Resolution, GraphError> {
    let Some(value) = sampler.input(input).filter(|value| value.is_truthy()) else {
        return Ok(Resolution::Absent);
    };
    let Some(target_id) = value.link_target() else {
        return Err(GraphError::UnexpectedShape {
            node: sampler_id.to_string(),
            input: input.to_string(),
            expected: "a node reference (list or text)",
        });
    };
    if value.as_reference().is_none() {
        debug!(sampler = %sampler_id, %value, input, "prompt reference is not [id, index]; using its first element");
    }
    let Some(target) = graph.get(target_id.as_str()) else {
        debug!(sampler = %sampler_id, target = %target_id, input, "prompt reference is dangling");
        return Ok(Resolution::Dangling(target_id));
    };
    Ok(match target.input("text") {
        Some(Value::Text(text)) => Resolution::Text(text.clone()),
        Some(value) if value.is_truthy() => {
            debug!(target = %target_id, input, "prompt text is not a literal string");
            Resolution::Linked(target_id)
        }
        _ => Resolution::Absent,
    })
}

/// Fallback when no sampler supplied either prompt: sorts text-encoder prompts
/// into negative/positive by keyword, first match per side wins.
fn scan_text_encoders(
    graph: &WorkflowGraph,
) -> Result<(Option<String>, Option<String>), GraphError> {
    let mut positive: Option<String> = None;
    let mut negative: Option<String> = None;

    for (id, node) in graph.iter() {
        if !node.class_contains("cliptextencode") {
            continue;
        }
        let Some(value) = node.input("text").filter(|value| value.is_truthy()) else {
            continue;
        };
        let Some(text) = value.as_text() else {
            return Err(GraphError::UnexpectedShape {
                node: id.to_string(),
                input: "text".to_string(),
                expected: "a string",
            });
        };

        let lower = text.to_lowercase();
        let bucket = if NEGATIVE_HINTS.iter().any(|hint| lower.contains(hint)) {
            &mut negative
        } else {
            &mut positive
        };
        if bucket.is_none() {
            *bucket = Some(text.to_string());
        }
    }

    Ok((positive, negative))
}

fn record_checkpoint(scan: &mut GraphScan, _id: &NodeId, node: &Node) {
    if let Some(name) = node.first_truthy(&CHECKPOINT_NAME_KEYS) {
        scan.parsed.push_model_line(format!("Checkpoint: {name}"));
    }
}

fn record_unet(scan: &mut GraphScan, _id: &NodeId, node: &Node) {
    if let Some(name) = node.first_truthy(&UNET_NAME_KEYS) {
        scan.parsed.push_model_line(format!("Diffusion Model: {name}"));
    }
}

fn record_sampler(scan: &mut GraphScan, id: &NodeId, node: &Node) {
    scan.sampler = Some(id.clone());
    for key in SAMPLER_PARAMS {
        if let Some(value) = node.input(key) {
            scan.parsed.params.insert(capitalize(key), value.to_string());
        }
    }
}

fn record_lora(scan: &mut GraphScan, _id: &NodeId, node: &Node) {
    let present = |key: &str| node.input(key).filter(|value| !value.is_null());

    let mut parts = Vec::with_capacity(3);
    if let Some(name) = node.first_truthy(&LORA_NAME_KEYS) {
        parts.push(name.to_string());
    }
    if let Some(strength) = present("strength_model") {
        parts.push(format!("model: {strength}"));
    }
    if let Some(strength) = present("strength_clip") {
        parts.push(format!("clip: {strength}"));
    }
    if !parts.is_empty() {
        scan.parsed.loras.push(parts.join(" | "));
    }
}

fn record_qwen_prompts(scan: &mut GraphScan, _id: &NodeId, node: &Node) {
    let candidate = |keys: &[&str]| {
        node.first_truthy(keys)
            .and_then(Value::as_text)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    if let Some(text) = candidate(&["prompt", "text"]) {
        scan.qwen_positive = Some(text);
    }
    if let Some(text) = candidate(&["negative_prompt", "negative"]) {
        scan.qwen_negative = Some(text);
    }
}

/// Upper-cases the first character and lower-cases the rest.
fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use pl_core::{GRAPH_PARSE_ERROR, SourceFormat};
    use serde_json::json;

    use super::{capitalize, parse_graph, try_parse_graph};

    fn parse_value(graph: &serde_json::Value) -> pl_core::ParsedMetadata {
        parse_graph(&graph.to_string())
    }

    #[test]
    fn sampler_references_resolve_prompts() {
        let parsed = parse_value(&json!({
            "5": {"class_type": "CLIPTextEncode", "inputs": {"text": "blue sky"}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "low quality"}},
            "3": {"class_type": "KSampler", "inputs": {
                "positive": ["5", 0], "negative": ["6", 0], "seed": 42
            }}
        }));
        assert_eq!(parsed.source_format, SourceFormat::GraphWorkflow);
        assert_eq!(parsed.positive.as_deref(), Some("blue sky"));
        assert_eq!(parsed.negative.as_deref(), Some("low quality"));
        assert_eq!(parsed.params.len(), 1);
        assert_eq!(parsed.params["Seed"], "42");
        assert!(parsed.parse_error.is_none());
    }

    #[test]
    fn fallback_scan_sorts_encoders_by_keyword() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "worst quality, blurry"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "a forest"}}
        }));
        assert_eq!(parsed.negative.as_deref(), Some("worst quality, blurry"));
        assert_eq!(parsed.positive.as_deref(), Some("a forest"));
    }

    #[test]
    fn fallback_scan_keeps_first_match_per_side() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CLIPTextEncodeSDXL", "inputs": {"text": "first"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "NSFW"}},
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "second"}},
            "4": {"class_type": "CLIPTextEncode", "inputs": {"text": "bad quality"}},
            "5": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}}
        }));
        assert_eq!(parsed.positive.as_deref(), Some("first"));
        assert_eq!(parsed.negative.as_deref(), Some("NSFW"));
    }

    #[test]
    fn malformed_blob_collapses_to_parse_error() {
        let parsed = parse_graph(r#"{"3": {"class_type": "KSampler", "inputs": {"seed": 4"#);
        assert_eq!(parsed.source_format, SourceFormat::GraphWorkflow);
        assert_eq!(parsed.parse_error.as_deref(), Some(GRAPH_PARSE_ERROR));
        assert!(parsed.positive.is_none());
        assert!(parsed.negative.is_none());
        assert!(parsed.model_lines.is_empty());
        assert!(parsed.loras.is_empty());
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn late_shape_error_discards_earlier_extraction() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl.safetensors"}},
            "2": {"class_type": "KSampler", "inputs": {"seed": 1, "positive": 5}}
        }));
        assert_eq!(parsed.parse_error.as_deref(), Some(GRAPH_PARSE_ERROR));
        assert!(parsed.model_lines.is_empty());
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn odd_shaped_references_resolve_through_their_first_element() {
        for reference in [json!(["5"]), json!(["5", "0"]), json!(["5", 0, 1]), json!([5, 0])] {
            let parsed = parse_value(&json!({
                "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl"}},
                "5": {"class_type": "CLIPTextEncode", "inputs": {"text": "blue sky"}},
                "3": {"class_type": "KSampler", "inputs": {"seed": 1, "positive": reference.clone()}}
            }));
            assert!(parsed.parse_error.is_none(), "reference {reference}");
            assert_eq!(parsed.positive.as_deref(), Some("blue sky"), "reference {reference}");
            assert_eq!(parsed.negative, None);
            assert_eq!(parsed.model_lines, vec!["Checkpoint: sdxl"]);
            assert_eq!(parsed.params["Seed"], "1");
        }
    }

    #[test]
    fn text_reference_points_at_its_first_character() {
        let parsed = parse_value(&json!({
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "ugly"}},
            "3": {"class_type": "KSampler", "inputs": {"negative": "7x"}}
        }));
        assert!(parsed.parse_error.is_none());
        assert_eq!(parsed.negative.as_deref(), Some("ugly"));
    }

    #[test]
    fn object_reference_is_a_shape_error() {
        let result = try_parse_graph(
            &json!({"3": {"class_type": "KSampler", "inputs": {"positive": {"node": "5"}}}})
                .to_string(),
        );
        assert!(matches!(
            result,
            Err(pl_core::GraphError::UnexpectedShape { ref input, .. }) if input == "positive"
        ));
    }

    #[test]
    fn non_string_encoder_text_in_fallback_is_a_shape_error() {
        let result = try_parse_graph(
            &json!({"1": {"class_type": "CLIPTextEncode", "inputs": {"text": ["9", 0]}}})
                .to_string(),
        );
        assert!(matches!(
            result,
            Err(pl_core::GraphError::UnexpectedShape { ref node, .. }) if node == "1"
        ));
    }

    #[test]
    fn last_sampler_wins_and_params_overwrite_per_key() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "KSampler", "inputs": {
                "seed": 1, "steps": 30, "cfg": 7.5, "sampler_name": "euler"
            }},
            "2": {"class_type": "KSamplerAdvanced", "inputs": {"seed": 2, "steps": 12}}
        }));
        let entries: Vec<(&str, &str)> = parsed
            .params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("Seed", "2"),
                ("Steps", "12"),
                ("Cfg", "7.5"),
                ("Sampler_name", "euler"),
            ]
        );
    }

    #[test]
    fn last_sampler_supplies_prompt_references() {
        let parsed = parse_value(&json!({
            "10": {"class_type": "CLIPTextEncode", "inputs": {"text": "early"}},
            "11": {"class_type": "CLIPTextEncode", "inputs": {"text": "late"}},
            "1": {"class_type": "KSampler", "inputs": {"positive": ["10", 0]}},
            "2": {"class_type": "KSampler", "inputs": {"positive": ["11", 0]}}
        }));
        assert_eq!(parsed.positive.as_deref(), Some("late"));
        assert_eq!(parsed.negative, None);
    }

    #[test]
    fn checkpoint_lines_are_deduplicated_in_declaration_order() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "foo"}},
            "2": {"class_type": "CheckpointLoader", "inputs": {"ckpt_name": "foo"}},
            "3": {"class_type": "ImageOnlyCheckpointLoader", "inputs": {"ckpt_name": "bar"}}
        }));
        assert_eq!(parsed.model_lines, vec!["Checkpoint: foo", "Checkpoint: bar"]);
    }

    #[test]
    fn checkpoint_and_unet_names_fall_back_through_keys() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "", "ckpt_path": "/m/a.ckpt"}},
            "2": {"class_type": "UNETLoader", "inputs": {"model": "flux1-dev.safetensors"}},
            "3": {"class_type": "UnetLoaderGGUF", "inputs": {}}
        }));
        assert_eq!(
            parsed.model_lines,
            vec!["Checkpoint: /m/a.ckpt", "Diffusion Model: flux1-dev.safetensors"]
        );
    }

    #[test]
    fn linked_names_render_as_compact_json() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": ["4", 0]}},
            "2": {"class_type": "LoraLoader", "inputs": {"lora_name": {"file": "x"}, "strength_model": true}}
        }));
        assert!(parsed.parse_error.is_none());
        assert_eq!(parsed.model_lines, vec![r#"Checkpoint: ["4",0]"#]);
        assert_eq!(parsed.loras, vec![r#"{"file":"x"} | model: true"#]);
    }

    #[test]
    fn lora_lines_join_present_parts() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "LoraLoader", "inputs": {
                "lora_name": "detail.safetensors", "strength_model": 0.8, "strength_clip": 1
            }},
            "2": {"class_type": "LoraLoaderModelOnly", "inputs": {"lora_name": "style", "strength_model": 0}},
            "3": {"class_type": "LoraLoader", "inputs": {"strength_clip": null}},
            "4": {"class_type": "LoraLoader", "inputs": {"lora_name": "detail.safetensors", "strength_model": 0.8, "strength_clip": 1}}
        }));
        assert_eq!(
            parsed.loras,
            vec![
                "detail.safetensors | model: 0.8 | clip: 1",
                "style | model: 0",
                "detail.safetensors | model: 0.8 | clip: 1",
            ]
        );
    }

    #[test]
    fn qwen_candidates_fill_unset_prompts_independently() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "TextEncodeQwenImageEdit", "inputs": {"prompt": "  a red fox  ", "negative": "blur"}},
            "2": {"class_type": "QwenPromptNode", "inputs": {"prompt": "   ", "negative_prompt": "grain"}},
            "3": {"class_type": "KSampler", "inputs": {"negative": ["9", 0]}},
            "9": {"class_type": "CLIPTextEncode", "inputs": {"text": "lowres"}}
        }));
        assert_eq!(parsed.negative.as_deref(), Some("lowres"));
        assert_eq!(parsed.positive.as_deref(), Some("a red fox"));
    }

    #[test]
    fn qwen_fallback_applies_after_encoder_scan() {
        let parsed = parse_value(&json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "worst quality"}},
            "2": {"class_type": "QwenTextEncode", "inputs": {"text": "a lighthouse", "negative_prompt": "ignored"}}
        }));
        assert_eq!(parsed.negative.as_deref(), Some("worst quality"));
        assert_eq!(parsed.positive.as_deref(), Some("a lighthouse"));
    }

    #[test]
    fn dangling_reference_leaves_prompt_unset_without_error() {
        let parsed = parse_value(&json!({
            "3": {"class_type": "KSampler", "inputs": {"positive": ["42", 0], "negative": ["7", 0]}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "ugly"}}
        }));
        assert!(parsed.parse_error.is_none());
        assert_eq!(parsed.positive, None);
        assert_eq!(parsed.negative.as_deref(), Some("ugly"));
    }

    #[test]
    fn referenced_node_with_linked_text_is_left_unset() {
        let parsed = parse_value(&json!({
            "3": {"class_type": "KSampler", "inputs": {"positive": ["4", 0]}},
            "4": {"class_type": "CLIPTextEncode", "inputs": {"text": ["8", 0]}},
            "8": {"class_type": "PrimitiveString", "inputs": {"value": "hidden"}}
        }));
        assert!(parsed.parse_error.is_none());
        assert_eq!(parsed.positive, None);
    }

    #[test]
    fn graph_without_recognized_nodes_is_empty_but_valid() {
        let parsed = parse_graph("{}");
        assert_eq!(parsed.source_format, SourceFormat::GraphWorkflow);
        assert!(parsed.parse_error.is_none());
        assert!(!parsed.has_content());
    }

    #[test]
    fn capitalize_matches_title_style_keys() {
        assert_eq!(capitalize("sampler_name"), "Sampler_name");
        assert_eq!(capitalize("cfg"), "Cfg");
        assert_eq!(capitalize(""), "");
    }
}
