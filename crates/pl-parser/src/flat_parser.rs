//! A1111-style parameter blocks:
//!
//! ```text
//! positive prompt
//! Negative prompt: negative prompt
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Model: sd_xl_base, Lora: foo:0.8
//! ```
//!
//! The block is re-sliced with literal markers in a fixed order. Settings stay
//! one display string; only the model name and LoRA list are lifted out.

use pl_core::{ParsedMetadata, RAW_PARAMS_KEY, SourceFormat};

const NEGATIVE_MARKER: &str = "Negative prompt:";
const STEPS_MARKER: &str = "Steps:";
const MODEL_MARKER: &str = "Model:";
/// Matched ASCII case-insensitively.
const LORA_MARKER: &str = "lora:";

const SEPARATORS: [char; 2] = [' ', ','];

/// Longest key accepted by [`looks_like_setting`].
const MAX_SETTING_KEY_LEN: usize = 20;

/// Parses an A1111-style block. Never fails: missing markers leave the
/// corresponding fields empty.
#[must_use]
pub fn parse_flat(text: &str) -> ParsedMetadata {
    let (head, tail) = match text.split_once(NEGATIVE_MARKER) {
        Some((head, tail)) => (head, Some(tail)),
        None => (text, None),
    };

    let negative = tail.map_or("", |tail| {
        tail.split_once(STEPS_MARKER)
            .map_or(tail, |(before, _)| before)
            .trim()
    });

    let full_params = settings_block(text);
    let (model_name, full_params) = take_model(&full_params);
    let (loras, params_display) = take_loras(&full_params);

    let mut parsed = ParsedMetadata::empty(SourceFormat::FlatText);
    parsed.positive = Some(head.trim().to_string());
    parsed.negative = Some(negative.to_string());
    if !model_name.is_empty() {
        parsed.model_lines.push(model_name);
    }
    parsed.loras = loras;
    if !params_display.is_empty() {
        parsed
            .params
            .insert(RAW_PARAMS_KEY.to_string(), params_display);
    }
    parsed
}

/// Everything from the first `Steps:` of the whole block, trimmed.
fn settings_block(text: &str) -> String {
    match text.split_once(STEPS_MARKER) {
        Some((_, after)) => {
            let after = after.trim();
            if after.is_empty() {
                STEPS_MARKER.to_string()
            } else {
                format!("{STEPS_MARKER} {after}")
            }
        }
        None => String::new(),
    }
}

/// Lifts the `Model: name,` span out of the settings.
fn take_model(full_params: &str) -> (String, String) {
    let Some(start) = full_params.find(MODEL_MARKER) else {
        return (String::new(), full_params.to_string());
    };
    let before = full_params[..start].trim_end_matches(SEPARATORS);
    let after = full_params[start + MODEL_MARKER.len()..].trim_start();

    match after.split_once(',') {
        Some((name, rest)) => {
            let joined = format!("{before}, {}", rest.trim_start());
            (
                name.trim().to_string(),
                joined.trim_matches(SEPARATORS).to_string(),
            )
        }
        None => (after.trim().to_string(), before.to_string()),
    }
}

/// Splits the LoRA list off the settings.
///
/// The first entry after the marker is always a LoRA; later entries shaped
/// like `Key: value` are settings that followed the list and go back into the
/// display string.
fn take_loras(full_params: &str) -> (Vec<String>, String) {
    let Some(start) = full_params.to_ascii_lowercase().find(LORA_MARKER) else {
        return (Vec::new(), full_params.to_string());
    };
    let prefix = full_params[..start].trim_end_matches(SEPARATORS);
    let entries = full_params[start + LORA_MARKER.len()..]
        .trim_matches(SEPARATORS)
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty());

    let mut loras = Vec::new();
    let mut trailing = Vec::new();
    for entry in entries {
        if !loras.is_empty() && (!trailing.is_empty() || looks_like_setting(entry)) {
            trailing.push(entry);
        } else {
            loras.push(entry.to_string());
        }
    }

    let mut display = prefix.to_string();
    for entry in trailing {
        if !display.is_empty() {
            display.push_str(", ");
        }
        display.push_str(entry);
    }
    (loras, display)
}

/// `Key: value` with a short alphanumeric key, e.g. `CFG scale: 7`.
fn looks_like_setting(entry: &str) -> bool {
    let Some((key, _)) = entry.split_once(": ") else {
        return false;
    };
    key.len() <= MAX_SETTING_KEY_LEN
        && key.starts_with(|ch: char| ch.is_ascii_alphabetic())
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '_' | '-'))
}
