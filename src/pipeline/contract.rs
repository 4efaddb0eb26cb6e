//! Structured-output contracts for LLM responses.
//!
//! Models are asked to answer with a bare JSON object but routinely wrap it in
//! markdown fences or a sentence of preamble. [`parse_contract`] strips that
//! wrapping, checks the object against the contract's declared fields and only
//! then deserializes it. Validation is all-or-nothing: a response either yields
//! a fully valid value or a [`ContractViolation`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{0}` must not be empty")]
    EmptyValue(&'static str),

    #[error("field `{field}` must hold {min}-{max} items, got {actual}")]
    Arity {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("field `{field}` item {index} is empty")]
    EmptyItem { field: &'static str, index: usize },

    #[error("field `{field}` item {index} duplicates an earlier item")]
    DuplicateItem { field: &'static str, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Non-empty string.
    Text,
    /// List of non-empty strings with bounded length.
    TextList {
        min: usize,
        max: usize,
        distinct: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub shape: FieldShape,
}

/// A response payload with a declared field schema.
pub trait Contract: DeserializeOwned {
    const FIELDS: &'static [FieldSpec];
}

pub fn parse_contract<T: Contract>(raw: &str) -> Result<T, ContractViolation> {
    let Value::Object(mut object) = parse_payload(raw)? else {
        return Err(ContractViolation::NotAnObject);
    };

    let mut validated = Map::with_capacity(T::FIELDS.len());
    for field in T::FIELDS {
        let value = object
            .remove(field.name)
            .ok_or(ContractViolation::MissingField(field.name))?;
        validated.insert(field.name.to_string(), validate_field(field, value)?);
    }

    serde_json::from_value(Value::Object(validated))
        .map_err(|e| ContractViolation::Malformed(e.to_string()))
}

/// Returns the JSON object embedded in `raw`, without fences or surrounding prose.
pub fn extract_payload(raw: &str) -> &str {
    payload_candidates(raw)
        .into_iter()
        .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
        .unwrap_or_else(|| brace_span(raw.trim()))
}

fn parse_payload(raw: &str) -> Result<Value, ContractViolation> {
    let mut first_error = None;
    for candidate in payload_candidates(raw) {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(ContractViolation::Malformed(
        first_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

/// Candidate payloads in the order they are tried. Text that already opens
/// with `{` is taken as bare JSON, so backticks inside string values are never
/// mistaken for a fence.
fn payload_candidates(raw: &str) -> Vec<&str> {
    let text = raw.trim();
    if text.starts_with('{') {
        return vec![brace_span(text)];
    }

    let mut candidates = Vec::with_capacity(2);
    if let Some(body) = strip_fence(text) {
        candidates.push(brace_span(body));
    }
    candidates.push(brace_span(text));
    candidates
}

fn brace_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Body of a fence that opens a line, up to the last closing fence.
fn strip_fence(text: &str) -> Option<&str> {
    let open = text
        .match_indices("```")
        .map(|(i, _)| i)
        .find(|&i| i == 0 || text[..i].ends_with('\n'))?;
    let after = &text[open + 3..];
    // Skip the info string, e.g. ```json
    let body_start = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = &after[body_start..];
    let close = body.rfind("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

fn validate_field(field: &FieldSpec, value: Value) -> Result<Value, ContractViolation> {
    match field.shape {
        FieldShape::Text => {
            let text = value.as_str().ok_or(ContractViolation::WrongType {
                field: field.name,
                expected: "string",
            })?;
            let text = text.trim();
            if text.is_empty() {
                return Err(ContractViolation::EmptyValue(field.name));
            }
            Ok(Value::String(text.to_string()))
        }
        FieldShape::TextList { min, max, distinct } => {
            let wrong_type = ContractViolation::WrongType {
                field: field.name,
                expected: "list of strings",
            };
            let Value::Array(items) = value else {
                return Err(wrong_type);
            };
            if !(min..=max).contains(&items.len()) {
                return Err(ContractViolation::Arity {
                    field: field.name,
                    min,
                    max,
                    actual: items.len(),
                });
            }

            let mut seen: Vec<String> = Vec::with_capacity(items.len());
            let mut cleaned = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let text = item.as_str().ok_or_else(|| wrong_type.clone())?.trim();
                if text.is_empty() {
                    return Err(ContractViolation::EmptyItem {
                        field: field.name,
                        index,
                    });
                }
                if distinct {
                    let key = text.to_lowercase();
                    if seen.contains(&key) {
                        return Err(ContractViolation::DuplicateItem {
                            field: field.name,
                            index,
                        });
                    }
                    seen.push(key);
                }
                cleaned.push(Value::String(text.to_string()));
            }
            Ok(Value::Array(cleaned))
        }
    }
}
