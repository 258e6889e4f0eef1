//! Field-level validation for registry input.
//!
//! Validation failures are terminal; nothing here retries. Normalized values
//! are returned so callers persist exactly what was checked.

use serde_json::Value;

use crate::error::{Result, ToolhubError};
use jsonschema::JSONSchema;

/// Upper bound on tool name length.
pub const MAX_NAME_LEN: usize = 255;
/// Upper bound on a single tag length.
pub const MAX_TAG_LEN: usize = 64;
/// Maximum number of tags kept per tool.
pub const MAX_TAGS: usize = 20;
/// Upper bound on a search query after whitespace normalization.
pub const MAX_QUERY_LEN: usize = 2_000;

/// Validates a tool name: 1-255 chars of ASCII letters, digits, `:`, `_`, `-`.
///
/// The colon is reserved for namespacing tools mirrored from an upstream
/// source (`server:tool`).
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ToolhubError::InvalidInput("tool name cannot be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ToolhubError::InvalidInput(format!(
            "tool name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
    {
        return Err(ToolhubError::InvalidInput(
            "tool name may only contain ASCII letters, digits, ':', '_', and '-'".into(),
        ));
    }
    Ok(name.to_string())
}

/// Validates and normalizes a category to lowercase.
pub fn validate_category(category: &str) -> Result<String> {
    let category = category.trim().to_lowercase();
    if category.is_empty() {
        return Err(ToolhubError::InvalidInput("category cannot be empty".into()));
    }
    if category.len() > 100 {
        return Err(ToolhubError::InvalidInput(
            "category exceeds 100 characters".into(),
        ));
    }
    if !category
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
    {
        return Err(ToolhubError::InvalidInput(
            "category may only contain letters, digits, spaces, '_', and '-'".into(),
        ));
    }
    Ok(category)
}

/// Validates tags: lowercased, deduplicated in input order, empty entries
/// dropped, capped at [`MAX_TAGS`].
pub fn validate_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len().min(MAX_TAGS));
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.len() > MAX_TAG_LEN {
            return Err(ToolhubError::InvalidInput(format!(
                "tag '{tag}' exceeds {MAX_TAG_LEN} characters"
            )));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(ToolhubError::InvalidInput(format!(
                "tag '{tag}' may only contain letters, digits, '_', and '-'"
            )));
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    Ok(out)
}

/// Checks that a value is a structurally valid JSON Schema by compiling it.
pub fn validate_json_schema(schema: &Value) -> Result<()> {
    if !schema.is_object() && !schema.is_boolean() {
        return Err(ToolhubError::SchemaInvalid(
            "schema must be a JSON object".into(),
        ));
    }
    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|e| ToolhubError::SchemaInvalid(e.to_string()))
}

/// Validates a JSON instance against a schema, reporting the first failure
/// with a pointer into the instance.
pub fn validate_against_schema(schema: &Value, instance: &Value) -> Result<()> {
    let compiled =
        JSONSchema::compile(schema).map_err(|e| ToolhubError::SchemaInvalid(e.to_string()))?;
    let outcome = match compiled.validate(instance) {
        Ok(()) => None,
        Err(mut errors) => errors.next().map(|first| ToolhubError::ValidationFailed {
            path: first.instance_path.to_string(),
            message: first.to_string(),
        }),
    };
    match outcome {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validates an embedding vector: expected length, all elements finite.
pub fn validate_embedding(expected_dimension: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected_dimension {
        return Err(ToolhubError::EmbeddingShape(format!(
            "embedding has dimension {}, expected {expected_dimension}",
            embedding.len()
        )));
    }
    if let Some(idx) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(ToolhubError::EmbeddingShape(format!(
            "embedding element at index {idx} is not finite"
        )));
    }
    Ok(())
}

/// Normalizes a search query: trims, collapses internal whitespace, and
/// enforces the 1..=2000 character bound.
pub fn normalize_query(query: &str) -> Result<String> {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(ToolhubError::InvalidQuery("query cannot be empty".into()));
    }
    if normalized.len() > MAX_QUERY_LEN {
        return Err(ToolhubError::InvalidQuery(format!(
            "query exceeds {MAX_QUERY_LEN} characters"
        )));
    }
    Ok(normalized)
}
