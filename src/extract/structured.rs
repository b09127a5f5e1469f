//! Structured (block key/value) extraction fallback format.
//!
//! Some models ignore the tuple instructions and answer with an indented
//! key/value document instead, often wrapped in code fences. This branch
//! strips the wrapping, parses the block, and funnels every candidate
//! through the same validation as the delimited branch. An unparseable
//! document yields an empty result, never an error.

use serde_yaml::Value;
use tracing::warn;

use super::{push_entity, push_relation, ParseContext, ParsedRecords};

/// Parse block-structured model output into candidate records.
pub fn parse_structured(raw: &str, ctx: &ParseContext) -> ParsedRecords {
    let mut out = ParsedRecords::default();

    let cleaned = strip_wrapping(raw);
    if cleaned.is_empty() {
        return out;
    }

    let value: Value = match serde_yaml::from_str(cleaned) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                chunk_id = %ctx.chunk_id,
                error = %err,
                "structured extraction output unparseable, yielding empty result"
            );
            return out;
        }
    };

    collect_entities(&value, ctx, &mut out);
    collect_relations(&value, ctx, &mut out);
    out
}

/// Remove code fences and stray punctuation around the block.
fn strip_wrapping(raw: &str) -> &str {
    let is_stray = |c: char| matches!(c, ',' | ';' | '.' | ':') || c.is_whitespace();

    let mut text = raw.trim_matches(is_stray);
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("yaml", "json", ...) up to the first newline.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    text.trim_matches(is_stray)
}

fn collect_entities(value: &Value, ctx: &ParseContext, out: &mut ParsedRecords) {
    match value.get("entities") {
        // List-of-objects shape
        Some(Value::Sequence(items)) => {
            for item in items {
                let name = field(item, &["name", "entity_name"]);
                let entity_type = field(item, &["type", "entity_type"]);
                let description = field(item, &["description"]);
                push_entity(out, ctx, &name, &entity_type, &description);
            }
        }
        // name -> attributes mapping shape
        Some(Value::Mapping(map)) => {
            for (key, attrs) in map {
                let Some(name) = key.as_str() else { continue };
                let entity_type = field(attrs, &["type", "entity_type"]);
                let description = field(attrs, &["description"]);
                push_entity(out, ctx, name, &entity_type, &description);
            }
        }
        _ => {}
    }
}

fn collect_relations(value: &Value, ctx: &ParseContext, out: &mut ParsedRecords) {
    let items = value
        .get("relationships")
        .or_else(|| value.get("relations"))
        .and_then(Value::as_sequence);
    let Some(items) = items else { return };

    for item in items {
        let source = field(item, &["source", "source_entity", "from"]);
        let target = field(item, &["target", "target_entity", "to"]);
        let description = field(item, &["description"]);
        let keywords = field(item, &["keywords"]);
        let weight = field(item, &["weight", "strength"]);
        push_relation(out, ctx, &source, &target, &description, &keywords, &weight);
    }
}

/// First matching attribute as a string; scalars are stringified, keyword
/// lists joined with commas.
fn field(value: &Value, keys: &[&str]) -> String {
    for key in keys {
        let Some(found) = value.get(key) else { continue };
        match found {
            Value::String(s) => return s.clone(),
            Value::Number(n) => return n.to_string(),
            Value::Sequence(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                return parts.join(",");
            }
            _ => continue,
        }
    }
    String::new()
}
