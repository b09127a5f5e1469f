//! Extraction-result parsing.
//!
//! Turns one chunk's raw model output into candidate entity/relation
//! records. Two wire formats are supported:
//! - [`ExtractionFormat::Delimited`]: tuple records separated by record
//!   delimiters and newlines (see [`delimited`])
//! - [`ExtractionFormat::Structured`]: a block-structured key/value document,
//!   possibly wrapped in code fences (see [`structured`])
//!
//! Both branches are pure functions producing the same [`ParsedRecords`]
//! shape, so downstream merging never needs to know which format produced a
//! record. Malformed records are dropped with a warning, never fatal.

pub mod delimited;
pub mod structured;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Characters that may not appear in an entity type.
const STRUCTURAL_CHARS: [char; 8] = ['\'', '(', ')', '<', '>', '|', '/', '\\'];

/// Wrapping pairs stripped from names and descriptions.
const WRAPPING_PAIRS: [(char, char); 6] = [
    ('"', '"'),
    ('\'', '\''),
    ('(', ')'),
    ('[', ']'),
    ('{', '}'),
    ('“', '”'),
];

/// Wire format of one extraction call, resolved once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFormat {
    /// Delimited-tuple records
    Delimited,
    /// Block-structured key/value document
    Structured,
}

/// Delimiter tokens used by the delimited-tuple format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelimiterSet {
    /// Separates fields within one record
    pub tuple: String,
    /// Separates records
    pub record: String,
    /// Marks the end of the whole extraction output
    pub completion: String,
}

impl Default for DelimiterSet {
    fn default() -> Self {
        Self {
            tuple: "<|>".to_string(),
            record: "##".to_string(),
            completion: "<|COMPLETE|>".to_string(),
        }
    }
}

/// Per-call parse context: provenance plus identifier limits.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub chunk_id: String,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
    pub max_name_len: usize,
}

/// Entity candidate extracted from one chunk, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntityRecord {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub chunk_id: String,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
}

/// Relation candidate extracted from one chunk, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRelationRecord {
    pub source_name: String,
    pub target_name: String,
    pub keywords: String,
    pub description: String,
    pub weight: f64,
    pub chunk_id: String,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
}

/// Output of one parse call: candidates grouped by canonical key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecords {
    pub entities: HashMap<String, Vec<RawEntityRecord>>,
    pub relations: HashMap<(String, String), Vec<RawRelationRecord>>,
    /// Records dropped for structural/format reasons
    pub dropped: usize,
}

impl ParsedRecords {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    /// Total accepted records.
    pub fn accepted(&self) -> usize {
        self.entities.values().map(Vec::len).sum::<usize>()
            + self.relations.values().map(Vec::len).sum::<usize>()
    }

    /// Fold another parse result (e.g. a gleaning round) into this one.
    pub fn absorb(&mut self, other: ParsedRecords) {
        for (name, records) in other.entities {
            self.entities.entry(name).or_default().extend(records);
        }
        for (key, records) in other.relations {
            self.relations.entry(key).or_default().extend(records);
        }
        self.dropped += other.dropped;
    }
}

/// Parse one chunk's raw model output in the given format.
pub fn parse(
    format: ExtractionFormat,
    raw: &str,
    delimiters: &DelimiterSet,
    ctx: &ParseContext,
) -> ParsedRecords {
    match format {
        ExtractionFormat::Delimited => delimited::parse_delimited(raw, delimiters, ctx),
        ExtractionFormat::Structured => structured::parse_structured(raw, ctx),
    }
}

/// Validate and append an entity candidate; returns false if it was dropped.
pub(crate) fn push_entity(
    out: &mut ParsedRecords,
    ctx: &ParseContext,
    name: &str,
    entity_type: &str,
    description: &str,
) -> bool {
    let Some(name) = sanitize_text(name) else {
        warn!(chunk_id = %ctx.chunk_id, "dropping entity record: unreadable name");
        out.dropped += 1;
        return false;
    };
    let Some(description) = sanitize_text(description) else {
        warn!(chunk_id = %ctx.chunk_id, name = %name, "dropping entity record: unreadable description");
        out.dropped += 1;
        return false;
    };
    if name.is_empty() || description.is_empty() {
        warn!(chunk_id = %ctx.chunk_id, "dropping entity record: empty name or description");
        out.dropped += 1;
        return false;
    }
    let Some(entity_type) = normalize_entity_type(entity_type) else {
        warn!(
            chunk_id = %ctx.chunk_id,
            name = %name,
            raw_type = entity_type,
            "dropping entity record: invalid type"
        );
        out.dropped += 1;
        return false;
    };

    let name = truncate_identifier(&name, ctx.max_name_len, &ctx.chunk_id);
    out.entities
        .entry(name.clone())
        .or_default()
        .push(RawEntityRecord {
            name,
            entity_type,
            description,
            chunk_id: ctx.chunk_id.clone(),
            file_path: ctx.file_path.clone(),
            timestamp: ctx.timestamp,
        });
    true
}

/// Validate and append a relation candidate; returns false if it was dropped.
pub(crate) fn push_relation(
    out: &mut ParsedRecords,
    ctx: &ParseContext,
    source: &str,
    target: &str,
    description: &str,
    keywords: &str,
    raw_weight: &str,
) -> bool {
    let (Some(source), Some(target)) = (sanitize_text(source), sanitize_text(target)) else {
        warn!(chunk_id = %ctx.chunk_id, "dropping relation record: unreadable endpoint");
        out.dropped += 1;
        return false;
    };
    if source.is_empty() || target.is_empty() {
        warn!(chunk_id = %ctx.chunk_id, "dropping relation record: empty endpoint");
        out.dropped += 1;
        return false;
    }
    if source == target {
        warn!(chunk_id = %ctx.chunk_id, name = %source, "dropping relation record: self-loop");
        out.dropped += 1;
        return false;
    }
    let description = sanitize_text(description).unwrap_or_default();

    let (weight, defaulted) = parse_weight(raw_weight);
    if defaulted {
        debug!(
            chunk_id = %ctx.chunk_id,
            raw_weight,
            "relation weight not a valid float, defaulting to 1.0"
        );
    }

    let source = truncate_identifier(&source, ctx.max_name_len, &ctx.chunk_id);
    let target = truncate_identifier(&target, ctx.max_name_len, &ctx.chunk_id);
    out.relations
        .entry((source.clone(), target.clone()))
        .or_default()
        .push(RawRelationRecord {
            source_name: source,
            target_name: target,
            keywords: normalize_keywords(keywords),
            description,
            weight,
            chunk_id: ctx.chunk_id.clone(),
            file_path: ctx.file_path.clone(),
            timestamp: ctx.timestamp,
        });
    true
}

/// Strip matched wrapping quotes/brackets and collapse internal whitespace.
///
/// Returns `None` when the text carries encoding damage (replacement or
/// control characters), which callers treat as "drop this record".
pub(crate) fn sanitize_text(text: &str) -> Option<String> {
    let mut current = text.trim();
    loop {
        let mut chars = current.chars();
        let (first, last) = (chars.next(), chars.next_back());
        let stripped = match (first, last) {
            (Some(open), Some(close))
                if WRAPPING_PAIRS.contains(&(open, close)) && current.chars().count() >= 2 =>
            {
                current[open.len_utf8()..current.len() - close.len_utf8()].trim()
            }
            _ => break,
        };
        if stripped == current {
            break;
        }
        current = stripped;
    }

    let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed
        .chars()
        .any(|c| c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()))
    {
        return None;
    }
    Some(collapsed)
}

/// Lowercase an entity type, remove spaces, reject structural characters.
pub(crate) fn normalize_entity_type(raw: &str) -> Option<String> {
    let cleaned = sanitize_text(raw)?;
    let normalized: String = cleaned
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if normalized.is_empty() || normalized.chars().any(|c| STRUCTURAL_CHARS.contains(&c)) {
        return None;
    }
    Some(normalized)
}

/// Hard-truncate an identifier to `max_len` characters, logging the original.
pub(crate) fn truncate_identifier(name: &str, max_len: usize, chunk_id: &str) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let truncated: String = name.chars().take(max_len).collect();
    warn!(
        chunk_id,
        original = %name.chars().take(20).collect::<String>(),
        max_len,
        "identifier exceeds max length, truncating"
    );
    truncated
}

/// Parse a relation weight, with an explicit 1.0 fallback.
///
/// Returns `(weight, defaulted)`; `defaulted` is true when the raw field was
/// not a valid float.
pub(crate) fn parse_weight(raw: &str) -> (f64, bool) {
    let cleaned = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    match cleaned.parse::<f64>() {
        Ok(w) if w.is_finite() => (w, false),
        _ => (1.0, true),
    }
}

/// Normalize keyword separators (full-width comma to ASCII comma).
pub(crate) fn normalize_keywords(raw: &str) -> String {
    sanitize_text(raw).unwrap_or_default().replace('，', ",")
}
