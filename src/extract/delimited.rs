//! Delimited-tuple extraction format.
//!
//! The model emits records like
//! `("entity"<|>Alice<|>person<|>A researcher)##("relationship"<|>Alice<|>Bob<|>They collaborate<|>2.0)<|COMPLETE|>`
//! separated by record delimiters and newlines. Models occasionally mangle
//! the tuple delimiter itself (`< | >`, `<||>`); those are repaired from the
//! surrounding fixed markers before field splitting.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{push_entity, push_relation, sanitize_text, DelimiterSet, ParseContext, ParsedRecords};

/// Mangled forms of the default `<|>` tuple delimiter: the fixed `<`/`>`
/// markers survive, the pipe between them gets doubled, spaced, or swapped
/// for a full-width lookalike.
static MANGLED_TUPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*[|｜¦]{1,3}\s*>").expect("static regex"));

/// Field count of an entity record, tag included.
const ENTITY_FIELDS: usize = 4;
/// Field count of a relation record, tag included.
const RELATION_FIELDS: usize = 5;

/// Parse delimited-tuple model output into candidate records.
pub fn parse_delimited(raw: &str, delimiters: &DelimiterSet, ctx: &ParseContext) -> ParsedRecords {
    let mut out = ParsedRecords::default();

    let cleaned = raw.replace(&delimiters.completion, "\n");
    let repaired = if delimiters.tuple == "<|>" {
        MANGLED_TUPLE.replace_all(&cleaned, "<|>").into_owned()
    } else {
        cleaned
    };

    for segment in repaired.split(delimiters.record.as_str()) {
        for line in segment.lines() {
            parse_record(line, delimiters, ctx, &mut out);
        }
    }

    out
}

fn parse_record(line: &str, delimiters: &DelimiterSet, ctx: &ParseContext, out: &mut ParsedRecords) {
    let record = line.trim();
    let record = record.strip_prefix('(').unwrap_or(record);
    let record = record.strip_suffix(')').unwrap_or(record).trim();
    if record.is_empty() {
        return;
    }

    let fields: Vec<&str> = record.split(delimiters.tuple.as_str()).collect();
    if fields.len() < 2 {
        // Prose or a stray marker, not a record.
        return;
    }

    let tag = match sanitize_text(fields[0]) {
        Some(tag) => tag.to_lowercase(),
        None => {
            debug!(chunk_id = %ctx.chunk_id, "skipping record with unreadable tag");
            return;
        }
    };

    if tag.contains("entity") {
        if fields.len() != ENTITY_FIELDS {
            warn!(
                chunk_id = %ctx.chunk_id,
                fields = fields.len(),
                expected = ENTITY_FIELDS,
                record = %record.chars().take(60).collect::<String>(),
                "dropping entity record with wrong field count"
            );
            out.dropped += 1;
            return;
        }
        push_entity(out, ctx, fields[1], fields[2], fields[3]);
    } else if tag.contains("relation") {
        if fields.len() != RELATION_FIELDS {
            warn!(
                chunk_id = %ctx.chunk_id,
                fields = fields.len(),
                expected = RELATION_FIELDS,
                record = %record.chars().take(60).collect::<String>(),
                "dropping relation record with wrong field count"
            );
            out.dropped += 1;
            return;
        }
        push_relation(out, ctx, fields[1], fields[2], fields[3], "", fields[4]);
    } else {
        debug!(chunk_id = %ctx.chunk_id, tag = %tag, "skipping unrecognized record tag");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> ParseContext {
        ParseContext {
            chunk_id: "chunk-1".to_string(),
            file_path: "doc.txt".to_string(),
            timestamp: Utc::now(),
            max_name_len: 64,
        }
    }

    fn delims() -> DelimiterSet {
        DelimiterSet::default()
    }

    const SAMPLE: &str = concat!(
        "(\"entity\"<|>Alice<|>person<|>A distributed-systems researcher)##",
        "(\"entity\"<|>Acme Labs<|>organization<|>Research lab in Berlin)##",
        "(\"relationship\"<|>Alice<|>Acme Labs<|>Alice works at Acme Labs<|>3.0)",
        "<|COMPLETE|>"
    );

    #[test]
    fn parses_entities_and_relations() {
        let parsed = parse_delimited(SAMPLE, &delims(), &ctx());

        assert_eq!(parsed.entities.len(), 2);
        assert_eq!(parsed.relations.len(), 1);
        assert_eq!(parsed.dropped, 0);

        let alice = &parsed.entities["Alice"][0];
        assert_eq!(alice.entity_type, "person");
        assert_eq!(alice.description, "A distributed-systems researcher");

        let edge = &parsed.relations[&("Alice".to_string(), "Acme Labs".to_string())][0];
        assert_eq!(edge.weight, 3.0);
        assert_eq!(edge.description, "Alice works at Acme Labs");
    }

    #[test]
    fn parsing_is_idempotent() {
        let context = ctx();
        let first = parse_delimited(SAMPLE, &delims(), &context);
        let second = parse_delimited(SAMPLE, &delims(), &context);
        assert_eq!(first, second);
    }

    #[test]
    fn newline_separated_records_are_parsed() {
        let raw = "(\"entity\"<|>Alice<|>person<|>desc one)\n(\"entity\"<|>Bob<|>person<|>desc two)";
        let parsed = parse_delimited(raw, &delims(), &ctx());
        assert_eq!(parsed.entities.len(), 2);
    }

    #[test]
    fn wrong_field_count_drops_record_but_not_siblings() {
        let raw = concat!(
            "(\"entity\"<|>Broken<|>person)##",
            "(\"entity\"<|>Alice<|>person<|>kept)##",
            "(\"relationship\"<|>Alice<|>Bob<|>too<|>many<|>fields<|>here)"
        );
        let parsed = parse_delimited(raw, &delims(), &ctx());

        assert_eq!(parsed.dropped, 2);
        assert_eq!(parsed.entities.len(), 1);
        assert!(parsed.entities.contains_key("Alice"));
        assert!(parsed.relations.is_empty());
    }

    #[test]
    fn mangled_tuple_delimiter_is_repaired() {
        for raw in [
            "(\"entity\"< | >Alice<|>person<|>spaced pipe)",
            "(\"entity\"<||>Alice<|>person<|>doubled pipe)",
            "(\"entity\"<｜>Alice<|>person<|>full-width pipe)",
        ] {
            let parsed = parse_delimited(raw, &delims(), &ctx());
            assert_eq!(parsed.entities.len(), 1, "failed to repair: {raw}");
            assert!(parsed.entities.contains_key("Alice"));
        }
    }

    #[test]
    fn completion_delimiter_between_records_is_tolerated() {
        let raw = "(\"entity\"<|>Alice<|>person<|>desc)<|COMPLETE|>(\"entity\"<|>Bob<|>person<|>desc)";
        let parsed = parse_delimited(raw, &delims(), &ctx());
        assert_eq!(parsed.entities.len(), 2);
    }

    #[test]
    fn prose_lines_are_ignored() {
        let raw = "Here are the extracted records:\n(\"entity\"<|>Alice<|>person<|>desc)\nDone.";
        let parsed = parse_delimited(raw, &delims(), &ctx());
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.dropped, 0);
    }

    #[test]
    fn unknown_tags_are_skipped_silently() {
        let raw = "(\"keyword\"<|>alpha<|>beta<|>gamma)";
        let parsed = parse_delimited(raw, &delims(), &ctx());
        assert!(parsed.is_empty());
        assert_eq!(parsed.dropped, 0);
    }

    #[test]
    fn relation_weight_falls_back_to_default() {
        let raw = "(\"relationship\"<|>Alice<|>Bob<|>friends<|>very strong)";
        let parsed = parse_delimited(raw, &delims(), &ctx());
        let edge = &parsed.relations[&("Alice".to_string(), "Bob".to_string())][0];
        assert_eq!(edge.weight, 1.0);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let parsed = parse_delimited("", &delims(), &ctx());
        assert!(parsed.is_empty());
        assert_eq!(parsed.dropped, 0);
    }

    #[test]
    fn duplicate_entities_group_under_one_key() {
        let raw = concat!(
            "(\"entity\"<|>Alice<|>person<|>first mention)##",
            "(\"entity\"<|>\"Alice\"<|>person<|>second mention)"
        );
        let parsed = parse_delimited(raw, &delims(), &ctx());
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities["Alice"].len(), 2);
    }
}
