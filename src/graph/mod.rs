//! Canonical knowledge-graph model.
//!
//! Entities and relations are the deduplicated, merged representation of raw
//! extraction records, keyed by (truncated) name and directed name pair.
//! Merging is associative and commutative: description segments are a sorted,
//! deduplicated set joined with [`FIELD_SEP`]; weights are summed; provenance
//! sets are unioned; entity types are resolved by majority vote with ties
//! broken by earliest sighting. Applying the same records in any order, or
//! twice, converges to the same canonical state.

pub mod merge;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::{RawEntityRecord, RawRelationRecord};

pub use merge::{MergeEngine, MergeOutcome};

/// Separator between aggregated description segments.
pub const FIELD_SEP: &str = "<SEP>";

/// Entity type used for relation endpoints never seen as entity records.
pub const UNKNOWN_TYPE: &str = "unknown";

/// One type's tally in an entity's majority vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeVote {
    pub entity_type: String,
    pub count: usize,
    /// Earliest record timestamp that voted for this type (tie breaker)
    pub first_seen: DateTime<Utc>,
}

/// Canonical graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    /// Vote tallies behind `entity_type`, kept so later merges stay commutative
    pub type_votes: Vec<TypeVote>,
    pub source_chunk_ids: BTreeSet<String>,
    pub file_paths: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Canonical directed graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_name: String,
    pub target_name: String,
    pub keywords: String,
    pub description: String,
    pub weight: f64,
    pub source_chunk_ids: BTreeSet<String>,
    pub file_paths: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Fold raw entity records into an existing canonical entity (or a new one).
///
/// `records` must already be filtered for chunk-idempotence by the caller.
pub fn merge_entity_records(existing: Option<Entity>, records: &[&RawEntityRecord]) -> Entity {
    debug_assert!(!records.is_empty() || existing.is_some());

    let mut segments: BTreeSet<String> = existing
        .as_ref()
        .map(|e| split_segments(&e.description))
        .unwrap_or_default();
    let mut type_votes = existing.as_ref().map(|e| e.type_votes.clone()).unwrap_or_default();
    let mut source_chunk_ids = existing
        .as_ref()
        .map(|e| e.source_chunk_ids.clone())
        .unwrap_or_default();
    let mut file_paths = existing.as_ref().map(|e| e.file_paths.clone()).unwrap_or_default();
    let mut first_seen = existing.as_ref().map(|e| e.first_seen);
    let mut last_updated = existing.as_ref().map(|e| e.last_updated);

    let name = existing
        .as_ref()
        .map(|e| e.name.clone())
        .or_else(|| records.first().map(|r| r.name.clone()))
        .unwrap_or_default();

    for record in records {
        segments.insert(record.description.clone());
        vote(&mut type_votes, &record.entity_type, record.timestamp);
        source_chunk_ids.insert(record.chunk_id.clone());
        file_paths.insert(record.file_path.clone());
        first_seen = Some(first_seen.map_or(record.timestamp, |t| t.min(record.timestamp)));
        last_updated = Some(last_updated.map_or(record.timestamp, |t| t.max(record.timestamp)));
    }

    let now = Utc::now();
    Entity {
        name,
        entity_type: winning_type(&type_votes),
        description: join_segments(&segments),
        type_votes,
        source_chunk_ids,
        file_paths,
        first_seen: first_seen.unwrap_or(now),
        last_updated: last_updated.unwrap_or(now),
    }
}

/// Fold raw relation records into an existing canonical relation.
///
/// `records` must already be filtered for chunk-idempotence by the caller.
pub fn merge_relation_records(
    existing: Option<Relation>,
    records: &[&RawRelationRecord],
) -> Relation {
    debug_assert!(!records.is_empty() || existing.is_some());

    let mut segments: BTreeSet<String> = existing
        .as_ref()
        .map(|r| split_segments(&r.description))
        .unwrap_or_default();
    let mut keywords: BTreeSet<String> = existing
        .as_ref()
        .map(|r| split_keywords(&r.keywords))
        .unwrap_or_default();
    let mut weight = existing.as_ref().map(|r| r.weight).unwrap_or(0.0);
    let mut source_chunk_ids = existing
        .as_ref()
        .map(|r| r.source_chunk_ids.clone())
        .unwrap_or_default();
    let mut file_paths = existing.as_ref().map(|r| r.file_paths.clone()).unwrap_or_default();
    let mut first_seen = existing.as_ref().map(|r| r.first_seen);
    let mut last_updated = existing.as_ref().map(|r| r.last_updated);

    let (source_name, target_name) = existing
        .as_ref()
        .map(|r| (r.source_name.clone(), r.target_name.clone()))
        .or_else(|| {
            records
                .first()
                .map(|r| (r.source_name.clone(), r.target_name.clone()))
        })
        .unwrap_or_default();

    for record in records {
        if !record.description.is_empty() {
            segments.insert(record.description.clone());
        }
        keywords.extend(split_keywords(&record.keywords));
        weight += record.weight;
        source_chunk_ids.insert(record.chunk_id.clone());
        file_paths.insert(record.file_path.clone());
        first_seen = Some(first_seen.map_or(record.timestamp, |t| t.min(record.timestamp)));
        last_updated = Some(last_updated.map_or(record.timestamp, |t| t.max(record.timestamp)));
    }

    let now = Utc::now();
    Relation {
        source_name,
        target_name,
        keywords: keywords.into_iter().collect::<Vec<_>>().join(","),
        description: join_segments(&segments),
        weight,
        source_chunk_ids,
        file_paths,
        first_seen: first_seen.unwrap_or(now),
        last_updated: last_updated.unwrap_or(now),
    }
}

fn vote(votes: &mut Vec<TypeVote>, entity_type: &str, timestamp: DateTime<Utc>) {
    match votes.iter_mut().find(|v| v.entity_type == entity_type) {
        Some(existing) => {
            existing.count += 1;
            existing.first_seen = existing.first_seen.min(timestamp);
        }
        None => votes.push(TypeVote {
            entity_type: entity_type.to_string(),
            count: 1,
            first_seen: timestamp,
        }),
    }
}

/// Majority type; ties go to the earliest-seen, then lexically smallest type.
fn winning_type(votes: &[TypeVote]) -> String {
    votes
        .iter()
        .max_by(|a, b| {
            a.count
                .cmp(&b.count)
                .then_with(|| b.first_seen.cmp(&a.first_seen))
                .then_with(|| b.entity_type.cmp(&a.entity_type))
        })
        .map(|v| v.entity_type.clone())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
}

fn split_segments(description: &str) -> BTreeSet<String> {
    description
        .split(FIELD_SEP)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_segments(segments: &BTreeSet<String>) -> String {
    segments.iter().cloned().collect::<Vec<_>>().join(FIELD_SEP)
}

fn split_keywords(keywords: &str) -> BTreeSet<String> {
    keywords
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
