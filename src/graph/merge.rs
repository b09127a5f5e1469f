//! Graph merge engine.
//!
//! Folds parsed raw records into the canonical graph behind a [`GraphStore`].
//! Writers are serialized per canonical key only: merges touching disjoint
//! entities/relations proceed fully in parallel. A chunk id already present
//! in a key's provenance contributes nothing on re-merge, so replaying a
//! chunk after a crash or retry never double-counts.

use std::sync::Arc;

use tracing::debug;

use crate::extract::{ParsedRecords, RawEntityRecord, RawRelationRecord};
use crate::graph::{merge_entity_records, merge_relation_records, Entity, Relation, UNKNOWN_TYPE};
use crate::storage::GraphStore;
use crate::sync::KeyedLocks;
use crate::Result;

/// Counts of what one merge call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeOutcome {
    pub entities_merged: usize,
    pub relations_merged: usize,
    /// Keys skipped because every record came from an already-seen chunk
    pub entities_skipped: usize,
    pub relations_skipped: usize,
}

/// Merges raw records into canonical entities and relations.
pub struct MergeEngine {
    store: Arc<dyn GraphStore>,
    locks: KeyedLocks,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    /// Merge one parse result. Callable repeatedly and concurrently for
    /// different chunks; only same-key merges serialize against each other.
    pub async fn merge(&self, parsed: &ParsedRecords) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome::default();

        for (name, records) in &parsed.entities {
            if self.merge_entity(name, records).await? {
                outcome.entities_merged += 1;
            } else {
                outcome.entities_skipped += 1;
            }
        }

        for ((source, target), records) in &parsed.relations {
            if self.merge_relation(source, target, records).await? {
                outcome.relations_merged += 1;
            } else {
                outcome.relations_skipped += 1;
            }
        }

        Ok(outcome)
    }

    async fn merge_entity(&self, name: &str, records: &[RawEntityRecord]) -> Result<bool> {
        let _guard = self.locks.acquire(&node_key(name)).await;

        let existing = self.store.get_node(name).await?;
        let fresh: Vec<&RawEntityRecord> = records
            .iter()
            .filter(|r| !already_contributed_entity(existing.as_ref(), &r.chunk_id))
            .collect();
        if fresh.is_empty() {
            debug!(name, "all entity records already merged, skipping");
            return Ok(false);
        }

        let merged = merge_entity_records(existing, &fresh);
        self.store.upsert_node(&merged).await?;
        Ok(true)
    }

    async fn merge_relation(
        &self,
        source: &str,
        target: &str,
        records: &[RawRelationRecord],
    ) -> Result<bool> {
        let merged = {
            let _guard = self.locks.acquire(&edge_key(source, target)).await;

            let existing = self.store.get_edge(source, target).await?;
            let fresh: Vec<&RawRelationRecord> = records
                .iter()
                .filter(|r| !already_contributed_relation(existing.as_ref(), &r.chunk_id))
                .collect();
            if fresh.is_empty() {
                debug!(source, target, "all relation records already merged, skipping");
                return Ok(false);
            }

            let merged = merge_relation_records(existing, &fresh);
            self.store.upsert_edge(&merged).await?;
            merged
        };

        // Endpoints referenced only by edges still need a node. Locks are
        // taken one at a time, never nested.
        self.ensure_endpoint(source, &merged).await?;
        self.ensure_endpoint(target, &merged).await?;
        Ok(true)
    }

    /// Insert a placeholder node for an edge endpoint no entity record has
    /// named yet. The placeholder carries no chunk provenance, so real
    /// entity records from the same chunks still merge in later.
    async fn ensure_endpoint(&self, name: &str, edge: &Relation) -> Result<()> {
        let _guard = self.locks.acquire(&node_key(name)).await;

        if self.store.get_node(name).await?.is_some() {
            return Ok(());
        }

        let placeholder = Entity {
            name: name.to_string(),
            entity_type: UNKNOWN_TYPE.to_string(),
            description: edge.description.clone(),
            type_votes: Vec::new(),
            source_chunk_ids: Default::default(),
            file_paths: edge.file_paths.clone(),
            first_seen: edge.first_seen,
            last_updated: edge.last_updated,
        };
        self.store.upsert_node(&placeholder).await
    }
}

fn already_contributed_entity(existing: Option<&Entity>, chunk_id: &str) -> bool {
    existing.is_some_and(|e| e.source_chunk_ids.contains(chunk_id))
}

fn already_contributed_relation(existing: Option<&Relation>, chunk_id: &str) -> bool {
    existing.is_some_and(|r| r.source_chunk_ids.contains(chunk_id))
}

fn node_key(name: &str) -> String {
    format!("node:{name}")
}

fn edge_key(source: &str, target: &str) -> String {
    format!("edge:{source}\u{1f}{target}")
}
