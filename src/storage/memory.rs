//! In-memory storage back ends.
//!
//! Reference implementations of the persistence traits: a `HashMap`-backed
//! key-value store, a node/edge map graph store, and a brute-force cosine
//! vector index. Suitable for tests and small local corpora.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{GraphStore, KvStore, ScoredPoint, VectorIndex};
use crate::graph::{Entity, Relation};
use crate::Result;

/// Key-value store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    inner: RwLock<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn upsert(&self, id: &str, value: Value) -> Result<()> {
        self.inner.write().await.insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.write().await.remove(id);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let map = self.inner.read().await;
        let mut entries: Vec<(String, Value)> = map
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.write().await.retain(|id, _| !id.starts_with(prefix));
        Ok(())
    }
}

/// Graph store backed by node/edge maps.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    nodes: RwLock<HashMap<String, Entity>>,
    edges: RwLock<HashMap<(String, String), Relation>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: &Entity) -> Result<()> {
        self.nodes
            .write()
            .await
            .insert(node.name.clone(), node.clone());
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.nodes.read().await.get(name).cloned())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.nodes.write().await.remove(name);
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Relation) -> Result<()> {
        let key = (edge.source_name.clone(), edge.target_name.clone());
        self.edges.write().await.insert(key, edge.clone());
        Ok(())
    }

    async fn get_edge(&self, source: &str, target: &str) -> Result<Option<Relation>> {
        let key = (source.to_string(), target.to_string());
        Ok(self.edges.read().await.get(&key).cloned())
    }

    async fn delete_edge(&self, source: &str, target: &str) -> Result<()> {
        let key = (source.to_string(), target.to_string());
        self.edges.write().await.remove(&key);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Entity>> {
        let mut nodes: Vec<Entity> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn list_edges(&self) -> Result<Vec<Relation>> {
        let mut edges: Vec<Relation> = self.edges.read().await.values().cloned().collect();
        edges.sort_by(|a, b| {
            (&a.source_name, &a.target_name).cmp(&(&b.source_name, &b.target_name))
        });
        Ok(edges)
    }
}

/// Brute-force cosine similarity index.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    points: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.points.write().await.insert(id.to_string(), vector);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>> {
        let points = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .map(|(id, candidate)| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(vector, candidate),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.points.write().await.remove(id);
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
