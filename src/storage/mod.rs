//! Narrow persistence interfaces.
//!
//! The engine talks to storage through three small traits so that concrete
//! back ends (SQL, document stores, vector databases, graph databases) stay
//! pluggable. The in-memory implementations in [`memory`] back tests and
//! local runs.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::graph::{Entity, Relation};
use crate::Result;

pub use memory::{MemoryGraphStore, MemoryKvStore, MemoryVectorIndex};

/// Key-value persistence, used for chunk records and cache entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Value>>;
    /// Atomic per key: a concurrent reader sees either the old or new value.
    async fn upsert(&self, id: &str, value: Value) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// All entries whose id starts with `prefix`, in id order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
    /// Remove all entries whose id starts with `prefix`.
    async fn clear_prefix(&self, prefix: &str) -> Result<()>;
}

/// Canonical graph persistence.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: &Entity) -> Result<()>;
    async fn get_node(&self, name: &str) -> Result<Option<Entity>>;
    async fn delete_node(&self, name: &str) -> Result<()>;
    async fn upsert_edge(&self, edge: &Relation) -> Result<()>;
    async fn get_edge(&self, source: &str, target: &str) -> Result<Option<Relation>>;
    async fn delete_edge(&self, source: &str, target: &str) -> Result<()>;
    async fn list_nodes(&self) -> Result<Vec<Entity>>;
    async fn list_edges(&self) -> Result<Vec<Relation>>;
}

/// One vector-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
}

/// Vector similarity index over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()>;
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>>;
    async fn delete(&self, id: &str) -> Result<()>;
}
