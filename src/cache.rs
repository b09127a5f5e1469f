//! Model-call cache.
//!
//! Memoizes completions, keyword extractions and embeddings by a
//! deterministic hash of `(scope, ordered args)`. Misses are single-flight:
//! concurrent callers of the same key share one computation, keyed mutual
//! exclusion held only for the duration of the underlying call. An
//! unreadable entry is a miss, never an error.
//!
//! The cache is an owned object constructed at session start and passed into
//! the pipeline explicitly; there is no process-wide instance.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::storage::KvStore;
use crate::sync::KeyedLocks;
use crate::Result;

/// Independent cache namespaces, clearable per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Extraction completions
    Completion,
    /// Query keyword extraction
    Keywords,
    /// Text embeddings
    Embedding,
}

impl CacheScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheScope::Completion => "completion",
            CacheScope::Keywords => "keywords",
            CacheScope::Embedding => "embedding",
        }
    }
}

/// A cached (or just-computed) value with its creation time.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    /// False on a hit, true when this call ran the computation
    pub fresh: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    created_at: DateTime<Utc>,
}

/// Keyed memoization over a [`KvStore`].
pub struct Cache {
    store: Arc<dyn KvStore>,
    flights: KeyedLocks,
    ttl: Option<chrono::Duration>,
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            flights: KeyedLocks::new(),
            ttl: None,
        }
    }

    /// Entries older than `ttl` count as misses and are recomputed.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Deterministic storage id for `(scope, args)`. Stable across process
    /// restarts: identical logical calls always hash identically.
    pub fn cache_key(scope: CacheScope, args: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scope.as_str().as_bytes());
        for arg in args {
            // Length framing keeps ["ab","c"] distinct from ["a","bc"].
            hasher.update((arg.len() as u64).to_be_bytes());
            hasher.update(arg.as_bytes());
        }
        format!("cache:{}:{}", scope.as_str(), hex::encode(hasher.finalize()))
    }

    /// Return the cached value for `(scope, args)` or run `compute` once.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        scope: CacheScope,
        args: &[&str],
        compute: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = Self::cache_key(scope, args);
        let _flight = self.flights.acquire(&id).await;

        if let Some(raw) = self.store.get_by_id(&id).await? {
            match serde_json::from_value::<StoredEntry<T>>(raw) {
                Ok(entry) if self.expired(entry.created_at) => {
                    debug!(scope = scope.as_str(), "cache entry expired, recomputing");
                }
                Ok(entry) => {
                    debug!(scope = scope.as_str(), "cache hit");
                    return Ok(Cached {
                        value: entry.value,
                        created_at: entry.created_at,
                        fresh: false,
                    });
                }
                Err(err) => {
                    warn!(
                        scope = scope.as_str(),
                        error = %err,
                        "unreadable cache entry, recomputing"
                    );
                }
            }
        }

        let entry = StoredEntry {
            value: compute().await?,
            created_at: Utc::now(),
        };
        self.store.upsert(&id, serde_json::to_value(&entry)?).await?;
        Ok(Cached {
            value: entry.value,
            created_at: entry.created_at,
            fresh: true,
        })
    }

    fn expired(&self, created_at: DateTime<Utc>) -> bool {
        self.ttl
            .is_some_and(|ttl| Utc::now() - created_at > ttl)
    }

    /// Drop every entry in one scope, leaving the others untouched.
    pub async fn clear_scope(&self, scope: CacheScope) -> Result<()> {
        self.store
            .clear_prefix(&format!("cache:{}:", scope.as_str()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache() -> (Cache, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        (Cache::new(store.clone()), store)
    }

    #[test]
    fn keys_are_deterministic() {
        let a = Cache::cache_key(CacheScope::Completion, &["prompt", "text"]);
        let b = Cache::cache_key(CacheScope::Completion, &["prompt", "text"]);
        assert_eq!(a, b);
    }

    #[test]
    fn keys_depend_on_argument_order() {
        let a = Cache::cache_key(CacheScope::Completion, &["x", "y"]);
        let b = Cache::cache_key(CacheScope::Completion, &["y", "x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_are_not_fooled_by_concatenation() {
        let a = Cache::cache_key(CacheScope::Completion, &["ab", "c"]);
        let b = Cache::cache_key(CacheScope::Completion, &["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_differ_per_scope() {
        let a = Cache::cache_key(CacheScope::Completion, &["x"]);
        let b = Cache::cache_key(CacheScope::Keywords, &["x"]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn hit_skips_compute_and_keeps_created_at() {
        let (cache, _) = cache();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("answer".to_string())
            })
            .await
            .unwrap();
        assert!(first.fresh);

        let second = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!second.fresh);
        assert_eq!(second.value, "answer");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn concurrent_misses_compute_once() {
        let (cache, _) = cache();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(CacheScope::Completion, &["shared"], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(42i64)
                    })
                    .await
                    .unwrap()
                    .value
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let (cache, _) = cache();

        let failed: Result<Cached<String>> = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async {
                Err(crate::Error::LlmTimeout("slow".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let recovered = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async {
                Ok("late answer".to_string())
            })
            .await
            .unwrap();
        assert!(recovered.fresh);
    }

    #[tokio::test]
    async fn corrupted_entry_is_treated_as_miss() {
        let (cache, store) = cache();
        let id = Cache::cache_key(CacheScope::Completion, &["p"]);
        store.upsert(&id, serde_json::json!("not an entry")).await.unwrap();

        let result = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(7i64) })
            .await
            .unwrap();
        assert!(result.fresh);
        assert_eq!(result.value, 7);
    }

    #[tokio::test]
    async fn scopes_clear_independently() {
        let (cache, _) = cache();

        cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(1i64) })
            .await
            .unwrap();
        cache
            .get_or_compute(CacheScope::Keywords, &["p"], || async { Ok(2i64) })
            .await
            .unwrap();

        cache.clear_scope(CacheScope::Completion).await.unwrap();

        let completion = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(10i64) })
            .await
            .unwrap();
        assert!(completion.fresh);

        let keywords = cache
            .get_or_compute(CacheScope::Keywords, &["p"], || async { Ok(20i64) })
            .await
            .unwrap();
        assert!(!keywords.fresh);
        assert_eq!(keywords.value, 2);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = Cache::new(store.clone()).with_ttl(chrono::Duration::zero());

        cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(1i64) })
            .await
            .unwrap();

        let again = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(2i64) })
            .await
            .unwrap();
        assert!(again.fresh);
        assert_eq!(again.value, 2);
    }

    #[tokio::test]
    async fn unexpired_entries_still_hit() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = Cache::new(store).with_ttl(chrono::Duration::hours(1));

        cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(1i64) })
            .await
            .unwrap();
        let again = cache
            .get_or_compute(CacheScope::Completion, &["p"], || async { Ok(2i64) })
            .await
            .unwrap();
        assert!(!again.fresh);
        assert_eq!(again.value, 1);
    }

    #[tokio::test]
    async fn embedding_vectors_round_trip() {
        let (cache, _) = cache();
        let vector = vec![0.5f32, -1.0, 2.0];

        let stored = cache
            .get_or_compute(CacheScope::Embedding, &["text"], || async {
                Ok(vector.clone())
            })
            .await
            .unwrap();
        assert_eq!(stored.value, vector);

        let hit: Cached<Vec<f32>> = cache
            .get_or_compute(CacheScope::Embedding, &["text"], || async {
                Ok(vec![9.0f32])
            })
            .await
            .unwrap();
        assert_eq!(hit.value, vector);
    }
}
