//! Hybrid retrieval over the ingested corpus.
//!
//! Three independent channels produce ranked chunk ids (vector similarity,
//! graph traversal from keyword-matched entities, keyword search over stored
//! chunks) and Reciprocal Rank Fusion combines them into one ranked context
//! list. Channel fetches run concurrently; fusion itself is pure.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheScope};
use crate::config::Config;
use crate::fusion::{fuse, FusionOptions};
use crate::llm::{CompletionModel, EmbeddingModel};
use crate::pipeline::chunk_kv_id;
use crate::prompts::PromptTemplate;
use crate::storage::{GraphStore, KvStore, VectorIndex};

pub const VECTOR_CHANNEL: &str = "vector";
pub const GRAPH_CHANNEL: &str = "graph";
pub const KEYWORD_CHANNEL: &str = "keyword";

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Fuse all three channels (default)
    Hybrid,
    /// Only vector similarity
    VectorOnly,
    /// Only graph traversal
    GraphOnly,
    /// Only keyword matching
    KeywordOnly,
}

/// Per-query parameters; every field is caller-overridable.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub graph_weight: f64,
    pub keyword_weight: f64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Hybrid,
            top_k: crate::config::DEFAULT_TOP_K,
            rrf_k: crate::fusion::DEFAULT_RRF_K,
            vector_weight: 1.0,
            graph_weight: 1.0,
            keyword_weight: 1.0,
        }
    }
}

impl QueryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: RetrievalMode::Hybrid,
            top_k: config.top_k,
            rrf_k: config.rrf_k,
            vector_weight: config.vector_weight,
            graph_weight: config.graph_weight,
            keyword_weight: config.keyword_weight,
        }
    }
}

/// One fused result chunk.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub content: String,
    pub score: f64,
    pub source_document_id: String,
    pub file_path: String,
}

/// Keyword-extraction answer shape.
#[derive(Debug, Clone, Default, Deserialize)]
struct QueryKeywords {
    #[serde(default)]
    high_level_keywords: Vec<String>,
    #[serde(default)]
    low_level_keywords: Vec<String>,
}

/// Query-side engine over the same stores the pipeline writes.
pub struct Retriever {
    config: Config,
    completion: Arc<dyn CompletionModel>,
    embedder: Arc<dyn EmbeddingModel>,
    cache: Cache,
    kv: Arc<dyn KvStore>,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(
        config: Config,
        completion: Arc<dyn CompletionModel>,
        embedder: Arc<dyn EmbeddingModel>,
        kv: Arc<dyn KvStore>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            config,
            completion,
            embedder,
            cache: Cache::new(kv.clone()),
            kv,
            graph,
            vectors,
        }
    }

    /// Retrieve ranked context chunks for a query.
    pub async fn query(&self, text: &str, opts: &QueryOptions) -> Result<Vec<RetrievedChunk>> {
        let wants_vector = matches!(opts.mode, RetrievalMode::Hybrid | RetrievalMode::VectorOnly);
        let wants_graph = matches!(opts.mode, RetrievalMode::Hybrid | RetrievalMode::GraphOnly);
        let wants_keyword = matches!(opts.mode, RetrievalMode::Hybrid | RetrievalMode::KeywordOnly);

        let keywords = if wants_graph || wants_keyword {
            self.query_keywords(text).await
        } else {
            Vec::new()
        };

        let (vector_list, graph_list, keyword_list) = tokio::join!(
            async {
                if wants_vector {
                    self.vector_channel(text, opts.top_k).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if wants_graph {
                    self.graph_channel(&keywords, opts.top_k).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if wants_keyword {
                    self.keyword_channel(&keywords, opts.top_k).await
                } else {
                    Ok(Vec::new())
                }
            },
        );

        let mut channels: Vec<(String, Vec<String>)> = Vec::new();
        if wants_vector {
            channels.push((VECTOR_CHANNEL.to_string(), vector_list?));
        }
        if wants_graph {
            channels.push((GRAPH_CHANNEL.to_string(), graph_list?));
        }
        if wants_keyword {
            channels.push((KEYWORD_CHANNEL.to_string(), keyword_list?));
        }

        let fusion_opts = FusionOptions {
            k: opts.rrf_k,
            ..Default::default()
        }
        .with_weight(VECTOR_CHANNEL, opts.vector_weight)
        .with_weight(GRAPH_CHANNEL, opts.graph_weight)
        .with_weight(KEYWORD_CHANNEL, opts.keyword_weight);

        let fused = fuse(&channels, &fusion_opts);
        debug!(
            candidates = fused.len(),
            top_k = opts.top_k,
            "fused retrieval channels"
        );

        let mut results = Vec::new();
        for item in fused.into_iter().take(opts.top_k) {
            let Some(record) = self.kv.get_by_id(&chunk_kv_id(&item.doc_id)).await? else {
                warn!(chunk_id = %item.doc_id, "fused chunk missing from storage, skipping");
                continue;
            };
            results.push(RetrievedChunk {
                chunk_id: item.doc_id,
                content: record["content"].as_str().unwrap_or_default().to_string(),
                score: item.fused_score,
                source_document_id: record["full_doc_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                file_path: record["file_path"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(results)
    }

    /// Extract query keywords through the model, with a naive fallback.
    ///
    /// A failed or unparseable keyword call degrades to token splitting and
    /// never fails the query.
    async fn query_keywords(&self, text: &str) -> Vec<String> {
        let prompt = PromptTemplate::ExtractKeywords.render(&[("query", text)]);
        let cached = self
            .cache
            .get_or_compute(
                CacheScope::Keywords,
                &[self.config.llm_model.as_str(), text],
                || async { self.completion.complete(&prompt, &[]).await },
            )
            .await;

        let answer = match cached {
            Ok(cached) => cached.value,
            Err(err) => {
                warn!(error = %err, "keyword extraction failed, falling back to naive split");
                return naive_keywords(text);
            }
        };

        match parse_keywords(&answer) {
            Some(parsed) => {
                let mut keywords: Vec<String> = parsed
                    .high_level_keywords
                    .into_iter()
                    .chain(parsed.low_level_keywords)
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                keywords.dedup();
                if keywords.is_empty() {
                    naive_keywords(text)
                } else {
                    keywords
                }
            }
            None => {
                warn!("keyword answer unparseable, falling back to naive split");
                naive_keywords(text)
            }
        }
    }

    async fn vector_channel(&self, text: &str, top_k: usize) -> Result<Vec<String>> {
        let embedding = self
            .cache
            .get_or_compute(CacheScope::Embedding, &[text], || async {
                let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
                Ok(vectors.pop().unwrap_or_default())
            })
            .await
            .context("query embedding failed")?;

        let hits = self
            .vectors
            .query(&embedding.value, top_k)
            .await
            .context("vector index query failed")?;
        Ok(hits.into_iter().map(|h| h.id).collect())
    }

    /// Chunks reachable from keyword-matched entities: direct provenance
    /// first, then one hop over the strongest edges.
    async fn graph_channel(&self, keywords: &[String], top_k: usize) -> Result<Vec<String>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let nodes = self.graph.list_nodes().await.context("graph listing failed")?;
        let matched: Vec<&crate::graph::Entity> = nodes
            .iter()
            .filter(|node| {
                let name = node.name.to_lowercase();
                keywords.iter().any(|k| name.contains(k) || k.contains(&name))
            })
            .collect();
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<String, f64> = HashMap::new();
        for node in &matched {
            for chunk_id in &node.source_chunk_ids {
                *scores.entry(chunk_id.clone()).or_insert(0.0) += 1.0;
            }
        }

        // One-hop expansion, weighted by edge strength.
        let edges = self.graph.list_edges().await.context("edge listing failed")?;
        for edge in &edges {
            let touches = matched
                .iter()
                .any(|n| n.name == edge.source_name || n.name == edge.target_name);
            if !touches {
                continue;
            }
            for chunk_id in &edge.source_chunk_ids {
                *scores.entry(chunk_id.clone()).or_insert(0.0) += edge.weight * 0.1;
            }
        }

        Ok(rank_scores(scores, top_k))
    }

    /// Token-match scoring over stored chunk contents.
    async fn keyword_channel(&self, keywords: &[String], top_k: usize) -> Result<Vec<String>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self
            .kv
            .list_by_prefix("chunk:")
            .await
            .context("chunk listing failed")?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for (id, record) in &chunks {
            let Some(content) = record["content"].as_str() else {
                continue;
            };
            let haystack = content.to_lowercase();
            let score: f64 = keywords
                .iter()
                .map(|k| haystack.matches(k.as_str()).count() as f64)
                .sum();
            if score > 0.0 {
                let chunk_id = id.strip_prefix("chunk:").unwrap_or(id).to_string();
                scores.insert(chunk_id, score);
            }
        }

        Ok(rank_scores(scores, top_k))
    }
}

/// Sort scored chunk ids: score descending, id ascending, truncated to top_k.
fn rank_scores(scores: HashMap<String, f64>, top_k: usize) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_k);
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// Pull the JSON object out of a possibly fenced / chatty keyword answer.
fn parse_keywords(raw: &str) -> Option<QueryKeywords> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn naive_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 2)
        .collect();
    keywords.sort();
    keywords.dedup();
    keywords
}
