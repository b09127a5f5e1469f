//! Document ingestion pipeline.
//!
//! Chunk -> (per chunk, concurrently) completion -> parse -> merge. Chunks
//! are independently schedulable; the only serialization point is the merge
//! engine's per-key locks. Completions and embeddings go through the cache,
//! so re-ingesting a document after a crash neither repeats model calls nor
//! double-counts merges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{Cache, CacheScope};
use crate::chunker::{chunk_document, Chunk, ChunkOptions};
use crate::config::Config;
use crate::extract::{self, ParseContext};
use crate::graph::{MergeEngine, MergeOutcome};
use crate::llm::{ChatMessage, CompletionModel, EmbeddingModel};
use crate::prompts::PromptTemplate;
use crate::storage::{GraphStore, KvStore, VectorIndex};
use crate::tokenizer::Tokenizer;

/// Cooperative cancellation flag, checked between chunks.
///
/// Cancelling never rolls back: chunks merged before the flag was seen stay
/// merged and valid.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-document ingestion summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub entities_merged: usize,
    pub relations_merged: usize,
    pub records_accepted: usize,
    pub records_dropped: usize,
    pub cancelled: bool,
}

struct ChunkOutcome {
    merge: MergeOutcome,
    accepted: usize,
    dropped: usize,
}

/// Ingestion session: owns its cache and merge engine, injected storage.
pub struct Pipeline {
    config: Config,
    tokenizer: Arc<dyn Tokenizer>,
    completion: Arc<dyn CompletionModel>,
    embedder: Arc<dyn EmbeddingModel>,
    cache: Cache,
    merge: MergeEngine,
    kv: Arc<dyn KvStore>,
    vectors: Arc<dyn VectorIndex>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        tokenizer: Arc<dyn Tokenizer>,
        completion: Arc<dyn CompletionModel>,
        embedder: Arc<dyn EmbeddingModel>,
        kv: Arc<dyn KvStore>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            config,
            tokenizer,
            completion,
            embedder,
            cache: Cache::new(kv.clone()),
            merge: MergeEngine::new(graph),
            kv,
            vectors,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn graph(&self) -> Arc<dyn GraphStore> {
        self.merge.store()
    }

    /// Ingest one document.
    pub async fn ingest(
        &self,
        document_id: &str,
        file_path: &str,
        text: &str,
    ) -> Result<IngestReport> {
        self.ingest_with_cancel(document_id, file_path, text, &CancelHandle::new())
            .await
    }

    /// Ingest one document, stopping between chunks once `cancel` fires.
    pub async fn ingest_with_cancel(
        &self,
        document_id: &str,
        file_path: &str,
        text: &str,
        cancel: &CancelHandle,
    ) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        let opts = ChunkOptions {
            max_tokens: self.config.max_chunk_tokens,
            overlap_tokens: self.config.overlap_tokens,
            split_char: self.config.split_char,
            split_char_only: self.config.split_char_only,
        };

        let chunks = chunk_document(self.tokenizer.as_ref(), text, document_id, file_path, &opts)?;
        let chunks_total = chunks.len();
        info!(%run_id, document_id, chunks = chunks_total, "starting ingestion");

        let results: Vec<Result<ChunkOutcome>> = stream::iter(
            chunks
                .into_iter()
                .filter(|_| !cancel.is_cancelled())
                .map(|chunk| self.process_chunk(chunk)),
        )
        .buffer_unordered(self.config.max_concurrency)
        .collect()
        .await;

        let mut report = IngestReport {
            document_id: document_id.to_string(),
            chunks_total,
            ..Default::default()
        };
        for result in results {
            let outcome = result?;
            report.chunks_processed += 1;
            report.entities_merged += outcome.merge.entities_merged;
            report.relations_merged += outcome.merge.relations_merged;
            report.records_accepted += outcome.accepted;
            report.records_dropped += outcome.dropped;
        }
        report.cancelled = cancel.is_cancelled();

        info!(
            %run_id,
            document_id,
            chunks = report.chunks_processed,
            accepted = report.records_accepted,
            dropped = report.records_dropped,
            cancelled = report.cancelled,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn process_chunk(&self, chunk: Chunk) -> Result<ChunkOutcome> {
        self.persist_chunk(&chunk).await?;
        self.index_chunk(&chunk).await?;

        let delimiters = &self.config.delimiters;
        let delimiter_vars = [
            ("tuple_delimiter", delimiters.tuple.as_str()),
            ("record_delimiter", delimiters.record.as_str()),
            ("completion_delimiter", delimiters.completion.as_str()),
        ];

        let entity_types = self.config.entity_types_joined();
        let mut vars = delimiter_vars.to_vec();
        vars.push(("entity_types", entity_types.as_str()));
        vars.push(("input_text", chunk.content.as_str()));
        let prompt = PromptTemplate::ExtractEntities.render(&vars);

        let completion = self
            .cache
            .get_or_compute(
                CacheScope::Completion,
                &[self.config.llm_model.as_str(), prompt.as_str()],
                || async { self.completion.complete(&prompt, &[]).await },
            )
            .await
            .context("extraction completion failed")?;

        let ctx = ParseContext {
            chunk_id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            timestamp: Utc::now(),
            max_name_len: self.config.max_name_len,
        };
        let mut parsed = extract::parse(
            self.config.extraction_format,
            &completion.value,
            delimiters,
            &ctx,
        );

        // Gleaning: ask the model to continue extraction on the same chunk.
        let mut history = vec![
            ChatMessage::user(prompt.clone()),
            ChatMessage::assistant(completion.value.clone()),
        ];
        for round in 0..self.config.max_gleaning_rounds {
            let continue_prompt = PromptTemplate::ContinueExtraction.render(&delimiter_vars);
            let round_tag = round.to_string();
            let gleaned = self
                .cache
                .get_or_compute(
                    CacheScope::Completion,
                    &[
                        self.config.llm_model.as_str(),
                        chunk.id.as_str(),
                        "glean",
                        round_tag.as_str(),
                    ],
                    || async { self.completion.complete(&continue_prompt, &history).await },
                )
                .await
                .context("gleaning completion failed")?;

            let more = extract::parse(
                self.config.extraction_format,
                &gleaned.value,
                delimiters,
                &ctx,
            );
            if more.is_empty() {
                break;
            }
            history.push(ChatMessage::assistant(gleaned.value.clone()));
            parsed.absorb(more);
        }

        let accepted = parsed.accepted();
        let dropped = parsed.dropped;
        let merge = self.merge.merge(&parsed).await?;
        debug!(
            chunk_id = %chunk.id,
            accepted,
            dropped,
            entities = merge.entities_merged,
            relations = merge.relations_merged,
            "chunk merged"
        );

        Ok(ChunkOutcome {
            merge,
            accepted,
            dropped,
        })
    }

    /// Persist the chunk record through the key-value boundary.
    async fn persist_chunk(&self, chunk: &Chunk) -> Result<()> {
        let record = serde_json::json!({
            "content": chunk.content,
            "tokens": chunk.token_count,
            "chunk_order_index": chunk.order_index,
            "full_doc_id": chunk.source_document_id,
            "file_path": chunk.file_path,
        });
        self.kv
            .upsert(&chunk_kv_id(&chunk.id), record)
            .await
            .context("failed to persist chunk")?;
        Ok(())
    }

    /// Embed the chunk (through the embedding cache) and index it.
    async fn index_chunk(&self, chunk: &Chunk) -> Result<()> {
        let embedding = self
            .cache
            .get_or_compute(CacheScope::Embedding, &[chunk.content.as_str()], || async {
                let mut vectors = self.embedder.embed(&[chunk.content.clone()]).await?;
                Ok(vectors.pop().unwrap_or_default())
            })
            .await
            .context("chunk embedding failed")?;

        self.vectors
            .upsert(&chunk.id, embedding.value)
            .await
            .context("failed to index chunk embedding")?;
        Ok(())
    }
}

/// Key-value id of a persisted chunk record.
pub fn chunk_kv_id(chunk_id: &str) -> String {
    format!("chunk:{chunk_id}")
}
