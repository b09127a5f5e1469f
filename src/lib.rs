//! Knowledge-graph RAG engine
//!
//! This library provides tools to:
//! - Split documents into token-bounded, overlapping chunks
//! - Parse model extraction output (delimited tuples or structured blocks)
//! - Merge noisy entity/relation candidates into a canonical knowledge graph,
//!   safely under concurrent chunk processing
//! - Cache model calls with single-flight miss handling
//! - Fuse vector, graph and keyword retrieval channels with Reciprocal Rank
//!   Fusion at query time

pub mod cache;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extract;
pub mod fusion;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod storage;
pub mod sync;
pub mod tokenizer;

// Re-export common types
pub use cache::{Cache, CacheScope, Cached};
pub use chunker::{chunk_document, Chunk, ChunkOptions};
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{DelimiterSet, ExtractionFormat, ParsedRecords};
pub use fusion::{fuse, FusedItem, FusionOptions};
pub use graph::{Entity, MergeEngine, MergeOutcome, Relation};
pub use llm::{ChatMessage, CompletionModel, EmbeddingModel, HashEmbedder, OpenAiCompatClient};
pub use pipeline::{CancelHandle, IngestReport, Pipeline};
pub use retrieval::{QueryOptions, RetrievalMode, RetrievedChunk, Retriever};
pub use storage::{GraphStore, KvStore, VectorIndex};
pub use tokenizer::{Tokenizer, WordTokenizer};
