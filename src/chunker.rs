//! Token-bounded document chunker.
//!
//! Splits a document into overlapping token windows, or optionally on a
//! literal separator character first. Every emitted chunk records its exact
//! token count and zero-based order index; chunk identity is a content hash
//! combined with the document id, so re-chunking the same document yields
//! the same ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tokenizer::Tokenizer;
use crate::{Error, Result};

/// Characters of the offending text carried in a token-limit error.
const PREVIEW_CHARS: usize = 80;

/// Immutable token-bounded slice of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content hash combined with the document id
    pub id: String,
    /// Trimmed chunk text
    pub content: String,
    /// Exact token count of the chunk window
    pub token_count: usize,
    /// Zero-based position within the document
    pub order_index: usize,
    /// Document this chunk was cut from
    pub source_document_id: String,
    /// Caller-supplied provenance, never interpreted
    pub file_path: String,
}

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Hard ceiling on tokens per chunk
    pub max_tokens: usize,
    /// Tokens shared between consecutive window chunks
    pub overlap_tokens: usize,
    /// Split on this character before applying the token window
    pub split_char: Option<char>,
    /// With `split_char`: fail on oversized pieces instead of re-windowing them
    pub split_char_only: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            overlap_tokens: 100,
            split_char: None,
            split_char_only: false,
        }
    }
}

/// Split `text` into ordered chunks according to `opts`.
///
/// In character-only mode an oversized piece aborts the whole call with
/// [`Error::ChunkTokenLimitExceeded`]; nothing is silently truncated.
pub fn chunk_document(
    tokenizer: &dyn Tokenizer,
    text: &str,
    document_id: &str,
    file_path: &str,
    opts: &ChunkOptions,
) -> Result<Vec<Chunk>> {
    if opts.max_tokens == 0 {
        return Err(Error::InvalidArgument("max_tokens must be > 0".to_string()));
    }
    if opts.overlap_tokens >= opts.max_tokens {
        return Err(Error::InvalidArgument(format!(
            "overlap_tokens ({}) must be smaller than max_tokens ({})",
            opts.overlap_tokens, opts.max_tokens
        )));
    }

    let mut chunks = Vec::new();
    match opts.split_char {
        None => {
            window_chunks(tokenizer, text, document_id, file_path, opts, &mut chunks)?;
        }
        Some(sep) => {
            for piece in text.split(sep) {
                let trimmed = piece.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let token_count = tokenizer.count(trimmed);
                if token_count > opts.max_tokens {
                    if opts.split_char_only {
                        return Err(Error::ChunkTokenLimitExceeded {
                            token_count,
                            max_tokens: opts.max_tokens,
                            preview: preview(trimmed),
                        });
                    }
                    window_chunks(tokenizer, trimmed, document_id, file_path, opts, &mut chunks)?;
                } else {
                    let order_index = chunks.len();
                    chunks.push(make_chunk(
                        trimmed,
                        token_count,
                        order_index,
                        document_id,
                        file_path,
                    ));
                }
            }
        }
    }

    Ok(chunks)
}

/// Slide a fixed-size token window over `text`, appending to `out`.
fn window_chunks(
    tokenizer: &dyn Tokenizer,
    text: &str,
    document_id: &str,
    file_path: &str,
    opts: &ChunkOptions,
    out: &mut Vec<Chunk>,
) -> Result<()> {
    let tokens = tokenizer.encode(text);
    if tokens.is_empty() {
        return Ok(());
    }

    let step = opts.max_tokens - opts.overlap_tokens;
    let mut start = 0;
    loop {
        let end = (start + opts.max_tokens).min(tokens.len());
        let window = &tokens[start..end];
        let content = tokenizer.decode(window)?;
        let order_index = out.len();
        out.push(make_chunk(
            content.trim(),
            window.len(),
            order_index,
            document_id,
            file_path,
        ));
        if end == tokens.len() {
            break;
        }
        start += step;
    }

    Ok(())
}

fn make_chunk(
    content: &str,
    token_count: usize,
    order_index: usize,
    document_id: &str,
    file_path: &str,
) -> Chunk {
    Chunk {
        id: chunk_id(document_id, content),
        content: content.to_string(),
        token_count,
        order_index,
        source_document_id: document_id.to_string(),
        file_path: file_path.to_string(),
    }
}

/// Deterministic chunk id: SHA-256 over the document id and chunk content.
pub fn chunk_id(document_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
