//! Error types for the graph RAG engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Chunk exceeds token limit: {token_count} > {max_tokens} ({preview})")]
    ChunkTokenLimitExceeded {
        token_count: usize,
        max_tokens: usize,
        preview: String,
    },

    #[error("Model connection error: {0}")]
    LlmConnection(String),

    #[error("Model request timed out: {0}")]
    LlmTimeout(String),

    #[error("Model API error {status}: {body}")]
    LlmStatus {
        status: u16,
        request_id: Option<String>,
        body: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
