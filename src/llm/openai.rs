//! OpenAI-compatible HTTP adapter for completions and embeddings.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, CompletionModel, EmbeddingModel};
use crate::{Error, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Longest text accepted per embedding input, in characters.
const MAX_EMBED_CHARS: usize = 8000;

/// Client for any OpenAI-compatible `/chat/completions` + `/embeddings` API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    /// Create client from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| Error::InvalidArgument("OPENAI_API_KEY not set".to_string()))?;
        let mut client = Self::new(api_key)?;
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            client.base_url = base_url;
        }
        Ok(client)
    }

    /// Create client with API key.
    pub fn new<S: Into<String>>(api_key: S) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::InvalidArgument("API key is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("graph_rag/0.1.0")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = Client::builder()
            .user_agent("graph_rag/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;
        Ok(self)
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let request_id = header_string(&response, "x-request-id");
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(Error::LlmStatus {
                status: status.as_u16(),
                request_id,
                body: text,
            });
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Serialization("empty completion response".to_string()))
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatClient {
    async fn complete(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));
        self.chat(messages).await
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiCompatClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        // Empty inputs get empty vectors without being sent to the API.
        let processed: Vec<String> = texts
            .iter()
            .map(|t| {
                let trimmed = t.trim();
                trimmed.chars().take(MAX_EMBED_CHARS).collect()
            })
            .filter(|t: &String| !t.is_empty())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: processed,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let request_id = header_string(&response, "x-request-id");
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(Error::LlmStatus {
                status: status.as_u16(),
                request_id,
                body: text,
            });
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        let mut vectors = parsed.data.into_iter().map(|d| d.embedding);

        // Map back to original indices; empty texts keep empty vectors.
        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                result.push(Vec::new());
            } else {
                result.push(vectors.next().unwrap_or_default());
            }
        }
        Ok(result)
    }

    fn dimension(&self) -> usize {
        match self.embedding_model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536, // default
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::LlmTimeout(err.to_string())
    } else if err.is_connect() {
        Error::LlmConnection(err.to_string())
    } else if err.is_decode() {
        Error::Serialization(err.to_string())
    } else {
        Error::LlmConnection(err.to_string())
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
