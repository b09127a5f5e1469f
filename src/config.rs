//! Engine configuration.
//!
//! Loads configuration from a `config.yml` file with compile-time defaults
//! as fallback. String values of the form `${VAR}` are resolved from the
//! environment.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::extract::{DelimiterSet, ExtractionFormat};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 1200;
pub const DEFAULT_OVERLAP_TOKENS: usize = 100;
pub const DEFAULT_MAX_NAME_LEN: usize = 256;
pub const DEFAULT_GLEANING_ROUNDS: usize = 1;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_ENTITY_TYPES: [&str; 5] =
    ["person", "organization", "location", "event", "concept"];

/// YAML config structures
#[derive(Debug, Deserialize)]
struct YamlConfig {
    chunking: Option<ChunkingConfig>,
    extraction: Option<ExtractionConfig>,
    llm: Option<LlmConfig>,
    embedding: Option<EmbeddingConfig>,
    retrieval: Option<RetrievalConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkingConfig {
    max_tokens: Option<usize>,
    overlap_tokens: Option<usize>,
    split_char: Option<String>,
    split_char_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionConfig {
    format: Option<String>,
    entity_types: Option<Vec<String>>,
    max_name_len: Option<usize>,
    max_gleaning_rounds: Option<usize>,
    max_concurrency: Option<usize>,
    tuple_delimiter: Option<String>,
    record_delimiter: Option<String>,
    completion_delimiter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmConfig {
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingConfig {
    model: Option<String>,
    dimension: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalConfig {
    top_k: Option<usize>,
    rrf_k: Option<f64>,
    vector_weight: Option<f64>,
    graph_weight: Option<f64>,
    keyword_weight: Option<f64>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub split_char: Option<char>,
    pub split_char_only: bool,
    pub extraction_format: ExtractionFormat,
    pub entity_types: Vec<String>,
    pub max_name_len: usize,
    pub max_gleaning_rounds: usize,
    pub max_concurrency: usize,
    pub delimiters: DelimiterSet,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub top_k: usize,
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub graph_weight: f64,
    pub keyword_weight: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    pub fn new() -> Self {
        Self::load_dotenv();
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::defaults())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Built-in defaults.
    pub fn defaults() -> Self {
        Self {
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            split_char: None,
            split_char_only: false,
            extraction_format: ExtractionFormat::Delimited,
            entity_types: DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect(),
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_gleaning_rounds: DEFAULT_GLEANING_ROUNDS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delimiters: DelimiterSet::default(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.2,
            llm_max_tokens: 4096,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            top_k: DEFAULT_TOP_K,
            rrf_k: crate::fusion::DEFAULT_RRF_K,
            vector_weight: 1.0,
            graph_weight: 1.0,
            keyword_weight: 1.0,
        }
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, fallback: &str) -> String {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
                return fallback.to_string();
            }
        }
        value.unwrap_or_else(|| fallback.to_string())
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        let chunking = yaml.chunking.unwrap_or_default();
        let extraction = yaml.extraction.unwrap_or_default();
        let llm = yaml.llm.unwrap_or_default();
        let embedding = yaml.embedding.unwrap_or_default();
        let retrieval = yaml.retrieval.unwrap_or_default();

        let defaults = Self::defaults();
        let format = match extraction.format.as_deref() {
            Some("structured") => ExtractionFormat::Structured,
            Some("delimited") | None => ExtractionFormat::Delimited,
            Some(other) => {
                return Err(format!("Unknown extraction format: {}", other));
            }
        };

        Ok(Self {
            max_chunk_tokens: chunking.max_tokens.unwrap_or(defaults.max_chunk_tokens),
            overlap_tokens: chunking.overlap_tokens.unwrap_or(defaults.overlap_tokens),
            split_char: chunking.split_char.and_then(|s| s.chars().next()),
            split_char_only: chunking.split_char_only.unwrap_or(false),
            extraction_format: format,
            entity_types: extraction.entity_types.unwrap_or(defaults.entity_types),
            max_name_len: extraction.max_name_len.unwrap_or(defaults.max_name_len),
            max_gleaning_rounds: extraction
                .max_gleaning_rounds
                .unwrap_or(defaults.max_gleaning_rounds),
            max_concurrency: extraction
                .max_concurrency
                .unwrap_or(defaults.max_concurrency)
                .max(1),
            delimiters: DelimiterSet {
                tuple: extraction
                    .tuple_delimiter
                    .unwrap_or(defaults.delimiters.tuple),
                record: extraction
                    .record_delimiter
                    .unwrap_or(defaults.delimiters.record),
                completion: extraction
                    .completion_delimiter
                    .unwrap_or(defaults.delimiters.completion),
            },
            llm_model: Self::resolve_env_string(llm.model, &defaults.llm_model),
            llm_temperature: llm.temperature.unwrap_or(defaults.llm_temperature),
            llm_max_tokens: llm.max_tokens.unwrap_or(defaults.llm_max_tokens),
            embedding_model: Self::resolve_env_string(embedding.model, &defaults.embedding_model),
            embedding_dim: embedding.dimension.unwrap_or(defaults.embedding_dim),
            top_k: retrieval.top_k.unwrap_or(defaults.top_k).max(1),
            rrf_k: retrieval.rrf_k.unwrap_or(defaults.rrf_k),
            vector_weight: retrieval.vector_weight.unwrap_or(1.0),
            graph_weight: retrieval.graph_weight.unwrap_or(1.0),
            keyword_weight: retrieval.keyword_weight.unwrap_or(1.0),
        })
    }

    /// Comma-joined entity types, as substituted into the extraction prompt.
    pub fn entity_types_joined(&self) -> String {
        self.entity_types.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::defaults();
        assert_eq!(config.max_chunk_tokens, DEFAULT_MAX_CHUNK_TOKENS);
        assert!(config.overlap_tokens < config.max_chunk_tokens);
        assert_eq!(config.extraction_format, ExtractionFormat::Delimited);
        assert_eq!(config.delimiters.tuple, "<|>");
        assert!(config.rrf_k > 0.0);
        assert!(config.max_concurrency >= 1);
    }

    #[test]
    fn new_without_file_falls_back_to_defaults() {
        let config = Config::new();
        assert!(!config.entity_types.is_empty());
        assert!(config.top_k >= 1);
    }

    #[test]
    fn load_from_file_overrides_selected_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
chunking:
  max_tokens: 500
  overlap_tokens: 50
extraction:
  format: structured
  entity_types: [person, place]
  max_name_len: 32
retrieval:
  top_k: 5
  rrf_k: 10.0
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_chunk_tokens, 500);
        assert_eq!(config.overlap_tokens, 50);
        assert_eq!(config.extraction_format, ExtractionFormat::Structured);
        assert_eq!(config.entity_types, vec!["person", "place"]);
        assert_eq!(config.max_name_len, 32);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.rrf_k, 10.0);
        // Untouched sections keep defaults.
        assert_eq!(config.llm_temperature, 0.2);
        assert_eq!(config.delimiters.record, "##");
    }

    #[test]
    fn unknown_format_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "extraction:\n  format: csv").unwrap();
        assert!(Config::load_from_file(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load_from_file("no_such_config_12345.yml").is_err());
    }

    #[test]
    fn split_char_takes_first_character() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunking:\n  split_char: \"\\n\"").unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.split_char, Some('\n'));
    }

    #[test]
    fn env_placeholder_is_resolved() {
        std::env::set_var("GRAPH_RAG_TEST_MODEL", "custom-model");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "llm:\n  model: ${{GRAPH_RAG_TEST_MODEL}}").unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.llm_model, "custom-model");
        std::env::remove_var("GRAPH_RAG_TEST_MODEL");
    }

    #[test]
    fn unset_env_placeholder_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "llm:\n  model: ${{GRAPH_RAG_UNSET_VAR_XYZ}}").unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.llm_model, "gpt-4o-mini");
    }

    #[test]
    fn entity_types_joined_for_prompt() {
        let config = Config::defaults();
        let joined = config.entity_types_joined();
        assert!(joined.contains("person, organization"));
    }
}
