//! TOML configuration.
//!
//! Every knob the pipeline consumes as a fixed input (chunk granularity,
//! embedding model, candidate counts, model endpoints) lives here. Values
//! are validated once at load time; the rest of the crate treats them as
//! constants.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::index::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_pdf_name")]
    pub pdf_name: String,
    /// Source label stamped on every chunk. Defaults to `pdf_name`.
    #[serde(default)]
    pub source_label: Option<String>,
}

impl CorpusConfig {
    pub fn pdf_path(&self) -> PathBuf {
        self.data_dir.join(&self.pdf_name)
    }

    pub fn source_label(&self) -> &str {
        self.source_label.as_deref().unwrap_or(&self.pdf_name)
    }
}

fn default_pdf_name() -> String {
    "Medical_book.pdf".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "? ", "! "]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP client timeout. Unset means no timeout at this layer.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            url: None,
            timeout_secs: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Snapshot file written by `ingest` and loaded by `serve`/`ask`.
    pub path: PathBuf,
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_retrieve")]
    pub k_retrieve: usize,
    #[serde(default = "default_k_final")]
    pub k_final: usize,
    /// Used when a request does not say whether to rerank.
    #[serde(default = "default_use_reranking")]
    pub use_reranking: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_retrieve: default_k_retrieve(),
            k_final: default_k_final(),
            use_reranking: default_use_reranking(),
        }
    }
}

fn default_k_retrieve() -> usize {
    10
}
fn default_k_final() -> usize {
    4
}
fn default_use_reranking() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankingConfig {
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: None,
        }
    }
}

fn default_rerank_provider() -> String {
    "lexical".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: None,
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "llama3.1".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field invariants that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.chunking.separators.iter().any(|s| s.is_empty()) {
        anyhow::bail!("chunking.separators must not contain empty strings");
    }

    // Validate retrieval
    if config.retrieval.k_final < 1 {
        anyhow::bail!("retrieval.k_final must be >= 1");
    }
    if config.retrieval.k_retrieve < config.retrieval.k_final {
        anyhow::bail!("retrieval.k_retrieve must be >= retrieval.k_final");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "local" | "hashed" => {}
        "ollama" => {
            if config.embedding.model.is_none() || config.embedding.dims.is_none() {
                anyhow::bail!("embedding.model and embedding.dims must be set for provider 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, or hashed.",
            other
        ),
    }

    match config.reranking.provider.as_str() {
        "lexical" | "cross-encoder" => {}
        other => anyhow::bail!(
            "Unknown reranking provider: '{}'. Must be lexical or cross-encoder.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
