//! Embedding backends.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`FastEmbedder`]**: local ONNX inference via fastembed (default build).
//! - **`TractEmbedder`**: pure-Rust local inference via tract, for platforms
//!   without a bundled ONNX Runtime (`--features local-embeddings-tract`).
//! - **[`OllamaEmbedder`]**: calls a running Ollama instance's `/api/embed`.
//! - **[`HashedEmbedder`]**: deterministic feature hashing. Needs no model
//!   download; used for tests and offline smoke runs.
//!
//! Every backend returns exactly one vector per input with the advertised
//! dimension, or an error. Nothing ever substitutes placeholder vectors for
//! a failed call, since a zero vector would silently poison retrieval.
//!
//! The same embedder must be used at ingestion and at query time. The index
//! snapshot records [`Embedder::model_name`] and [`Embedder::dims`] and
//! refuses to serve queries from a different one.
//!
//! # Backend Selection
//!
//! ```rust
//! # use haleai::config::EmbeddingConfig;
//! # use haleai::embedding::{create_embedder, Embedder};
//! let config = EmbeddingConfig {
//!     provider: "hashed".to_string(),
//!     dims: Some(128),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 128);
//! ```

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index snapshot.
    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }
}

/// Reject backend output that does not have one `dims`-sized vector per input.
fn check_vectors(
    expected: usize,
    dims: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbedError::DimensionMismatch {
            expected: dims,
            got: bad.len(),
        });
    }
    Ok(vectors)
}

// ============ Hashed Embedder ============

const DEFAULT_HASHED_DIMS: usize = 256;

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Texts are lowercased and split into alphanumeric tokens; each token adds
/// one to the bucket chosen by its SHA-256 digest. The result is
/// L2-normalized, so cosine similarity reflects shared vocabulary.
pub struct HashedEmbedder {
    model_name: String,
    dims: usize,
}

impl HashedEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            model_name: format!("hashed-{}", dims),
            dims,
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            vector[idx] += 1.0;
        }
        normalize_l2(vector)
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ Ollama Embedder ============

/// Embedder backed by a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires an embedding model to be pulled
/// (e.g. `ollama pull nomic-embed-text`). Failures are returned to the
/// caller as-is; there is no retry loop at this layer.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbedError::Unavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Backend(format!("Invalid Ollama response: {}", e)))?;
        let vectors = parse_ollama_response(&json)?;
        check_vectors(texts.len(), self.dims, vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Backend("Invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let values = embedding.as_array().ok_or_else(|| {
            EmbedError::Backend("Invalid Ollama response: embedding is not an array".into())
        })?;
        let vec = values
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    EmbedError::Backend("Invalid Ollama response: non-numeric value".into())
                })
            })
            .collect::<Result<Vec<f32>, EmbedError>>()?;
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Embedders (fastembed or tract) ============

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Resolve the configured local model name and its output dimension.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Local sentence embedder running on fastembed's bundled ONNX Runtime.
///
/// The model is downloaded from Hugging Face on first construction and
/// cached; afterwards embedding runs offline. Construction blocks while the
/// model loads, so call [`FastEmbedder::new`] off the async runtime.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        tracing::info!(model = %model_name, dims, "local embedding model loaded");

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Backend("embedding model lock poisoned".into()))?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| EmbedError::Backend(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbedError::Backend(format!("embedding task failed: {}", e)))??;

        check_vectors(texts.len(), self.dims, vectors)
    }
}

/// Local sentence embedder running on tract (pure Rust, no ONNX Runtime).
///
/// The encoder is compiled once at construction and shared by every call.
#[cfg(feature = "local-embeddings-tract")]
pub struct TractEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<local_tract::TractModel>>,
}

#[cfg(feature = "local-embeddings-tract")]
impl TractEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, _) = resolve_local_model(config);
        let model = local_tract::TractModel::load(&model_name)?;
        Ok(Self {
            model_name,
            dims: model.dims(),
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-tract")]
#[async_trait]
impl Embedder for TractEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let model = model
                .lock()
                .map_err(|_| EmbedError::Backend("tract model lock poisoned".into()))?;
            model
                .embed(&inputs, batch_size)
                .map_err(|e| EmbedError::Backend(format!("Local embedding failed: {:#}", e)))
        })
        .await
        .map_err(|e| EmbedError::Backend(format!("embedding task failed: {}", e)))??;

        check_vectors(texts.len(), self.dims, vectors)
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | [`FastEmbedder`], or `TractEmbedder` in tract-only builds |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hashed"` | [`HashedEmbedder`] |
///
/// Local models load synchronously; call this from a blocking context.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHED_DIMS),
        ))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(FastEmbedder::new(config)?)),
        #[cfg(all(
            feature = "local-embeddings-tract",
            not(feature = "local-embeddings-fastembed")
        ))]
        "local" => Ok(Arc::new(TractEmbedder::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

pub(crate) fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Dot product of two vectors. Returns `0.0` when lengths differ.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` for empty vectors,
/// zero vectors, or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
