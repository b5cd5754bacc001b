//! Second-stage relevance scoring of retrieved candidates.
//!
//! A [`Reranker`] reorders a candidate list against the question and keeps
//! the best `top_n`. It only reorders and truncates: every output chunk is
//! one of the inputs, and candidates with equal scores keep their retriever
//! order.
//!
//! - **[`LexicalReranker`]**: BM25 term weighting over the candidate set.
//!   No model, deterministic.
//! - **`CrossEncoderReranker`**: joint query/passage scoring with a fastembed
//!   cross-encoder (default build only).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::RerankingConfig;
use crate::error::RerankError;
use crate::models::{Query, RetrievalResult, ScoredChunk};

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Reorder `candidates` by relevance to `query`, keeping at most `top_n`.
    async fn rerank(
        &self,
        query: &Query,
        candidates: RetrievalResult,
        top_n: usize,
    ) -> Result<RetrievalResult, RerankError>;
}

/// Order by descending score; ties keep original position.
fn order_by_scores(candidates: RetrievalResult, scores: &[f32], top_n: usize) -> RetrievalResult {
    let mut ranked: Vec<(usize, f32, ScoredChunk)> = candidates
        .into_iter()
        .zip(scores.iter().copied())
        .enumerate()
        .map(|(i, (c, s))| (i, s, c))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked
        .into_iter()
        .take(top_n)
        .map(|(_, score, c)| ScoredChunk {
            chunk: c.chunk,
            score,
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ============ Lexical Reranker ============

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// BM25 scoring with IDF computed over the candidate set itself.
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn score(question: &str, passages: &[&str]) -> Vec<f32> {
        let query_terms: HashSet<String> = tokenize(question).into_iter().collect();
        let docs: Vec<Vec<String>> = passages.iter().map(|p| tokenize(p)).collect();
        if docs.is_empty() {
            return Vec::new();
        }

        let n = docs.len() as f32;
        let avg_len = (docs.iter().map(|d| d.len()).sum::<usize>() as f32 / n).max(1.0);

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in unique {
                if query_terms.contains(term) {
                    *doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }

        docs.iter()
            .map(|doc| {
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for term in doc {
                    if query_terms.contains(term.as_str()) {
                        *tf.entry(term.as_str()).or_insert(0) += 1;
                    }
                }
                let len_norm = 1.0 - BM25_B + BM25_B * doc.len() as f32 / avg_len;
                tf.iter()
                    .map(|(term, &count)| {
                        let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                        let count = count as f32;
                        idf * count * (BM25_K1 + 1.0) / (count + BM25_K1 * len_norm)
                    })
                    .sum()
            })
            .collect()
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn rerank(
        &self,
        query: &Query,
        candidates: RetrievalResult,
        top_n: usize,
    ) -> Result<RetrievalResult, RerankError> {
        let passages: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let scores = Self::score(&query.question, &passages);
        Ok(order_by_scores(candidates, &scores, top_n))
    }
}

// ============ Cross-Encoder Reranker ============

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
        other => bail!(
            "Unknown reranker model: '{}'. Supported models: \
             bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
            other
        ),
    }
}

/// Cross-encoder reranker on fastembed. Loads the model at construction.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct CrossEncoderReranker {
    model_name: String,
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl CrossEncoderReranker {
    pub fn new(config: &RerankingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-reranker-base".to_string());
        let model = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(config_to_reranker_model(&model_name)?)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize reranker model: {}", e))?;

        tracing::info!(model = %model_name, "cross-encoder reranker loaded");

        Ok(Self {
            model_name,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn rerank(
        &self,
        query: &Query,
        candidates: RetrievalResult,
        top_n: usize,
    ) -> Result<RetrievalResult, RerankError> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let model = Arc::clone(&self.model);
        let question = query.question.clone();
        let passages: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let count = passages.len();

        let results = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RerankError::Backend("reranker lock poisoned".into()))?;
            model
                .rerank(question, passages, false, None)
                .map_err(|e| RerankError::Backend(format!("cross-encoder failed: {}", e)))
        })
        .await
        .map_err(|e| RerankError::Backend(format!("rerank task failed: {}", e)))??;

        let mut scores = vec![f32::NEG_INFINITY; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(order_by_scores(candidates, &scores, top_n))
    }
}

/// Create the configured [`Reranker`].
///
/// Cross-encoder models load synchronously; call this from a blocking context.
pub fn create_reranker(config: &RerankingConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "lexical" => Ok(Arc::new(LexicalReranker)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "cross-encoder" => Ok(Arc::new(CrossEncoderReranker::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "cross-encoder" => bail!(
            "Cross-encoder reranker requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown reranking provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn candidate(text: &str, page: u32, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                page,
                source: "Medical_book.pdf".to_string(),
            },
            score,
        }
    }

    #[tokio::test]
    async fn test_lexical_promotes_matching_passage() {
        let candidates = vec![
            candidate("The heart pumps blood.", 1, 0.9),
            candidate("Migraines cause headaches.", 2, 0.8),
            candidate("Insulin lowers blood sugar after meals.", 3, 0.7),
        ];
        let query = Query::new("How does insulin affect blood sugar?", vec![]);
        let ranked = LexicalReranker.rerank(&query, candidates, 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.page, 3);
    }

    #[tokio::test]
    async fn test_rerank_output_is_subset_of_input() {
        let candidates = vec![
            candidate("alpha beta", 1, 0.5),
            candidate("gamma delta", 2, 0.4),
            candidate("beta gamma", 3, 0.3),
        ];
        let inputs: Vec<Chunk> = candidates.iter().map(|c| c.chunk.clone()).collect();
        let query = Query::new("beta", vec![]);
        let ranked = LexicalReranker.rerank(&query, candidates, 3).await.unwrap();
        assert_eq!(ranked.len(), 3);
        for r in &ranked {
            assert!(inputs.contains(&r.chunk));
        }
    }

    #[tokio::test]
    async fn test_ties_keep_retriever_order() {
        let candidates = vec![
            candidate("unrelated one", 1, 0.9),
            candidate("unrelated two", 2, 0.8),
            candidate("unrelated three", 3, 0.7),
        ];
        let query = Query::new("cardiology", vec![]);
        let ranked = LexicalReranker.rerank(&query, candidates, 3).await.unwrap();
        let pages: Vec<u32> = ranked.iter().map(|r| r.chunk.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rerank_empty_candidates() {
        let ranked = LexicalReranker
            .rerank(&Query::new("anything", vec![]), vec![], 4)
            .await
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let scores = LexicalReranker::score(
            "blood anemia",
            &["blood blood pressure", "anemia is low hemoglobin", "blood cells"],
        );
        assert!(scores[1] > scores[2]);
    }

    #[test]
    fn test_create_reranker() {
        let lexical = create_reranker(&RerankingConfig::default()).unwrap();
        assert_eq!(lexical.name(), "lexical");
        assert!(create_reranker(&RerankingConfig {
            provider: "colbert".to_string(),
            model: None,
        })
        .is_err());
    }
}
