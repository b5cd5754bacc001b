//! In-memory vector index with a JSON snapshot on disk.
//!
//! Brute-force nearest-neighbour search over every stored vector. The index
//! is built once by ingestion, persisted with [`VectorIndex::save`], and
//! loaded read-only by the query pipeline, where it is shared behind an
//! `Arc` without locking.
//!
//! Search results are ordered by descending score. Equal scores keep
//! insertion order, so the same query against the same index always yields
//! the same result.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::{cosine_similarity, dot_product, Embedder};
use crate::error::IndexError;
use crate::models::{EmbeddedChunk, RetrievalResult, ScoredChunk};

/// Similarity measure used for search. Higher is always more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    /// Raw dot product. Equivalent to cosine when vectors are normalized.
    InnerProduct,
}

impl Metric {
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::InnerProduct => dot_product(a, b),
        }
    }
}

/// Embedded chunks plus the identity of the model that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    metric: Metric,
    model: String,
    dims: usize,
    entries: Vec<EmbeddedChunk>,
}

impl VectorIndex {
    pub fn new(model: impl Into<String>, dims: usize, metric: Metric) -> Self {
        Self {
            metric,
            model: model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append embedded chunks. Every vector must have the index dimension
    /// and finite components; nothing is added if any of them does not.
    pub fn add(&mut self, items: Vec<EmbeddedChunk>) -> Result<(), IndexError> {
        for item in &items {
            self.check_vector(&item.vector)?;
        }
        self.entries.extend(items);
        Ok(())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFinite);
        }
        Ok(())
    }

    /// Return up to `k` chunks most similar to `query`.
    ///
    /// Fewer than `k` are returned when the index holds fewer chunks. An
    /// empty index yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult, IndexError> {
        self.check_vector(query)?;
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, self.metric.score(query, &entry.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Fail unless `embedder` produces vectors this index can be searched with.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<(), IndexError> {
        if embedder.dims() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: embedder.dims(),
            });
        }
        if embedder.model_name() != self.model {
            return Err(IndexError::ModelMismatch {
                index: self.model.clone(),
                embedder: embedder.model_name().to_string(),
            });
        }
        Ok(())
    }

    /// Write the snapshot to `path`, replacing any previous one.
    ///
    /// The snapshot is written to a sibling temp file and renamed into place,
    /// so a crashed ingest never leaves a truncated index behind.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path)?;
        let index: VectorIndex = serde_json::from_slice(&bytes)?;
        for entry in &index.entries {
            index.check_vector(&entry.vector)?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use crate::models::Chunk;

    fn entry(text: &str, page: u32, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                text: text.to_string(),
                page,
                source: "Medical_book.pdf".to_string(),
            },
            vector,
        }
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new("test-model", 3, Metric::Cosine);
        index
            .add(vec![
                entry("north", 1, vec![0.0, 1.0, 0.0]),
                entry("east", 2, vec![1.0, 0.0, 0.0]),
                entry("north-east", 3, vec![0.7, 0.7, 0.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.1, 0.0], 3).unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east", "north"]);
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 1.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 1.0, 0.0], 10).unwrap().len(), 3);
        assert!(index.search(&[0.0, 1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new("test-model", 3, Metric::Cosine);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new("test-model", 2, Metric::Cosine);
        index
            .add(vec![
                entry("first", 1, vec![1.0, 0.0]),
                entry("second", 2, vec![1.0, 0.0]),
                entry("third", 3, vec![1.0, 0.0]),
            ])
            .unwrap();
        let results = index.search(&[1.0, 0.0], 3).unwrap();
        let pages: Vec<u32> = results.iter().map(|r| r.chunk.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn test_inner_product_metric() {
        let mut index = VectorIndex::new("test-model", 2, Metric::InnerProduct);
        index
            .add(vec![
                entry("small", 1, vec![1.0, 0.0]),
                entry("large", 2, vec![3.0, 0.0]),
            ])
            .unwrap();
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].chunk.text, "large");
        assert!((results[0].score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = sample_index();
        let err = index.add(vec![entry("bad", 9, vec![1.0, 2.0])]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, got: 2 }
        ));
        assert_eq!(index.len(), 3);
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_non_finite_vectors_rejected() {
        let mut index = sample_index();
        let err = index
            .add(vec![
                entry("fine", 4, vec![0.0, 0.0, 1.0]),
                entry("nan", 5, vec![f32::NAN, 0.0, 0.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::NonFinite));
        assert_eq!(index.len(), 3);

        assert!(matches!(
            index.search(&[f32::INFINITY, 0.0, 0.0], 3),
            Err(IndexError::NonFinite)
        ));
    }

    #[test]
    fn test_scores_are_non_increasing() {
        let mut index = VectorIndex::new("test-model", 2, Metric::InnerProduct);
        index
            .add(vec![
                entry("a", 1, vec![-1.0, 0.0]),
                entry("b", 2, vec![0.0, 0.0]),
                entry("c", 3, vec![2.0, 0.5]),
                entry("d", 4, vec![-0.0, 1.0]),
                entry("e", 5, vec![0.5, -3.0]),
            ])
            .unwrap();
        let results = index.search(&[1.0, 1.0], 5).unwrap();
        assert_eq!(results.len(), 5);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.json");
        let index = sample_index();
        index.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.model(), "test-model");
        assert_eq!(loaded.metric(), Metric::Cosine);
        let a = index.search(&[0.2, 0.9, 0.0], 3).unwrap();
        let b = loaded.search(&[0.2, 0.9, 0.0], 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = VectorIndex::load(&tmp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_ensure_compatible() {
        let embedder = HashedEmbedder::new(16);
        let index = VectorIndex::new(embedder.model_name(), 16, Metric::Cosine);
        assert!(index.ensure_compatible(&embedder).is_ok());

        let wrong_dims = VectorIndex::new(embedder.model_name(), 32, Metric::Cosine);
        assert!(matches!(
            wrong_dims.ensure_compatible(&embedder),
            Err(IndexError::DimensionMismatch { .. })
        ));

        let wrong_model = VectorIndex::new("other-model", 16, Metric::Cosine);
        assert!(matches!(
            wrong_model.ensure_compatible(&embedder),
            Err(IndexError::ModelMismatch { .. })
        ));
    }
}
