//! Dense retrieval: embed the question, search the index.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::Error;
use crate::index::VectorIndex;
use crate::models::{Query, RetrievalResult};

/// Pairs an embedder with the index it built, for query-time search.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    /// Fails with `ModelUnavailable` if `embedder` is not the one the index
    /// was built with.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>) -> Result<Self, Error> {
        index.ensure_compatible(embedder.as_ref())?;
        Ok(Self { embedder, index })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Return up to `k` chunks for the query's question, best first.
    ///
    /// Only the question is embedded; history does not influence retrieval.
    /// An empty index yields an empty result without calling the embedder.
    pub async fn retrieve(&self, query: &Query, k: usize) -> Result<RetrievalResult, Error> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(&query.question).await?;
        Ok(self.index.search(&vector, k)?)
    }
}
