//! Query orchestration: retrieve → rerank → synthesize.
//!
//! [`Pipeline`] holds the fully constructed query-time components.
//! [`Orchestrator`] wraps it in an explicit lifecycle: it starts
//! `Uninitialized`, becomes `Ready` once a pipeline is installed, and
//! rejects queries with [`Error::NotReady`] until then.
//!
//! Every accepted query produces a well-formed [`Answer`]. Only an invalid
//! question or an uninitialized orchestrator is reported as `Err`; component
//! failures become an `error`-status answer whose metadata names the error
//! class and nothing else. Nothing is retried.

use anyhow::Context;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::Error;
use crate::generation::create_generator;
use crate::index::VectorIndex;
use crate::models::{Answer, ChatMessage, Query, RetrievalResult};
use crate::rerank::{create_reranker, Reranker};
use crate::response::truncate_chars;
use crate::retrieve::Retriever;
use crate::synthesize::{error_answer, AnswerSynthesizer};

/// Query-time components, immutable once built.
pub struct Pipeline {
    retriever: Retriever,
    reranker: Arc<dyn Reranker>,
    synthesizer: AnswerSynthesizer,
    k_retrieve: usize,
    k_final: usize,
}

impl Pipeline {
    pub fn new(
        retriever: Retriever,
        reranker: Arc<dyn Reranker>,
        synthesizer: AnswerSynthesizer,
        k_retrieve: usize,
        k_final: usize,
    ) -> Self {
        let k_final = k_final.max(1);
        Self {
            retriever,
            reranker,
            synthesizer,
            k_retrieve: k_retrieve.max(k_final),
            k_final,
        }
    }

    /// Load the index snapshot and construct every backend named in `config`.
    ///
    /// Model loading happens on a blocking thread.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let index = VectorIndex::load(&config.index.path).with_context(|| {
            format!(
                "Failed to load index {} (run `haleai ingest` first)",
                config.index.path.display()
            )
        })?;
        tracing::info!(
            path = %config.index.path.display(),
            chunks = index.len(),
            model = %index.model(),
            "index loaded"
        );

        let embedding = config.embedding.clone();
        let reranking = config.reranking.clone();
        let generation = config.generation.clone();
        let (embedder, reranker, generator) = tokio::task::spawn_blocking(move || {
            anyhow::Ok((
                create_embedder(&embedding)?,
                create_reranker(&reranking)?,
                create_generator(&generation)?,
            ))
        })
        .await??;

        let retriever = Retriever::new(embedder, Arc::new(index))?;
        Ok(Self::new(
            retriever,
            reranker,
            AnswerSynthesizer::new(generator),
            config.retrieval.k_retrieve,
            config.retrieval.k_final,
        ))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn k_retrieve(&self) -> usize {
        self.k_retrieve
    }

    pub fn k_final(&self) -> usize {
        self.k_final
    }

    /// Retrieve `k_retrieve` candidates and narrow them to `k_final`,
    /// reranking first when asked. Returns the context and the number of
    /// candidates retrieved.
    pub async fn select(
        &self,
        query: &Query,
        use_reranking: bool,
    ) -> Result<(RetrievalResult, usize), Error> {
        let mut candidates = self.retriever.retrieve(query, self.k_retrieve).await?;
        let retrieved = candidates.len();

        if use_reranking && !candidates.is_empty() {
            candidates = self
                .reranker
                .rerank(query, candidates, self.k_final)
                .await?;
        } else {
            candidates.truncate(self.k_final);
        }
        Ok((candidates, retrieved))
    }

    /// Run one query to completion. Always returns an answer.
    pub async fn run(&self, query: &Query, use_reranking: bool) -> Answer {
        let started = Instant::now();

        let mut answer = match self.select(query, use_reranking).await {
            Ok((context, retrieved)) => {
                let mut answer = self.synthesizer.synthesize(query, &context).await;
                answer
                    .metadata
                    .insert("num_retrieved".to_string(), Value::from(retrieved));
                answer
            }
            Err(err) => {
                tracing::warn!(error = %err, "query pipeline failed before synthesis");
                error_answer(&err, Vec::new())
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        let metadata = &mut answer.metadata;
        metadata.insert(
            "processing_time".to_string(),
            Value::from(format!("{:.2}s", elapsed)),
        );
        metadata.insert("reranked".to_string(), Value::from(use_reranking));
        metadata.insert(
            "model".to_string(),
            Value::from(self.synthesizer.model_name()),
        );
        if use_reranking {
            metadata.insert("reranker".to_string(), Value::from(self.reranker.name()));
        }

        tracing::info!(
            status = %answer.status,
            sources = answer.num_sources(),
            elapsed_secs = elapsed,
            "query answered"
        );
        answer
    }
}

enum OrchestratorState {
    Uninitialized { startup_error: Option<String> },
    Ready(Arc<Pipeline>),
}

/// Lifecycle wrapper shared by every request handler.
pub struct Orchestrator {
    state: RwLock<OrchestratorState>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// A new orchestrator in the `Uninitialized` state.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(OrchestratorState::Uninitialized {
                startup_error: None,
            }),
        }
    }

    /// An orchestrator that is `Ready` from the start.
    pub fn ready(pipeline: Pipeline) -> Self {
        Self {
            state: RwLock::new(OrchestratorState::Ready(Arc::new(pipeline))),
        }
    }

    /// Install the pipeline and start accepting queries.
    pub fn initialize(&self, pipeline: Pipeline) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = OrchestratorState::Ready(Arc::new(pipeline));
    }

    /// Record why initialization failed. Queries keep being rejected.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = OrchestratorState::Uninitialized {
            startup_error: Some(reason.into()),
        };
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(|e| e.into_inner()),
            OrchestratorState::Ready(_)
        )
    }

    pub fn startup_error(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            OrchestratorState::Uninitialized { startup_error } => startup_error.clone(),
            OrchestratorState::Ready(_) => None,
        }
    }

    fn pipeline(&self) -> Result<Arc<Pipeline>, Error> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            OrchestratorState::Ready(pipeline) => Ok(Arc::clone(pipeline)),
            OrchestratorState::Uninitialized { startup_error } => {
                Err(Error::NotReady(startup_error.clone()))
            }
        }
    }

    /// Answer one question.
    ///
    /// Fails only with `NotReady` or `InvalidInput`; a blank question never
    /// reaches the retriever.
    pub async fn answer_query(
        &self,
        question: &str,
        history: Vec<ChatMessage>,
        use_reranking: bool,
    ) -> Result<Answer, Error> {
        let pipeline = self.pipeline()?;

        let question = question.trim();
        if question.is_empty() {
            return Err(Error::invalid_input("question must not be empty"));
        }

        let (preview, truncated) = truncate_chars(question, 100);
        tracing::info!(
            question = %format!("{}{}", preview, if truncated { "..." } else { "" }),
            history = history.len(),
            use_reranking,
            "processing query"
        );

        let query = Query::new(question, history);
        Ok(pipeline.run(&query, use_reranking).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashedEmbedder};
    use crate::error::GenerationError;
    use crate::generation::Generator;
    use crate::index::Metric;
    use crate::models::{AnswerStatus, Chunk, EmbeddedChunk};
    use crate::rerank::LexicalReranker;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl Generator for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
            Ok("Insulin.".to_string())
        }
    }

    fn pipeline(texts: &[(&str, u32)]) -> Pipeline {
        let embedder = Arc::new(HashedEmbedder::new(128));
        let mut index = VectorIndex::new(embedder.model_name(), 128, Metric::Cosine);
        index
            .add(
                texts
                    .iter()
                    .map(|(text, page)| EmbeddedChunk {
                        chunk: Chunk {
                            text: text.to_string(),
                            page: *page,
                            source: "Medical_book.pdf".to_string(),
                        },
                        vector: embedder.embed_text(text),
                    })
                    .collect(),
            )
            .unwrap();
        Pipeline::new(
            Retriever::new(embedder, Arc::new(index)).unwrap(),
            Arc::new(LexicalReranker),
            AnswerSynthesizer::new(Arc::new(Fixed)),
            10,
            2,
        )
    }

    #[tokio::test]
    async fn test_uninitialized_rejects_queries() {
        let orchestrator = Orchestrator::new();
        assert!(!orchestrator.is_ready());
        let err = orchestrator
            .answer_query("What is asthma?", vec![], true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady(None)));

        orchestrator.fail("index missing");
        assert_eq!(orchestrator.startup_error().as_deref(), Some("index missing"));
        let err = orchestrator
            .answer_query("What is asthma?", vec![], true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("index missing"));
    }

    #[tokio::test]
    async fn test_initialize_transitions_to_ready() {
        let orchestrator = Orchestrator::new();
        orchestrator.initialize(pipeline(&[("Insulin regulates blood sugar.", 2)]));
        assert!(orchestrator.is_ready());
        assert!(orchestrator.startup_error().is_none());

        let answer = orchestrator
            .answer_query("What regulates blood sugar?", vec![], true)
            .await
            .unwrap();
        assert_eq!(answer.status, AnswerStatus::Success);
        assert_eq!(answer.sources[0].page, 2);
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let orchestrator = Orchestrator::ready(pipeline(&[("text", 1)]));
        for q in ["", "   ", "\n\t"] {
            let err = orchestrator.answer_query(q, vec![], false).await.unwrap_err();
            assert_eq!(err.class(), "InvalidInput");
        }
    }

    #[tokio::test]
    async fn test_metadata_fields() {
        let orchestrator = Orchestrator::ready(pipeline(&[
            ("Insulin regulates blood sugar.", 2),
            ("Asthma narrows airways.", 3),
            ("Gout inflames joints.", 4),
        ]));
        let answer = orchestrator
            .answer_query("What regulates blood sugar?", vec![], false)
            .await
            .unwrap();
        let time = answer.metadata["processing_time"].as_str().unwrap();
        assert!(time.ends_with('s'));
        assert!(time.trim_end_matches('s').parse::<f64>().is_ok());
        assert_eq!(answer.metadata["num_retrieved"], 3);
        assert_eq!(answer.metadata["reranked"], false);
        assert_eq!(answer.metadata["model"], "fixed");
        assert_eq!(answer.num_sources(), 2);
    }

    #[tokio::test]
    async fn test_select_without_rerank_truncates_retrieval() {
        let p = pipeline(&[
            ("blood pressure", 1),
            ("blood sugar", 2),
            ("sugar intake", 3),
            ("bone density", 4),
        ]);
        let query = Query::new("blood sugar levels", vec![]);
        let raw = p.retriever().retrieve(&query, p.k_retrieve()).await.unwrap();
        let (selected, retrieved) = p.select(&query, false).await.unwrap();
        assert_eq!(retrieved, raw.len());
        assert_eq!(selected, raw[..p.k_final()].to_vec());
    }
}
