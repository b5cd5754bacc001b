//! End-to-end query pipeline tests.
//!
//! Builds real indexes with the hashed embedder (no model download), saves
//! and reloads them through the snapshot format, and drives the
//! orchestrator with scripted generators.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use haleai::chunk::Chunker;
use haleai::embedding::{Embedder, HashedEmbedder};
use haleai::error::{EmbedError, Error, GenerationError};
use haleai::generation::Generator;
use haleai::index::{Metric, VectorIndex};
use haleai::ingest::ingest_pages;
use haleai::models::{AnswerStatus, ChatMessage, PageText, Query};
use haleai::pipeline::{Orchestrator, Pipeline};
use haleai::rerank::LexicalReranker;
use haleai::retrieve::Retriever;
use haleai::synthesize::AnswerSynthesizer;

// ─── Test doubles ───────────────────────────────────────────────────

/// Replies with a fixed answer and records what it was sent.
struct Scripted {
    reply: String,
    calls: AtomicUsize,
    last_prompt: std::sync::Mutex<Vec<ChatMessage>>,
}

impl Scripted {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            last_prompt: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = messages.to_vec();
        Ok(self.reply.clone())
    }
}

/// Always fails with backend detail that must never reach a caller.
struct Failing;

#[async_trait]
impl Generator for Failing {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable(
            "connection refused: http://internal-gpu-3:11434/api/chat".to_string(),
        ))
    }
}

/// Hashed embedder that counts how often it is asked to embed.
struct CountingEmbedder {
    inner: HashedEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

const DIMS: usize = 256;

fn two_page_book() -> Vec<PageText> {
    vec![
        PageText::new(1, "Diabetes is a chronic condition.", "Medical_book.pdf"),
        PageText::new(2, "Insulin regulates blood sugar.", "Medical_book.pdf"),
    ]
}

fn larger_book() -> Vec<PageText> {
    vec![
        PageText::new(
            1,
            "Asthma is a chronic disease of the airways.\n\nTriggers include pollen, smoke and cold air.",
            "Medical_book.pdf",
        ),
        PageText::new(
            2,
            "Insulin is a hormone made by the pancreas.\n\nInsulin regulates blood sugar by helping cells absorb glucose.",
            "Medical_book.pdf",
        ),
        PageText::new(
            3,
            "Hypertension means high blood pressure.\n\nReducing salt intake lowers blood pressure.",
            "Medical_book.pdf",
        ),
        PageText::new(4, "Fractures heal over several weeks.", "Medical_book.pdf"),
    ]
}

/// Ingest `pages`, round-trip the snapshot through disk, and return the loaded index.
async fn build_index(tmp: &TempDir, pages: &[PageText]) -> (Arc<HashedEmbedder>, Arc<VectorIndex>) {
    let embedder = Arc::new(HashedEmbedder::new(DIMS));
    let chunker = Chunker::new(80, 10, &["\n\n", "\n", ". ", "? ", "! "]);
    let index = ingest_pages(pages, &chunker, embedder.as_ref(), Metric::Cosine, 8)
        .await
        .unwrap();

    let path = tmp.path().join("index.json");
    index.save(&path).unwrap();
    let loaded = VectorIndex::load(&path).unwrap();
    (embedder, Arc::new(loaded))
}

fn pipeline(
    embedder: Arc<HashedEmbedder>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn Generator>,
    k_retrieve: usize,
    k_final: usize,
) -> Pipeline {
    Pipeline::new(
        Retriever::new(embedder, index).unwrap(),
        Arc::new(LexicalReranker),
        AnswerSynthesizer::new(generator),
        k_retrieve,
        k_final,
    )
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_page_document_top_result_is_page_two() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &two_page_book()).await;
    assert_eq!(index.len(), 2);

    let p = pipeline(embedder, index, Arc::new(Scripted::new("Insulin.")), 10, 4);
    let query = Query::new("What regulates blood sugar?", vec![]);
    let (context, _) = p.select(&query, false).await.unwrap();
    assert_eq!(context[0].chunk.page, 2);
    assert_eq!(context[0].chunk.text, "Insulin regulates blood sugar.");

    let answer = Orchestrator::ready(p)
        .answer_query("What regulates blood sugar?", vec![], false)
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Success);
    assert_eq!(answer.sources[0].page, 2);
}

#[tokio::test]
async fn test_empty_index_yields_no_context() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &[]).await;
    assert!(index.is_empty());

    let generator = Arc::new(Scripted::new("should not be called"));
    let orchestrator = Orchestrator::ready(pipeline(embedder, index, generator.clone(), 10, 4));

    for question in ["What is asthma?", "Anything at all"] {
        for rerank in [true, false] {
            let answer = orchestrator
                .answer_query(question, vec![], rerank)
                .await
                .unwrap();
            assert_eq!(answer.status, AnswerStatus::NoContext);
            assert!(answer.sources.is_empty());
            assert!(!answer.text.is_empty());
        }
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_questions_rejected_before_retrieval() {
    let tmp = TempDir::new().unwrap();
    let (_, index) = build_index(&tmp, &two_page_book()).await;
    let embedder = Arc::new(CountingEmbedder {
        inner: HashedEmbedder::new(DIMS),
        calls: AtomicUsize::new(0),
    });
    let generator = Arc::new(Scripted::new("unused"));
    let orchestrator = Orchestrator::ready(Pipeline::new(
        Retriever::new(embedder.clone(), index).unwrap(),
        Arc::new(LexicalReranker),
        AnswerSynthesizer::new(generator.clone()),
        10,
        4,
    ));

    for question in ["", "   ", "\n\t"] {
        let err = orchestrator
            .answer_query(question, vec![], true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    // A real question does reach the embedder.
    orchestrator
        .answer_query("What regulates blood sugar?", vec![], false)
        .await
        .unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_failure_is_sanitized_error_answer() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &larger_book()).await;
    let orchestrator = Orchestrator::ready(pipeline(embedder, index, Arc::new(Failing), 10, 3));

    let answer = orchestrator
        .answer_query("What regulates blood sugar?", vec![], true)
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Error);
    assert!(!answer.text.is_empty());
    assert_eq!(answer.metadata["error_class"], "ModelUnavailable");
    let dumped = serde_json::to_string(&answer.metadata).unwrap();
    assert!(!dumped.contains("internal-gpu-3"));
    assert!(!dumped.contains("connection refused"));
    assert!(!answer.text.contains("internal-gpu-3"));
}

#[tokio::test]
async fn test_disabling_rerank_keeps_retriever_order() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &larger_book()).await;
    let k_final = 3;
    let p = pipeline(
        embedder.clone(),
        index.clone(),
        Arc::new(Scripted::new("ok")),
        8,
        k_final,
    );

    let query = Query::new("How is blood pressure lowered?", vec![]);
    let raw = Retriever::new(embedder, index)
        .unwrap()
        .retrieve(&query, 8)
        .await
        .unwrap();
    let (selected, _) = p.select(&query, false).await.unwrap();

    let expected: Vec<_> = raw.into_iter().take(k_final).collect();
    assert_eq!(selected, expected);
}

#[tokio::test]
async fn test_rerank_returns_subset_of_retrieval() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &larger_book()).await;
    let p = pipeline(
        embedder.clone(),
        index.clone(),
        Arc::new(Scripted::new("ok")),
        6,
        2,
    );

    let query = Query::new("What does insulin regulate?", vec![]);
    let raw = Retriever::new(embedder, index)
        .unwrap()
        .retrieve(&query, 6)
        .await
        .unwrap();
    let (reranked, retrieved) = p.select(&query, true).await.unwrap();

    assert_eq!(retrieved, raw.len());
    assert_eq!(reranked.len(), 2);
    for r in &reranked {
        assert!(raw.iter().any(|c| c.chunk == r.chunk));
    }
    assert_eq!(reranked[0].chunk.page, 2);
}

#[tokio::test]
async fn test_history_reaches_prompt_but_not_sources() {
    let tmp = TempDir::new().unwrap();
    let (embedder, index) = build_index(&tmp, &larger_book()).await;
    let generator = Arc::new(Scripted::new("Insulin, made by the pancreas."));
    let orchestrator =
        Orchestrator::ready(pipeline(embedder, index, generator.clone(), 10, 2));

    let history = vec![
        ChatMessage::user("I was just diagnosed with diabetes."),
        ChatMessage::assistant("I'm sorry to hear that. What would you like to know?"),
    ];
    let answer = orchestrator
        .answer_query("What regulates blood sugar?", history, false)
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Success);
    assert_eq!(answer.text, "Insulin, made by the pancreas.");

    let prompt = generator.last_prompt.lock().unwrap().clone();
    assert_eq!(prompt.len(), 4);
    assert_eq!(prompt[1].content, "I was just diagnosed with diabetes.");
    assert_eq!(prompt[3].content, "What regulates blood sugar?");

    // Every source is a chunk that exists in the corpus.
    let corpus = larger_book();
    for source in &answer.sources {
        let page = corpus.iter().find(|p| p.number == source.page).unwrap();
        assert!(page.text.contains(&source.text));
    }
}

#[tokio::test]
async fn test_snapshot_from_other_embedder_rejected() {
    let tmp = TempDir::new().unwrap();
    let (_, index) = build_index(&tmp, &two_page_book()).await;
    let other: Arc<dyn Embedder> = Arc::new(HashedEmbedder::new(DIMS / 2));
    let err = Retriever::new(other, index).err().unwrap();
    assert_eq!(err.class(), "ModelUnavailable");
}
