//! Core data models used throughout HaleAI.
//!
//! These types represent the pages, chunks, queries, retrieval results, and
//! answers that flow through the ingestion and query pipelines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page of extracted document text, before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based page number within the source document.
    pub number: u32,
    pub text: String,
    /// Source identifier (file name) the page came from.
    pub source: String,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            source: source.into(),
        }
    }
}

/// A bounded span of source text tagged with page/source provenance.
///
/// Immutable once created by the chunker; the only way a chunk reaches an
/// [`Answer`] is through the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    pub source: String,
}

/// A chunk together with its embedding vector, as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A single turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A question plus the conversation history it was asked in.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub question: String,
    pub history: Vec<ChatMessage>,
}

impl Query {
    pub fn new(question: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            question: question.into(),
            history,
        }
    }
}

/// A retrieved chunk with its relevance score (higher is more relevant).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Candidates ordered by descending relevance. Produced fresh per query.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Outcome class of an [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Success,
    NoContext,
    Error,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Success => "success",
            AnswerStatus::NoContext => "no_context",
            AnswerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single-request result of the query pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was grounded on, copied from retrieval.
    pub sources: Vec<Chunk>,
    pub status: AnswerStatus,
    pub metadata: Map<String, Value>,
}

impl Answer {
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }
}
