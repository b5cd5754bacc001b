//! Grounded answer synthesis.
//!
//! Builds the chat prompt from the question, its history, and the selected
//! chunks, calls the [`Generator`] once, and wraps the reply in an
//! [`Answer`]. An answer's sources are always the context chunks passed in,
//! never anything the model wrote.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Error, GenerationError};
use crate::generation::Generator;
use crate::models::{Answer, AnswerStatus, ChatMessage, Query, RetrievalResult};

/// Returned without calling the model when retrieval found nothing.
pub const NO_CONTEXT_ANSWER: &str = "I don't have enough information in the medical reference \
    to answer that question. Please try rephrasing it or consult a healthcare professional.";

/// Returned when the model call fails. Backend detail goes to the log only.
pub const ERROR_ANSWER: &str = "I'm sorry, I couldn't generate an answer right now. \
    Please try again in a moment.";

const SYSTEM_INSTRUCTION: &str = "You are a medical information assistant. Answer the user's \
question using only the numbered context passages below, citing them as [n]. If the passages \
do not contain the information needed, say that you don't have enough information to answer. \
Do not invent facts, sources, or page numbers. You do not replace professional medical advice.";

/// Build the messages sent to the generator.
///
/// Order: system instruction with numbered context, then prior turns, then
/// the question. History roles other than `assistant` are sent as `user`;
/// empty turns are dropped.
pub fn build_messages(query: &Query, context: &RetrievalResult) -> Vec<ChatMessage> {
    let mut system = String::from(SYSTEM_INSTRUCTION);
    system.push_str("\n\nContext:\n");
    for (i, scored) in context.iter().enumerate() {
        system.push_str(&format!(
            "\n[{}] ({}, page {})\n{}\n",
            i + 1,
            scored.chunk.source,
            scored.chunk.page,
            scored.chunk.text.trim()
        ));
    }

    let mut messages = Vec::with_capacity(query.history.len() + 2);
    messages.push(ChatMessage::system(system));
    for turn in &query.history {
        if turn.content.trim().is_empty() {
            continue;
        }
        let role = match turn.role.as_str() {
            "assistant" => "assistant",
            _ => "user",
        };
        messages.push(ChatMessage::new(role, turn.content.clone()));
    }
    messages.push(ChatMessage::user(query.question.clone()));
    messages
}

/// Wraps a generator with the grounding prompt and answer policy.
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub async fn synthesize(&self, query: &Query, context: &RetrievalResult) -> Answer {
        if context.is_empty() {
            return Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                status: AnswerStatus::NoContext,
                metadata: Map::new(),
            };
        }

        let sources = context.iter().map(|s| s.chunk.clone()).collect();
        let messages = build_messages(query, context);

        let reply = self.generator.generate(&messages).await.and_then(|raw| {
            let text = raw.trim();
            if text.is_empty() {
                Err(GenerationError::EmptyOutput)
            } else {
                Ok(text.to_string())
            }
        });

        match reply {
            Ok(text) => Answer {
                text,
                sources,
                status: AnswerStatus::Success,
                metadata: Map::new(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "answer generation failed");
                let err = Error::from(err);
                error_answer(&err, sources)
            }
        }
    }
}

/// Well-formed `error` answer carrying only the error's class name.
pub fn error_answer(err: &Error, sources: Vec<crate::models::Chunk>) -> Answer {
    let mut metadata = Map::new();
    metadata.insert("error_class".to_string(), Value::from(err.class()));
    Answer {
        text: ERROR_ANSWER.to_string(),
        sources,
        status: AnswerStatus::Error,
        metadata,
    }
}
