//! Wire shape of a query answer.
//!
//! Flattens an [`Answer`] into the JSON object returned by `POST /query`
//! and printed by `haleai ask`: source text is previewed, page 0 is shown
//! as `"N/A"`, and `processing_time` is lifted out of the metadata.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{Answer, AnswerStatus, Chunk};

/// Maximum characters of chunk text shown per source.
pub const SOURCE_PREVIEW_CHARS: usize = 200;

/// Page number, or `"N/A"` when the chunk carries none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PageLabel {
    Number(u32),
    Unknown(&'static str),
}

impl PageLabel {
    pub fn from_page(page: u32) -> Self {
        if page == 0 {
            PageLabel::Unknown("N/A")
        } else {
            PageLabel::Number(page)
        }
    }
}

impl std::fmt::Display for PageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageLabel::Number(n) => write!(f, "{}", n),
            PageLabel::Unknown(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceView {
    pub content: String,
    pub page: PageLabel,
    pub source: String,
}

impl SourceView {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let (preview, truncated) = truncate_chars(&chunk.text, SOURCE_PREVIEW_CHARS);
        let content = if truncated {
            format!("{}...", preview)
        } else {
            preview.to_string()
        };
        let source = if chunk.source.is_empty() {
            "Unknown".to_string()
        } else {
            chunk.source.clone()
        };
        Self {
            content,
            page: PageLabel::from_page(chunk.page),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceView>,
    pub num_sources: usize,
    pub status: AnswerStatus,
    pub metadata: Map<String, Value>,
    pub processing_time: String,
    pub timestamp: String,
}

impl From<Answer> for QueryResponse {
    fn from(answer: Answer) -> Self {
        let processing_time = answer
            .metadata
            .get("processing_time")
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_string();
        Self {
            sources: answer.sources.iter().map(SourceView::from_chunk).collect(),
            num_sources: answer.num_sources(),
            answer: answer.text,
            status: answer.status,
            metadata: answer.metadata,
            processing_time,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// The first `max` characters of `s`, and whether anything was cut.
pub fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
