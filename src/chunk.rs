//! Recursive separator text chunker.
//!
//! Splits page text into [`Chunk`]s no longer than `chunk_size` characters,
//! with adjacent chunks overlapping by up to `chunk_overlap` characters.
//! Pages are split independently, so no chunk ever spans two pages and
//! every chunk carries the page number and source of the page it came from.
//!
//! # Algorithm
//!
//! 1. A page whose text fits in `chunk_size` becomes exactly one chunk.
//! 2. Otherwise the text is cut into pieces at the highest-priority
//!    separator present (paragraph, line, sentence end). The separator stays
//!    attached to the end of the piece before it.
//! 3. Pieces still longer than `chunk_size` are cut again with the next
//!    separator; when none is left they are hard-split every `chunk_size`
//!    characters.
//! 4. Pieces are merged greedily into windows of at most `chunk_size`
//!    characters. When a window is flushed, its trailing pieces totalling at
//!    most `chunk_overlap` characters seed the next window.
//!
//! Every chunk is an exact slice of its page, so dropping the overlapping
//! prefix of each chunk and concatenating reconstructs the page text.
//!
//! # Example
//!
//! ```rust
//! use haleai::chunk::Chunker;
//! use haleai::models::PageText;
//!
//! let chunker = Chunker::new(500, 50, &["\n\n", "\n", ". "]);
//! let pages = vec![PageText::new(1, "Diabetes is a chronic condition.", "Medical_book.pdf")];
//! let chunks = chunker.split(&pages);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page, 1);
//! ```

use crate::config::ChunkingConfig;
use crate::models::{Chunk, PageText};

/// Byte range of a chunk within its page text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Splits pages into overlapping, provenance-tagged chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Chunker {
    /// Create a chunker. Sizes are in characters.
    ///
    /// `chunk_size` is raised to at least 1 and `chunk_overlap` is capped
    /// below it, so splitting always makes progress.
    pub fn new<S: AsRef<str>>(chunk_size: usize, chunk_overlap: usize, separators: &[S]) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: separators
                .iter()
                .map(|s| s.as_ref().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.separators.as_slice(),
        )
    }

    /// Split every page into chunks, preserving page order.
    ///
    /// Blank pages produce no chunks.
    pub fn split(&self, pages: &[PageText]) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| {
                self.split_spans(&page.text)
                    .into_iter()
                    .map(move |span| Chunk {
                        text: page.text[span.start..span.end].to_string(),
                        page: page.number,
                        source: page.source.clone(),
                    })
            })
            .collect()
    }

    /// Compute chunk boundaries for one page of text.
    ///
    /// Spans are ordered, each starts no later than the previous one ends,
    /// and together they cover the text.
    pub fn split_spans(&self, text: &str) -> Vec<Span> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![Span::new(0, text.len())];
        }

        let mut pieces = Vec::new();
        self.atomize(text, Span::new(0, text.len()), 0, &mut pieces);
        self.merge(text, &pieces)
    }

    /// Cut `span` into pieces of at most `chunk_size` characters.
    fn atomize(&self, text: &str, span: Span, level: usize, out: &mut Vec<Span>) {
        let slice = &text[span.start..span.end];
        if char_len(slice) <= self.chunk_size {
            out.push(span);
            return;
        }

        let found = self
            .separators
            .iter()
            .enumerate()
            .skip(level)
            .find(|(_, sep)| slice.contains(sep.as_str()));

        match found {
            Some((idx, sep)) => {
                let mut piece_start = span.start;
                for (pos, _) in slice.match_indices(sep.as_str()) {
                    let piece_end = span.start + pos + sep.len();
                    self.atomize(text, Span::new(piece_start, piece_end), idx + 1, out);
                    piece_start = piece_end;
                }
                if piece_start < span.end {
                    self.atomize(text, Span::new(piece_start, span.end), idx + 1, out);
                }
            }
            None => {
                // No separator left: hard split on char boundaries.
                let mut piece_start = span.start;
                let mut count = 0;
                for (pos, _) in slice.char_indices() {
                    if count == self.chunk_size {
                        out.push(Span::new(piece_start, span.start + pos));
                        piece_start = span.start + pos;
                        count = 0;
                    }
                    count += 1;
                }
                out.push(Span::new(piece_start, span.end));
            }
        }
    }

    /// Greedily merge contiguous pieces into overlapping windows.
    fn merge(&self, text: &str, pieces: &[Span]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut window: Vec<(Span, usize)> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(&text[piece.start..piece.end]);

            if total + len > self.chunk_size && !window.is_empty() {
                push_window(text, &window, &mut spans);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    let (_, dropped) = window.remove(0);
                    total -= dropped;
                }
            }

            window.push((piece, len));
            total += len;
        }

        push_window(text, &window, &mut spans);
        spans
    }
}

fn push_window(text: &str, window: &[(Span, usize)], spans: &mut Vec<Span>) {
    if let (Some(first), Some(last)) = (window.first(), window.last()) {
        let span = Span::new(first.0.start, last.0.end);
        if !text[span.start..span.end].trim().is_empty() {
            spans.push(span);
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
