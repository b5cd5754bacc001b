//! # HaleAI
//!
//! Retrieval-augmented question answering over a medical reference PDF.
//!
//! Ingestion extracts the PDF page by page, splits pages into overlapping
//! chunks that remember their page number, embeds them, and saves a vector
//! index. At query time the question is embedded, the nearest chunks are
//! retrieved and optionally reranked, and a chat model writes an answer
//! grounded in those chunks, which are returned as its sources.
//!
//! ## Architecture
//!
//! ```text
//! ingest:  PDF ──▶ extract ──▶ chunk ──▶ embedding ──▶ index snapshot
//!
//! query:   question ──▶ retrieve ──▶ rerank ──▶ synthesize ──▶ Answer
//!                          ▲                        │
//!                       index                  generation
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! haleai ingest                          # build ./data/index.json
//! haleai ask "What regulates blood sugar?"
//! haleai serve                           # HTTP API on 0.0.0.0:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | PDF page extraction |
//! | [`chunk`] | Recursive separator chunking |
//! | [`embedding`] | Embedding backends |
//! | [`index`] | Vector index and snapshot |
//! | [`ingest`] | Offline index build |
//! | [`retrieve`] | Dense retrieval |
//! | [`rerank`] | Candidate reranking |
//! | [`generation`] | Chat-model clients |
//! | [`synthesize`] | Grounded prompt and answer policy |
//! | [`pipeline`] | Query orchestration and lifecycle |
//! | [`response`] | Answer wire format |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod response;
pub mod retrieve;
pub mod server;
pub mod synthesize;
