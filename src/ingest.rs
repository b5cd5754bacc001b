//! Offline ingestion: PDF → pages → chunks → embeddings → index snapshot.
//!
//! Runs once (or whenever the corpus changes) via `haleai ingest`. Any
//! embedding failure aborts the run; a partially embedded index is never
//! written.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract;
use crate::index::{Metric, VectorIndex};
use crate::models::{EmbeddedChunk, PageText};

/// Summary of an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub pages: usize,
    pub chunks: usize,
    pub model: String,
    pub dims: usize,
    pub path: PathBuf,
    pub elapsed: Duration,
}

/// Chunk and embed `pages` into a fresh index.
pub async fn ingest_pages(
    pages: &[PageText],
    chunker: &Chunker,
    embedder: &dyn Embedder,
    metric: Metric,
    batch_size: usize,
) -> Result<VectorIndex> {
    let chunks = chunker.split(pages);
    let mut index = VectorIndex::new(embedder.model_name(), embedder.dims(), metric);

    let total = chunks.len();
    let mut done = 0;
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("Embedding failed after {} of {} chunks", done, total))?;

        index.add(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
                .collect(),
        )?;

        done += batch.len();
        tracing::debug!(done, total, "embedded chunk batch");
    }

    Ok(index)
}

/// Build the index snapshot described by `config` and write it to disk.
pub async fn build_index(config: &Config) -> Result<IngestReport> {
    let start = Instant::now();
    let pdf_path = config.corpus.pdf_path();
    let pages = extract::read_pdf(&pdf_path, config.corpus.source_label())
        .with_context(|| format!("Failed to extract {}", pdf_path.display()))?;
    tracing::info!(path = %pdf_path.display(), pages = pages.len(), "extracted corpus");

    let embedding = config.embedding.clone();
    let embedder: Arc<dyn Embedder> =
        tokio::task::spawn_blocking(move || create_embedder(&embedding)).await??;

    let chunker = Chunker::from_config(&config.chunking);
    let index = ingest_pages(
        &pages,
        &chunker,
        embedder.as_ref(),
        config.index.metric,
        config.embedding.batch_size,
    )
    .await?;

    if index.is_empty() {
        tracing::warn!("corpus produced no chunks; writing an empty index");
    }

    index
        .save(&config.index.path)
        .with_context(|| format!("Failed to write index: {}", config.index.path.display()))?;

    Ok(IngestReport {
        pages: pages.len(),
        chunks: index.len(),
        model: index.model().to_string(),
        dims: index.dims(),
        path: config.index.path.clone(),
        elapsed: start.elapsed(),
    })
}

/// CLI entry point for `haleai ingest`.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let report = build_index(config).await?;

    println!("ingest {}", config.corpus.pdf_path().display());
    println!("  pages: {}", report.pages);
    println!("  chunks: {}", report.chunks);
    println!("  model: {} ({} dims)", report.model, report.dims);
    println!("  index: {}", report.path.display());
    println!("  time: {:.2}s", report.elapsed.as_secs_f64());
    println!("ok");

    Ok(())
}
