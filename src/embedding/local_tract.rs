//! Sentence embeddings on tract, for builds without ONNX Runtime (musl,
//! Intel macOS).
//!
//! [`TractModel::load`] fetches the ONNX graph and tokenizer from Hugging
//! Face on first use, caches them under `$XDG_CACHE_HOME/haleai/models`
//! (falling back to `~/.cache`), and compiles the graph once. Inference is
//! synchronous; callers run it on a blocking thread.
#![cfg_attr(
    all(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"),
    allow(dead_code)
)]

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tract_onnx::prelude::*;

use super::normalize_l2;

/// Where a supported model's files live and what it produces.
#[derive(Debug)]
pub struct ModelSpec {
    pub name: &'static str,
    repo: &'static str,
    onnx_file: &'static str,
    tokenizer_file: &'static str,
    pub dims: usize,
}

const MODELS: &[ModelSpec] = &[ModelSpec {
    name: "all-minilm-l6-v2",
    repo: "sentence-transformers/all-MiniLM-L6-v2",
    onnx_file: "onnx/model.onnx",
    tokenizer_file: "tokenizer.json",
    dims: 384,
}];

/// Longest token sequence fed to the encoder; longer inputs are cut.
const MAX_TOKENS: usize = 256;

pub fn lookup(name: &str) -> Result<&'static ModelSpec> {
    MODELS.iter().find(|m| m.name == name).ok_or_else(|| {
        let known: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
        anyhow!(
            "Model '{}' is not available on the tract backend (available: {})",
            name,
            known.join(", ")
        )
    })
}

fn cache_root() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    base.join("haleai").join("models")
}

/// Download `file` from the model repo unless `dest` already exists.
/// Writes to a `.part` file first so an interrupted download is never
/// mistaken for a cached one.
fn fetch(spec: &ModelSpec, file: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let url = format!("https://huggingface.co/{}/resolve/main/{}", spec.repo, file);
    tracing::info!(%url, "downloading model file");
    let bytes = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .with_context(|| format!("Failed to download {}", url))?;

    let partial = dest.with_extension("part");
    std::fs::write(&partial, &bytes)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;
    Ok(())
}

/// Right-pad token id rows to the longest row (capped at `max_len`).
///
/// Returns `(input_ids, attention_mask, width)`, both row-major with
/// `rows.len() * width` entries.
fn pad_batch(rows: &[&[u32]], max_len: usize) -> (Vec<i64>, Vec<i64>, usize) {
    let width = rows
        .iter()
        .map(|r| r.len())
        .max()
        .unwrap_or(1)
        .clamp(1, max_len.max(1));

    let mut ids = vec![0i64; rows.len() * width];
    let mut mask = vec![0i64; rows.len() * width];
    for (i, row) in rows.iter().enumerate() {
        for (j, &id) in row.iter().take(width).enumerate() {
            ids[i * width + j] = i64::from(id);
            mask[i * width + j] = 1;
        }
    }
    (ids, mask, width)
}

/// Turn encoder output into one normalized vector per input.
///
/// A `[batch, dims]` output is already pooled. A `[batch, seq, dims]`
/// output is mean-pooled over the first `lens[i]` positions of row `i`.
fn pool(
    output: &ndarray::ArrayViewD<f32>,
    lens: &[usize],
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let shape = output.shape();
    match *shape {
        [rows, width] => {
            if width != dims {
                bail!("Encoder returned {} dimensions, expected {}", width, dims);
            }
            Ok((0..rows)
                .map(|i| {
                    let row = output.slice(ndarray::s![i, ..]);
                    normalize_l2(row.iter().copied().collect())
                })
                .collect())
        }
        [rows, seq, width] => {
            if width != dims {
                bail!("Encoder returned {} dimensions, expected {}", width, dims);
            }
            let mut pooled = Vec::with_capacity(rows);
            for (i, &len) in lens.iter().enumerate().take(rows) {
                let len = len.min(seq);
                let mut sum = vec![0f32; dims];
                for j in 0..len {
                    for (acc, v) in sum
                        .iter_mut()
                        .zip(output.slice(ndarray::s![i, j, ..]).iter())
                    {
                        *acc += v;
                    }
                }
                if len > 0 {
                    sum.iter_mut().for_each(|x| *x /= len as f32);
                }
                pooled.push(normalize_l2(sum));
            }
            Ok(pooled)
        }
        _ => bail!("Unexpected encoder output shape: {:?}", shape),
    }
}

/// A compiled encoder plus its tokenizer.
pub struct TractModel {
    spec: &'static ModelSpec,
    tokenizer: Tokenizer,
    plan: TypedRunnableModel<TypedModel>,
    /// BERT-style exports also take `token_type_ids`.
    wants_token_types: bool,
}

impl TractModel {
    /// Fetch (if needed) and compile the named model.
    pub fn load(name: &str) -> Result<Self> {
        let spec = lookup(name)?;
        let dir = cache_root().join(spec.name);
        let onnx_path = dir.join(spec.onnx_file);
        let tokenizer_path = dir.join(spec.tokenizer_file);
        fetch(spec, spec.onnx_file, &onnx_path)?;
        fetch(spec, spec.tokenizer_file, &tokenizer_path)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let model = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .with_context(|| format!("Failed to read {}", onnx_path.display()))?;
        let wants_token_types = model.inputs.len() > 2;
        let plan = model
            .into_optimized()
            .context("Failed to optimize encoder graph")?
            .into_runnable()
            .context("Failed to compile encoder graph")?;

        tracing::info!(model = spec.name, dims = spec.dims, "tract encoder loaded");
        Ok(Self {
            spec,
            tokenizer,
            plan,
            wants_token_types,
        })
    }

    pub fn dims(&self) -> usize {
        self.spec.dims
    }

    /// Embed `texts` in batches of `batch_size`, preserving input order.
    pub fn embed(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }

    fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = batch
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| anyhow!("Failed to tokenize input: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;
        let rows: Vec<&[u32]> = encodings.iter().map(|e| e.get_ids()).collect();
        let (ids, mask, width) = pad_batch(&rows, MAX_TOKENS);
        let lens: Vec<usize> = rows.iter().map(|r| r.len().min(width)).collect();

        let shape = (rows.len(), width);
        let to_tensor = |data: Vec<i64>| -> Result<TValue> {
            let array = ndarray::Array2::from_shape_vec(shape, data)
                .context("Failed to shape encoder input")?;
            Ok(Tensor::from(array).into())
        };

        let mut inputs: TVec<TValue> = tvec!(to_tensor(ids)?, to_tensor(mask)?);
        if self.wants_token_types {
            inputs.push(to_tensor(vec![0i64; rows.len() * width])?);
        }

        let outputs = self.plan.run(inputs).context("Encoder inference failed")?;
        let first = outputs
            .first()
            .ok_or_else(|| anyhow!("Encoder produced no output"))?;
        let view = first
            .to_array_view::<f32>()
            .context("Encoder output is not f32")?;
        pool(&view, &lens, self.spec.dims)
    }
}
