//! Embedding normalization and exact batched top-k cosine search.
//!
//! Rows are L2-normalized so that inner product equals cosine similarity,
//! then every row is scored against the whole corpus one query batch at a
//! time. Peak scratch memory is one `[batch_size, vocab_size]` score matrix.

use ndarray::parallel::prelude::*;

pub mod gpu;
mod normalize;
pub mod topk;

pub use normalize::{NORM_EPSILON, NormalizedMatrix, normalize};

/// Produces inner products of a block of query rows against the full corpus.
///
/// Backends differ only in speed: results must agree within float32
/// tolerance.
pub trait SimilarityBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Corpus rows.
    fn vocab_size(&self) -> usize;

    /// Embedding dimension.
    fn dim(&self) -> usize;

    /// Scores of corpus rows `rows` against every corpus row.
    ///
    /// Shape: [rows.len(), vocab_size].
    fn similarities(&self, rows: std::ops::Range<usize>) -> eyre::Result<ndarray::Array2<f32>>;
}

/// Exact brute-force backend using ndarray's matrix multiply.
pub struct CpuBackend<'a> {
    corpus: ndarray::ArrayView2<'a, f32>,
}

impl<'a> CpuBackend<'a> {
    #[must_use]
    pub fn new(matrix: &'a NormalizedMatrix) -> Self {
        Self {
            corpus: matrix.view(),
        }
    }
}

impl SimilarityBackend for CpuBackend<'_> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn vocab_size(&self) -> usize {
        self.corpus.nrows()
    }

    fn dim(&self) -> usize {
        self.corpus.ncols()
    }

    fn similarities(&self, rows: std::ops::Range<usize>) -> eyre::Result<ndarray::Array2<f32>> {
        let batch = self.corpus.slice(ndarray::s![rows, ..]);
        Ok(batch.dot(&self.corpus.t()))
    }
}

/// For every row, the `k + 1` highest inner-product matches in the corpus.
///
/// The extra slot is for the row's own self-match. Each result list is sorted
/// best first (descending score, ascending id on ties) and holds
/// `min(k + 1, vocab_size)` entries; any `k` is accepted.
pub fn search(
    backend: &dyn SimilarityBackend,
    k: usize,
    batch_size: usize,
) -> eyre::Result<Vec<Vec<toknn_core::Candidate>>> {
    if batch_size == 0 {
        eyre::bail!("batch size must be at least 1");
    }

    let vocab_size = backend.vocab_size();
    if u32::try_from(vocab_size).is_err() {
        eyre::bail!("vocabulary of {vocab_size} rows does not fit u32 token ids");
    }

    let k_query = k.saturating_add(1).min(vocab_size);
    let num_batches = vocab_size.div_ceil(batch_size);
    let mut results = Vec::with_capacity(vocab_size);

    tracing::info!(
        backend = backend.name(),
        vocab_size,
        dim = backend.dim(),
        k_query,
        batch_size,
        num_batches,
        "starting knn search"
    );

    for (batch_idx, start) in (0..vocab_size).step_by(batch_size).enumerate() {
        let end = (start + batch_size).min(vocab_size);
        let sims = backend.similarities(start..end)?;

        if sims.dim() != (end - start, vocab_size) {
            eyre::bail!(
                "{} backend returned shape {:?} for rows {start}..{end}, expected ({}, {vocab_size})",
                backend.name(),
                sims.dim(),
                end - start
            );
        }

        let batch_results: Vec<_> = sims
            .axis_iter(ndarray::Axis(0))
            .into_par_iter()
            .map(|row| topk::select_top_k(row.iter().copied(), k_query))
            .collect();
        results.extend(batch_results);

        tracing::info!(
            batch = batch_idx + 1,
            num_batches,
            rows_done = end,
            vocab_size,
            "knn search progress"
        );
    }

    Ok(results)
}

/// Run [`search`] on the backend selected by `accelerator`.
///
/// The accelerated backend's device buffers live only for the duration of
/// this call. Once the corpus is uploaded the host copy is freed, so only one
/// `N x D` copy is held during the search even on candle's CPU device.
pub fn search_with_backend(
    matrix: NormalizedMatrix,
    k: usize,
    batch_size: usize,
    accelerator: bool,
) -> eyre::Result<Vec<Vec<toknn_core::Candidate>>> {
    if accelerator {
        let backend = gpu::CandleBackend::new(&matrix, gpu::default_device()?)?;
        drop(matrix);
        search(&backend, k, batch_size)
    } else {
        search(&CpuBackend::new(&matrix), k, batch_size)
    }
}
