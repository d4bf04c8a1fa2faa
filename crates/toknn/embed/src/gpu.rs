//! Candle-backed similarity matmul (CUDA or Metal when enabled, CPU otherwise).
//!
//! The normalized corpus is uploaded to the device once; each batch is a
//! `[B, D] @ [D, N]` matmul whose result is copied back for top-k selection.

use eyre::WrapErr as _;

/// Similarity backend holding the corpus resident on a candle device.
///
/// Owns the device buffers for the duration of one run; they are released
/// when the backend is dropped.
pub struct CandleBackend {
    device: candle_core::Device,
    corpus: candle_core::Tensor,
    vocab_size: usize,
    dim: usize,
}

impl CandleBackend {
    /// Upload `matrix` to `device`.
    pub fn new(
        matrix: &crate::NormalizedMatrix,
        device: candle_core::Device,
    ) -> eyre::Result<Self> {
        let (vocab_size, dim) = (matrix.nrows(), matrix.ncols());
        let corpus =
            candle_core::Tensor::from_slice(matrix.as_slice()?, (vocab_size, dim), &device)
                .wrap_err_with(|| {
                    format!("failed to upload {vocab_size}x{dim} corpus to {device:?}")
                })?;

        tracing::info!(?device, vocab_size, dim, "corpus resident on device");

        Ok(Self {
            device,
            corpus,
            vocab_size,
            dim,
        })
    }

    /// Candle backend on the CPU device (for testing/fallback).
    pub fn cpu(matrix: &crate::NormalizedMatrix) -> eyre::Result<Self> {
        Self::new(matrix, candle_core::Device::Cpu)
    }

    /// Get the device being used.
    #[must_use]
    pub fn device(&self) -> &candle_core::Device {
        &self.device
    }
}

impl crate::SimilarityBackend for CandleBackend {
    fn name(&self) -> &'static str {
        "candle"
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn similarities(&self, rows: std::ops::Range<usize>) -> eyre::Result<ndarray::Array2<f32>> {
        let batch_rows = rows.len();
        let batch = self
            .corpus
            .narrow(0, rows.start, batch_rows)
            .wrap_err("failed to slice query batch")?;

        let corpus_t = self.corpus.t().wrap_err("failed to transpose corpus")?;
        let similarities = batch
            .matmul(&corpus_t)
            .wrap_err("failed to compute similarities")?;

        let flat = similarities
            .to_device(&candle_core::Device::Cpu)
            .wrap_err("failed to move similarities to CPU")?
            .flatten_all()
            .wrap_err("failed to flatten similarities")?
            .to_vec1::<f32>()
            .wrap_err("failed to extract similarities")?;

        ndarray::Array2::from_shape_vec((batch_rows, self.vocab_size), flat)
            .wrap_err("similarity batch has unexpected shape")
    }
}

impl Drop for CandleBackend {
    fn drop(&mut self) {
        tracing::debug!(device = ?self.device, "releasing device corpus");
    }
}

/// Get the accelerator device (Metal or CUDA per enabled feature, CPU otherwise).
///
/// A missing accelerator is an error; callers decide whether to retry on CPU.
pub fn default_device() -> eyre::Result<candle_core::Device> {
    #[cfg(feature = "metal")]
    {
        tracing::info!("using Metal device");
        candle_core::Device::new_metal(0).wrap_err("failed to create Metal device")
    }
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    {
        tracing::info!("using CUDA device");
        candle_core::Device::new_cuda(0).wrap_err("failed to create CUDA device")
    }
    #[cfg(not(any(feature = "metal", feature = "cuda")))]
    {
        tracing::info!("no accelerator feature enabled, using candle CPU device");
        Ok(candle_core::Device::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimilarityBackend as _;
    use ndarray::array;

    #[test]
    fn test_candle_similarities_match_dot() {
        let m = crate::normalize(array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        let backend = CandleBackend::cpu(&m).unwrap();

        let sims = backend.similarities(1..3).unwrap();
        assert_eq!(sims.shape(), &[2, 3]);

        let expected = m.view().slice(ndarray::s![1..3, ..]).dot(&m.view().t());
        for (a, b) in sims.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6, "candle={a}, ndarray={b}");
        }
    }

    #[test]
    fn test_candle_backend_reports_device() {
        let m = crate::normalize(array![[1.0, 0.0]]);
        let backend = CandleBackend::cpu(&m).unwrap();
        assert!(backend.device().is_cpu());
        assert_eq!((backend.vocab_size(), backend.dim()), (1, 2));
    }
}
