//! Row-wise L2 normalization so inner product equals cosine similarity.

use ndarray::parallel::prelude::*;

/// Norms below this are clamped before dividing.
pub const NORM_EPSILON: f32 = 1e-8;

/// An embedding matrix whose rows have unit L2 norm.
///
/// Rows whose original norm was below [`NORM_EPSILON`] are divided by the
/// epsilon instead, so they stay finite but are not unit length.
/// Always in standard (row-major, contiguous) layout.
#[derive(Debug, Clone)]
pub struct NormalizedMatrix {
    data: ndarray::Array2<f32>,
}

impl NormalizedMatrix {
    /// Number of rows (vocabulary size).
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Embedding dimension.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn view(&self) -> ndarray::ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> eyre::Result<&[f32]> {
        self.data
            .as_slice()
            .ok_or_else(|| eyre::eyre!("normalized matrix is not contiguous"))
    }
}

/// L2-normalize every row, reusing the input buffer.
///
/// `norm = max(||row||, 1e-8)`, `row /= norm`. All-zero rows stay zero.
#[must_use]
pub fn normalize(matrix: toknn_core::EmbeddingMatrix) -> NormalizedMatrix {
    let mut data = if matrix.is_standard_layout() {
        matrix
    } else {
        matrix.as_standard_layout().into_owned()
    };

    let degenerate: usize = data
        .axis_iter_mut(ndarray::Axis(0))
        .into_par_iter()
        .map(|mut row| {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            let clamped = norm.max(NORM_EPSILON);
            row.mapv_inplace(|x| x / clamped);
            usize::from(norm < NORM_EPSILON)
        })
        .sum();

    if degenerate > 0 {
        tracing::warn!(degenerate, rows = data.nrows(), "rows with near-zero norm");
    }

    NormalizedMatrix { data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn row_norm(row: ndarray::ArrayView1<'_, f32>) -> f32 {
        row.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_rows_have_unit_norm() {
        let m = normalize(array![[3.0, 4.0], [0.9, 0.1], [-1.0, 0.0], [1e-3, 2e-3]]);
        for row in m.view().rows() {
            let norm = row_norm(row);
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
        }
        assert!((m.view()[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((m.view()[[0, 1]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_zero_row_stays_finite() {
        let m = normalize(array![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(m.view().iter().all(|x| x.is_finite()));
        assert_eq!(m.view().row(0).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_tiny_row_divided_by_epsilon() {
        let m = normalize(array![[1e-10_f32, 0.0]]);
        let v = m.view()[[0, 0]];
        assert!(v.is_finite());
        assert!((v - 1e-2).abs() < 1e-6, "value was {v}");
    }

    #[test]
    fn test_non_standard_layout_input() {
        let m = array![[1.0_f32, 0.0], [0.0, 2.0]].reversed_axes();
        let normalized = normalize(m);
        assert!(normalized.as_slice().is_ok());
        for row in normalized.view().rows() {
            assert!((row_norm(row) - 1.0).abs() < 1e-5);
        }
    }
}
