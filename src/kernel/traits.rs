//! Kernel trait definition

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Positive-definite kernel function trait
///
/// A kernel K(x, y) must be positive definite for the ridge problem to be
/// well posed and for the Cholesky-based preconditioner to exist.
pub trait Kernel: Send + Sync {
    /// Compute kernel value K(x, y)
    fn compute(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64;

    /// Compute the dense tile K(A, B) between the rows of `a` and `b`
    ///
    /// The default implementation calls [`Kernel::compute`] per entry.
    /// Kernels with a cheaper matrix form (norm expansion, GEMM) override it.
    fn block(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((a.nrows(), b.nrows()));
        for (i, x) in a.outer_iter().enumerate() {
            for (j, y) in b.outer_iter().enumerate() {
                out[[i, j]] = self.compute(x, y);
            }
        }
        out
    }

    /// Short identifier used in logs
    fn name(&self) -> &'static str;
}

/// Squared row norms of a point set
pub(crate) fn row_norms_squared(points: ArrayView2<f64>) -> Vec<f64> {
    points.outer_iter().map(|row| row.dot(&row)).collect()
}

/// Squared Euclidean distances between all rows of `a` and `b`
///
/// Uses ||x - y||² = ||x||² + ||y||² - 2·xᵗy, clamped at zero. NaN inputs
/// stay NaN.
pub(crate) fn squared_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let a_norms = row_norms_squared(a);
    let b_norms = row_norms_squared(b);
    let mut out = a.dot(&b.t());
    for (i, mut row) in out.outer_iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            let d = a_norms[i] + b_norms[j] - 2.0 * *value;
            *value = if d < 0.0 { 0.0 } else { d };
        }
    }
    out
}

/// Squared Euclidean distance between two points
pub(crate) fn squared_distance(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    x.iter().zip(y.iter()).map(|(a, b)| (a - b) * (a - b)).sum()
}
