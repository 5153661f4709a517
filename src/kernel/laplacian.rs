//! Laplacian kernel: K(x, y) = exp(-||x - y|| / σ)

use crate::kernel::traits::{squared_distance, squared_distances};
use crate::kernel::Kernel;
use ndarray::{Array2, ArrayView1, ArrayView2};

#[derive(Debug, Clone, Copy)]
pub struct LaplacianKernel {
    sigma: f64,
}

impl LaplacianKernel {
    /// # Panics
    /// Panics if sigma is not positive
    pub fn new(sigma: f64) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive, got: {}", sigma);
        Self { sigma }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Kernel for LaplacianKernel {
    fn compute(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        (-squared_distance(x, y).sqrt() / self.sigma).exp()
    }

    fn block(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
        let mut out = squared_distances(a, b);
        out.mapv_inplace(|d| (-d.sqrt() / self.sigma).exp());
        out
    }

    fn name(&self) -> &'static str {
        "laplacian"
    }
}
