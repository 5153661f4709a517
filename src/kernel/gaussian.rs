//! Gaussian (squared-exponential) kernel implementation
//!
//! The Gaussian kernel is defined as: K(x, y) = exp(-||x - y||² / (2σ²))
//! where σ (sigma) is the bandwidth.

use crate::kernel::traits::{squared_distance, squared_distances};
use crate::kernel::Kernel;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Gaussian kernel: K(x, y) = exp(-||x - y||² / (2σ²))
///
/// The bandwidth controls how quickly similarity decays with distance:
/// - Small sigma: only close points interact (kernel matrix near identity)
/// - Large sigma: distant points interact (kernel matrix near rank one)
#[derive(Debug, Clone, Copy)]
pub struct GaussianKernel {
    sigma: f64,
    gamma: f64,
}

impl GaussianKernel {
    /// Create a new Gaussian kernel with bandwidth `sigma`
    ///
    /// # Panics
    /// Panics if sigma is not positive
    pub fn new(sigma: f64) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive, got: {}", sigma);
        Self {
            sigma,
            gamma: 1.0 / (2.0 * sigma * sigma),
        }
    }

    /// Get the bandwidth
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Get 1 / (2σ²)
    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl Default for GaussianKernel {
    /// Unit bandwidth
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Kernel for GaussianKernel {
    fn compute(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        (-self.gamma * squared_distance(x, y)).exp()
    }

    fn block(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
        let mut out = squared_distances(a, b);
        out.mapv_inplace(|d| (-self.gamma * d).exp());
        out
    }

    fn name(&self) -> &'static str {
        "gaussian"
    }
}
