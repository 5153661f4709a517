//! Linear kernel implementation

use crate::kernel::Kernel;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Linear kernel: K(x, y) = x^T * y
///
/// The kernel matrix of a linear kernel has rank at most D, so the Nystroem
/// system it produces is rank deficient whenever M > D. The preconditioner's
/// diagonal shift keeps the factorization well defined in that case.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearKernel;

impl LinearKernel {
    /// Create a new linear kernel
    pub fn new() -> Self {
        Self
    }
}

impl Kernel for LinearKernel {
    fn compute(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        x.dot(&y)
    }

    fn block(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
        a.dot(&b.t())
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}
