//! Blocked kernel evaluation
//!
//! [`KernelEvaluator`] binds a kernel to a backend, a tile height and a
//! working precision. It never holds more than one tile per worker: full
//! matrices are only produced by [`KernelEvaluator::evaluate`], which the
//! caller asks for explicitly.

use crate::backend::{round, Backend};
use crate::core::{KrrError, Options, Precision, Result};
use crate::kernel::Kernel;
use crate::planner::BlockPlan;
use ndarray::{Array2, ArrayView2, CowArray, Ix2};
use std::sync::Arc;

pub struct KernelEvaluator<'k> {
    kernel: &'k dyn Kernel,
    backend: Arc<dyn Backend>,
    rows: usize,
    precision: Precision,
    fused: bool,
}

impl<'k> KernelEvaluator<'k> {
    /// Create an evaluator that tiles rows according to `plan`
    pub fn new(
        kernel: &'k dyn Kernel,
        backend: Arc<dyn Backend>,
        plan: &BlockPlan,
        options: &Options,
    ) -> Self {
        Self {
            kernel,
            backend,
            rows: plan.kernel_rows.max(1),
            precision: options.kernel_precision,
            fused: plan.fused,
        }
    }

    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Rows per tile
    pub fn block_rows(&self) -> usize {
        self.rows
    }

    /// Whether products use the fused row-wise path
    pub fn is_fused(&self) -> bool {
        self.fused
    }

    /// Full kernel matrix K(a, b)
    pub fn evaluate(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>> {
        check_dims(a, b)?;
        let a = self.at_precision(a);
        let b = self.at_precision(b);
        Ok(self
            .backend
            .evaluate_block(self.kernel, a.view(), b.view(), self.rows, self.precision))
    }

    /// K(a, b)·v without holding K(a, b)
    pub fn mmv(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        v: ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        check_dims(a, b)?;
        check_rows(b.nrows(), v.nrows())?;
        let a = self.at_precision(a);
        let b = self.at_precision(b);
        let out = if self.fused {
            self.backend
                .fused_product(self.kernel, a.view(), b.view(), v, self.rows, self.precision)
        } else {
            self.backend
                .block_product(self.kernel, a.view(), b.view(), v, self.rows, self.precision)
        };
        Ok(out)
    }

    /// K(a, b)ᵗ·(K(a, b)·v + w), streamed over row blocks of `a`
    ///
    /// Either `v` or `w` may be absent; at least one must be given.
    pub fn dmmv(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        v: Option<ArrayView2<f64>>,
        w: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>> {
        check_dims(a, b)?;
        match (v, w) {
            (None, None) => {
                return Err(KrrError::InvalidParameter(
                    "dmmv needs at least one of v and w".to_string(),
                ))
            }
            (Some(v), Some(w)) if v.ncols() != w.ncols() => {
                return Err(KrrError::DimensionMismatch {
                    expected: v.ncols(),
                    actual: w.ncols(),
                })
            }
            _ => {}
        }
        if let Some(v) = v {
            check_rows(b.nrows(), v.nrows())?;
        }
        if let Some(w) = w {
            check_rows(a.nrows(), w.nrows())?;
        }
        let a = self.at_precision(a);
        let b = self.at_precision(b);
        Ok(self.backend.gram_product(
            self.kernel,
            a.view(),
            b.view(),
            v,
            w,
            self.rows,
            self.fused,
            self.precision,
        ))
    }

    fn at_precision<'a>(&self, points: ArrayView2<'a, f64>) -> CowArray<'a, f64, Ix2> {
        match self.precision {
            Precision::Double => CowArray::from(points),
            Precision::Single => CowArray::from(points.mapv(|x| round(x, Precision::Single))),
        }
    }
}

fn check_dims(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<()> {
    if a.ncols() != b.ncols() {
        return Err(KrrError::KernelEvaluation(format!(
            "point sets have {} and {} features",
            a.ncols(),
            b.ncols()
        )));
    }
    Ok(())
}

fn check_rows(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(KrrError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{create, Device};
    use crate::kernel::{GaussianKernel, LinearKernel};
    use crate::planner::PreconditionerMode;
    use ndarray::array;

    fn plan(rows: usize) -> BlockPlan {
        BlockPlan {
            device: Device::Cpu,
            budget: usize::MAX,
            workers: 1,
            kernel_rows: rows,
            chol_block: 1,
            lauum_block: 1,
            mode: PreconditionerMode::InCore,
            fused: false,
        }
    }

    fn data() -> (Array2<f64>, Array2<f64>) {
        let a = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5], [-1.0, 2.0]];
        let b = array![[0.0, 0.0], [1.0, 1.0], [2.0, -1.0]];
        (a, b)
    }

    #[test]
    fn test_mismatched_features() {
        let kernel = LinearKernel::new();
        let options = Options::default();
        let evaluator = KernelEvaluator::new(&kernel, create(Device::Cpu, &options), &plan(2), &options);

        let a = array![[1.0, 2.0]];
        let b = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            evaluator.evaluate(a.view(), b.view()),
            Err(KrrError::KernelEvaluation(_))
        ));
    }

    #[test]
    fn test_mmv_fused_and_materialized_agree() {
        let kernel = GaussianKernel::new(1.0);
        let (a, b) = data();
        let v = array![[1.0], [2.0], [-1.0]];
        let expected = kernel.block(a.view(), b.view()).dot(&v);

        let options = Options::default();
        for fused in [false, true] {
            let plan = BlockPlan { fused, ..plan(3) };
            for device in [Device::Cpu, Device::Parallel] {
                let evaluator = KernelEvaluator::new(&kernel, create(device, &options), &plan, &options);
                assert_eq!(evaluator.is_fused(), fused);
                let got = evaluator.mmv(a.view(), b.view(), v.view()).unwrap();
                for (x, y) in got.iter().zip(expected.iter()) {
                    assert!((x - y).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_dmmv_right_hand_side_only() {
        let kernel = LinearKernel::new();
        let options = Options::default();
        let evaluator = KernelEvaluator::new(&kernel, create(Device::Cpu, &options), &plan(1), &options);
        let (a, b) = data();
        let w = array![[1.0], [0.0], [2.0], [-1.0]];

        let got = evaluator.dmmv(a.view(), b.view(), None, Some(w.view())).unwrap();
        let expected = kernel.block(a.view(), b.view()).t().dot(&w);
        for (x, y) in got.iter().zip(expected.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dmmv_requires_an_operand() {
        let kernel = LinearKernel::new();
        let options = Options::default();
        let evaluator = KernelEvaluator::new(&kernel, create(Device::Cpu, &options), &plan(1), &options);
        let (a, b) = data();
        assert!(evaluator.dmmv(a.view(), b.view(), None, None).is_err());
    }

    #[test]
    fn test_vector_row_mismatch() {
        let kernel = LinearKernel::new();
        let options = Options::default();
        let evaluator = KernelEvaluator::new(&kernel, create(Device::Cpu, &options), &plan(2), &options);
        let (a, b) = data();
        let v = array![[1.0], [2.0]];
        assert!(matches!(
            evaluator.mmv(a.view(), b.view(), v.view()),
            Err(KrrError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_single_precision_close_to_double() {
        let kernel = GaussianKernel::new(1.0);
        let (a, b) = data();
        let double = Options::default();
        let single = Options {
            kernel_precision: Precision::Single,
            ..Options::default()
        };

        let exact = KernelEvaluator::new(&kernel, create(Device::Cpu, &double), &plan(2), &double)
            .evaluate(a.view(), b.view())
            .unwrap();
        let rounded = KernelEvaluator::new(&kernel, create(Device::Cpu, &single), &plan(2), &single)
            .evaluate(a.view(), b.view())
            .unwrap();
        for (x, y) in exact.iter().zip(rounded.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
