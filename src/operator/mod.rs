//! Matrix-free Nystroem operator
//!
//! `H·v = (1/N)·K_nmᵗ·K_nm·v + λ·K_mm·v`, the Hessian of the penalized
//! Nystroem least-squares objective. `K_nm` is streamed through the
//! evaluator and never held beyond one tile.

use crate::core::{KrrError, Result};
use crate::kernel::KernelEvaluator;
use crate::solver::LinearOperator;
use ndarray::{Array2, ArrayView2};

pub struct NystromOperator<'a> {
    x: ArrayView2<'a, f64>,
    centers: ArrayView2<'a, f64>,
    evaluator: &'a KernelEvaluator<'a>,
    penalty: f64,
}

impl<'a> NystromOperator<'a> {
    pub fn new(
        x: ArrayView2<'a, f64>,
        centers: ArrayView2<'a, f64>,
        evaluator: &'a KernelEvaluator<'a>,
        penalty: f64,
    ) -> Result<Self> {
        if x.nrows() == 0 || centers.nrows() == 0 {
            return Err(KrrError::EmptyDataset);
        }
        if x.ncols() != centers.ncols() {
            return Err(KrrError::DimensionMismatch {
                expected: centers.ncols(),
                actual: x.ncols(),
            });
        }
        Ok(Self {
            x,
            centers,
            evaluator,
            penalty,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    /// Right-hand side `(1/N)·K_nmᵗ·Y`
    pub fn rhs(&self, y: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut b = self.evaluator.dmmv(self.x, self.centers, None, Some(y))?;
        b /= self.n_samples() as f64;
        Ok(b)
    }

    /// `H·v`
    pub fn apply(&self, v: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut out = self.evaluator.dmmv(self.x, self.centers, Some(v), None)?;
        out /= self.n_samples() as f64;
        if self.penalty != 0.0 {
            let kmm_v = self.evaluator.mmv(self.centers, self.centers, v)?;
            out.scaled_add(self.penalty, &kmm_v);
        }
        Ok(out)
    }

    /// Penalized objective `(1/N)·‖K_nm·α − Y‖² + λ·αᵗ·K_mm·α`, summed over columns
    pub fn objective(&self, alpha: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<f64> {
        let fitted = self.evaluator.mmv(self.x, self.centers, alpha)?;
        let loss = (&fitted - &y).iter().map(|r| r * r).sum::<f64>() / self.n_samples() as f64;
        let kmm_alpha = self.evaluator.mmv(self.centers, self.centers, alpha)?;
        let penalty = (&alpha * &kmm_alpha).sum();
        Ok(loss + self.penalty * penalty)
    }
}

impl LinearOperator for NystromOperator<'_> {
    fn dim(&self) -> usize {
        self.centers.nrows()
    }

    fn apply(&self, v: ArrayView2<f64>) -> Result<Array2<f64>> {
        NystromOperator::apply(self, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create;
    use crate::core::Options;
    use crate::kernel::{GaussianKernel, Kernel};
    use crate::planner::{plan, PlanRequest};
    use ndarray::{array, s};

    fn points() -> Array2<f64> {
        Array2::from_shape_fn((25, 3), |(i, j)| ((i + 1) as f64 * (j + 2) as f64 * 0.37).sin())
    }

    fn check<F>(options: Options, f: F)
    where
        F: Fn(&NystromOperator<'_>, &Array2<f64>, &Array2<f64>),
    {
        let kernel = GaussianKernel::new(0.8);
        let x = points();
        let centers = x.slice(s![..6, ..]).to_owned();
        let request = PlanRequest::new(25, 6, 3, 2).with_device_workers(3);
        let block_plan = plan(&request, &options).unwrap();
        let evaluator = KernelEvaluator::new(&kernel, create(block_plan.device, &options), &block_plan, &options);
        let op = NystromOperator::new(x.view(), centers.view(), &evaluator, 1e-2).unwrap();
        let knm = kernel.block(x.view(), centers.view());
        let kmm = kernel.block(centers.view(), centers.view());
        f(&op, &knm, &kmm);
    }

    #[test]
    fn test_apply_matches_dense() {
        let v = array![[1.0, 0.0], [0.5, -1.0], [0.0, 2.0], [-1.0, 0.0], [0.3, 0.3], [2.0, 1.0]];
        for no_fused in [false, true] {
            let options = Options {
                no_fused,
                max_cpu_mem: 4096,
                max_device_mem: 4096,
                ..Options::default()
            };
            check(options, |op, knm, kmm| {
                let expected = knm.t().dot(&knm.dot(&v)) / 25.0 + &(kmm.dot(&v) * 1e-2);
                let got = op.apply(v.view()).unwrap();
                for (a, b) in got.iter().zip(expected.iter()) {
                    assert!((a - b).abs() < 1e-12);
                }
                assert_eq!(LinearOperator::dim(op), 6);
            });
        }
    }

    #[test]
    fn test_rhs_matches_dense() {
        let y = Array2::from_shape_fn((25, 2), |(i, j)| i as f64 * 0.1 - j as f64);
        check(Options::default(), |op, knm, _| {
            let expected = knm.t().dot(&y) / 25.0;
            let got = op.rhs(y.view()).unwrap();
            for (a, b) in got.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
        });
    }

    #[test]
    fn test_objective_gradient_is_operator() {
        // ∇f(α) = 2·(H·α − b)
        let y = Array2::from_shape_fn((25, 1), |(i, _)| (i as f64 * 0.3).cos());
        check(Options::default(), |op, _, _| {
            let alpha = Array2::from_shape_fn((6, 1), |(i, _)| 0.1 * i as f64);
            let grad = (op.apply(alpha.view()).unwrap() - op.rhs(y.view()).unwrap()) * 2.0;
            let h = 1e-6;
            for i in 0..6 {
                let mut plus = alpha.clone();
                plus[[i, 0]] += h;
                let mut minus = alpha.clone();
                minus[[i, 0]] -= h;
                let numeric = (op.objective(plus.view(), y.view()).unwrap()
                    - op.objective(minus.view(), y.view()).unwrap())
                    / (2.0 * h);
                assert!((numeric - grad[[i, 0]]).abs() < 1e-6);
            }
        });
    }

    #[test]
    fn test_mismatched_dimensions() {
        let kernel = GaussianKernel::default();
        let options = Options::default();
        let block_plan = plan(&PlanRequest::new(2, 1, 2, 1), &options).unwrap();
        let evaluator = KernelEvaluator::new(&kernel, create(block_plan.device, &options), &block_plan, &options);
        let x = array![[0.0, 1.0], [1.0, 0.0]];
        let c = array![[0.0, 1.0, 2.0]];
        assert!(matches!(
            NystromOperator::new(x.view(), c.view(), &evaluator, 0.1),
            Err(KrrError::DimensionMismatch { .. })
        ));
    }
}
