//! Nystroem preconditioner
//!
//! Built from the centers alone. With `G = K_MM + s·I`:
//!
//! - `T` is upper triangular with `Tᵗ·T = G`,
//! - `A` is upper triangular with `Aᵗ·A = T·Tᵗ/M + λ·I`,
//!
//! and the preconditioner applies `P·r = T⁻¹·A⁻¹·A⁻ᵗ·T⁻ᵗ·r`, which inverts
//! `G²/M + λ·G`, an approximation of the Nystroem normal-equation operator.

pub mod cholesky;
pub mod dense;
pub mod lauum;

pub use self::cholesky::*;
pub use self::dense::*;
pub use self::lauum::*;

use crate::core::{KrrError, Options, Result};
use crate::kernel::KernelEvaluator;
use crate::planner::{BlockPlan, PreconditionerMode};
use crate::solver::Precondition;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};
use std::time::Instant;

/// Factored Nystroem preconditioner
#[derive(Debug, Clone)]
pub struct Preconditioner {
    t: Array2<f64>,
    a: Array2<f64>,
    shift: f64,
    penalty: f64,
    mode: PreconditionerMode,
}

impl Preconditioner {
    /// Evaluate `K_MM` and factor it
    ///
    /// The shift is `s = M·max(λ, pc_epsilon)`. A singular pivot triggers
    /// one retry with `M·sqrt(max(pc_epsilon, f64::EPSILON))` added on top of
    /// `s`, on a freshly evaluated `K_MM`; a second failure is returned.
    pub fn build(
        evaluator: &KernelEvaluator<'_>,
        centers: ArrayView2<f64>,
        penalty: f64,
        plan: &BlockPlan,
        options: &Options,
    ) -> Result<Self> {
        if centers.nrows() == 0 {
            return Err(KrrError::EmptyDataset);
        }
        let start = Instant::now();
        let m = centers.nrows() as f64;
        let floor = options.pc_epsilon();
        let shift = m * penalty.max(floor);

        let kmm = evaluator.evaluate(centers, centers)?;
        let built = match Self::factor(kmm, penalty, shift, floor, plan, evaluator) {
            Err(KrrError::PreconditionerSingular { index, pivot }) => {
                let raised = shift + m * floor.max(f64::EPSILON).sqrt();
                warn!(
                    "Preconditioner pivot {pivot:e} at index {index} below floor, retrying with shift {raised:e}"
                );
                // The failed attempt consumed K_MM
                let kmm = evaluator.evaluate(centers, centers)?;
                Self::factor(kmm, penalty, raised, floor, plan, evaluator)?
            }
            other => other?,
        };
        info!(
            "Preconditioner for {} centers built {} in {:.3}s (shift {:e})",
            centers.nrows(),
            match built.mode {
                PreconditionerMode::InCore => "in-core",
                PreconditionerMode::OutOfCore => "out-of-core",
            },
            start.elapsed().as_secs_f64(),
            built.shift
        );
        Ok(built)
    }

    /// Factor an evaluated `K_MM` with diagonal shift `shift`
    ///
    /// `kmm` is factored in place into `T`, so the build holds two `M×M`
    /// matrices at its peak. Pivots at or below `pivot_floor` are singular.
    pub fn factor(
        kmm: Array2<f64>,
        penalty: f64,
        shift: f64,
        pivot_floor: f64,
        plan: &BlockPlan,
        evaluator: &KernelEvaluator<'_>,
    ) -> Result<Self> {
        let m = kmm.nrows();
        let backend = evaluator.backend();

        let mut t = kmm;
        t.diag_mut().mapv_inplace(|d| d + shift);
        cholesky_upper(&mut t, plan.chol_block, plan.mode, pivot_floor, backend)?;
        debug!("T factor done (block {}, {:?})", plan.chol_block, plan.mode);

        let mut a = lauum_upper(t.view(), plan.lauum_block, backend);
        a /= m as f64;
        a.diag_mut().mapv_inplace(|d| d + penalty);
        cholesky_upper(&mut a, plan.chol_block, plan.mode, pivot_floor, backend)?;
        debug!("A factor done (block {})", plan.lauum_block);

        Ok(Self {
            t,
            a,
            shift,
            penalty,
            mode: plan.mode,
        })
    }

    /// Upper factor with `Tᵗ·T = K_MM + s·I`
    pub fn t(&self) -> &Array2<f64> {
        &self.t
    }

    /// Upper factor with `Aᵗ·A = T·Tᵗ/M + λ·I`
    pub fn a(&self) -> &Array2<f64> {
        &self.a
    }

    /// The shift `s` added to the diagonal of `K_MM`
    pub fn diagonal_shift(&self) -> f64 {
        self.shift
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn mode(&self) -> PreconditionerMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.t.nrows()
    }

    /// `T⁻¹·v`
    pub fn inv_t(&self, v: ArrayView2<f64>) -> Array2<f64> {
        solve_upper(self.t.view(), v)
    }

    /// `T⁻ᵗ·v`
    pub fn inv_tt(&self, v: ArrayView2<f64>) -> Array2<f64> {
        solve_upper_transpose(self.t.view(), v)
    }

    /// `A⁻¹·v`
    pub fn inv_a(&self, v: ArrayView2<f64>) -> Array2<f64> {
        solve_upper(self.a.view(), v)
    }

    /// `A⁻ᵗ·v`
    pub fn inv_at(&self, v: ArrayView2<f64>) -> Array2<f64> {
        solve_upper_transpose(self.a.view(), v)
    }

    /// `T⁻¹·A⁻¹·A⁻ᵗ·T⁻ᵗ·r`
    pub fn apply(&self, r: ArrayView2<f64>) -> Array2<f64> {
        solve_factor_pair(self.t.view(), self.a.view(), r)
    }
}

impl Precondition for Preconditioner {
    fn precondition(&self, r: ArrayView2<f64>) -> Array2<f64> {
        self.apply(r)
    }
}
