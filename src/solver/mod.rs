//! Iterative solvers for the regularized normal equations
//!
//! The solver only sees the system through two seams: a symmetric
//! positive (semi-)definite [`LinearOperator`] and a [`Precondition`]er
//! approximating its inverse. Both act on M×T matrices, one column per
//! target.

pub mod cg;

pub use self::cg::*;

use crate::core::Result;
use ndarray::{Array2, ArrayView2};

/// Matrix-free symmetric operator `v ↦ H·v`
pub trait LinearOperator {
    /// Number of rows (and columns) of `H`
    fn dim(&self) -> usize;

    /// Apply the operator to every column of `v`
    fn apply(&self, v: ArrayView2<f64>) -> Result<Array2<f64>>;
}

/// Approximate inverse `r ↦ P·r` of a [`LinearOperator`]
pub trait Precondition {
    fn precondition(&self, r: ArrayView2<f64>) -> Array2<f64>;
}

/// `P = I`; turns the solver into plain conjugate gradient
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Precondition for IdentityPreconditioner {
    fn precondition(&self, r: ArrayView2<f64>) -> Array2<f64> {
        r.to_owned()
    }
}
