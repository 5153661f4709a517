//! Large-scale kernel ridge regression
//!
//! Fits `f(x) = Σ_j α_j k(x, c_j)` over a Nystroem subset of centers by
//! solving the regularized normal equations with conjugate gradient,
//! preconditioned by a Cholesky-based approximation of the center kernel.

pub mod api;
pub mod backend;
pub mod center;
pub mod core;
pub mod data;
pub mod kernel;
pub mod operator;
pub mod optimizer;
pub mod persistence;
pub mod planner;
pub mod precond;
pub mod solver;

// Re-export main types for convenience
pub use crate::api::{Krr, ModelInfo, TrainedModel};
pub use crate::center::{CenterSelector, FixedCenters, UniformSelector};
pub use crate::core::error::{KrrError, Result};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::data::CSVDataset;
pub use crate::kernel::{
    GaussianKernel, Kernel, KernelSpec, LaplacianKernel, LinearKernel, PolynomialKernel,
};
pub use crate::optimizer::{FittedModel, KrrOptimizer};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
