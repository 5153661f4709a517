//! Core type definitions for kernel ridge regression

use crate::core::{KrrError, Result};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Working precision of kernel tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Precision {
    /// Kernel inputs and tile values are rounded through `f32`
    Single,
    /// Full `f64` throughout
    #[default]
    Double,
}

/// Engine configuration shared by fit and predict
///
/// Options are passed explicitly through every call; nothing here is global.
/// The epsilon pairs hold one default per working precision and are picked
/// through [`Options::pc_epsilon`] and [`Options::cg_epsilon`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Precision used when evaluating kernel tiles
    pub kernel_precision: Precision,
    /// Always factor the preconditioner in-core
    pub chol_force_in_core: bool,
    /// Always factor the preconditioner out-of-core
    pub chol_force_ooc: bool,
    /// Number of Cholesky blocks per worker
    pub chol_block_multiplier: usize,
    /// Number of LAUUM blocks per worker
    pub lauum_block_multiplier: usize,
    /// Diagonal floor of the preconditioner in single precision
    pub pc_epsilon_32: f64,
    /// Diagonal floor of the preconditioner in double precision
    pub pc_epsilon_64: f64,
    /// CG denominator guard in single precision
    pub cg_epsilon_32: f64,
    /// CG denominator guard in double precision
    pub cg_epsilon_64: f64,
    /// Relative residual at which CG stops
    pub cg_tolerance: f64,
    /// Recompute the residual from scratch every this many iterations
    pub cg_full_gradient_every: usize,
    /// Never use the parallel backend
    pub cpu_only: bool,
    /// Working memory budget of the parallel backend, in bytes
    pub max_device_mem: usize,
    /// Working memory budget of the sequential backend, in bytes
    pub max_cpu_mem: usize,
    /// Thread count of the parallel backend (rayon default when unset)
    pub device_threads: Option<usize>,
    /// Disable the fused kernel-vector product
    pub no_fused: bool,
    /// Per-iteration debug logging
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            kernel_precision: Precision::Double,
            chol_force_in_core: false,
            chol_force_ooc: false,
            chol_block_multiplier: 2,
            lauum_block_multiplier: 2,
            pc_epsilon_32: 1e-5,
            pc_epsilon_64: 1e-13,
            cg_epsilon_32: 1e-7,
            cg_epsilon_64: 1e-15,
            cg_tolerance: 1e-7,
            cg_full_gradient_every: 10,
            cpu_only: false,
            max_device_mem: 1 << 30, // 1GiB
            max_cpu_mem: 1 << 30,
            device_threads: None,
            no_fused: false,
            debug: false,
        }
    }
}

impl Options {
    /// Preconditioner diagonal floor for the configured precision
    pub fn pc_epsilon(&self) -> f64 {
        match self.kernel_precision {
            Precision::Single => self.pc_epsilon_32,
            Precision::Double => self.pc_epsilon_64,
        }
    }

    /// CG denominator guard for the configured precision
    pub fn cg_epsilon(&self) -> f64 {
        match self.kernel_precision {
            Precision::Single => self.cg_epsilon_32,
            Precision::Double => self.cg_epsilon_64,
        }
    }

    /// Reject contradictory or out-of-range settings
    pub fn validate(&self) -> Result<()> {
        if self.chol_force_in_core && self.chol_force_ooc {
            return Err(KrrError::InvalidParameter(
                "chol_force_in_core and chol_force_ooc are mutually exclusive".to_string(),
            ));
        }
        if self.chol_block_multiplier == 0 || self.lauum_block_multiplier == 0 {
            return Err(KrrError::InvalidParameter(
                "Block multipliers must be at least 1".to_string(),
            ));
        }
        if self.cg_full_gradient_every == 0 {
            return Err(KrrError::InvalidParameter(
                "cg_full_gradient_every must be at least 1".to_string(),
            ));
        }
        if !(self.cg_tolerance > 0.0) {
            return Err(KrrError::InvalidParameter(format!(
                "cg_tolerance must be positive, got: {}",
                self.cg_tolerance
            )));
        }
        for (name, value) in [
            ("pc_epsilon_32", self.pc_epsilon_32),
            ("pc_epsilon_64", self.pc_epsilon_64),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(KrrError::InvalidParameter(format!(
                    "{name} must be a finite non-negative number, got: {value}"
                )));
            }
        }
        for (name, value) in [
            ("cg_epsilon_32", self.cg_epsilon_32),
            ("cg_epsilon_64", self.cg_epsilon_64),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(KrrError::InvalidParameter(format!(
                    "{name} must be a finite positive number, got: {value}"
                )));
            }
        }
        if self.device_threads == Some(0) {
            return Err(KrrError::InvalidParameter(
                "device_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fit-level configuration: the model hyperparameters and stopping rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Ridge penalty λ
    pub penalty: f64,
    /// Number of Nystroem centers M (clamped to N)
    pub n_centers: usize,
    /// CG iteration cap
    pub max_iterations: usize,
    /// Seed of the uniform center sampler
    pub seed: u64,
    /// Report train/validation error every this many iterations
    pub error_every: Option<usize>,
    /// Metric used for error reports
    pub error_metric: ErrorMetric,
    /// Wall-clock limit of the CG phase
    pub time_limit: Option<Duration>,
    /// Engine options
    pub options: Options,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            penalty: 1e-6,
            n_centers: 1000,
            max_iterations: 20,
            seed: 0,
            error_every: None,
            error_metric: ErrorMetric::MeanSquared,
            time_limit: None,
            options: Options::default(),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.penalty.is_finite() || self.penalty < 0.0 {
            return Err(KrrError::InvalidParameter(format!(
                "Penalty must be a finite non-negative number, got: {}",
                self.penalty
            )));
        }
        if self.n_centers == 0 {
            return Err(KrrError::InvalidParameter(
                "Number of centers must be at least 1".to_string(),
            ));
        }
        if self.error_every == Some(0) {
            return Err(KrrError::InvalidParameter(
                "error_every must be at least 1".to_string(),
            ));
        }
        self.options.validate()
    }
}

/// How the CG solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// Relative residual fell below `cg_tolerance`
    Converged,
    /// Iteration cap hit first; alpha is the best iterate so far
    MaxIterReached,
    /// Wall-clock limit hit first
    TimeLimitReached,
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged)
    }
}

/// Summary of a completed fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Number of CG iterations performed
    pub iterations: usize,
    /// Why the solver stopped
    pub status: ConvergenceStatus,
    /// Largest relative preconditioned residual over target columns
    pub relative_residual: f64,
    /// Diagonal shift added to K_MM before factoring
    pub diagonal_shift: f64,
    /// Wall-clock time of the whole fit, in seconds
    pub elapsed_secs: f64,
}

/// Diagnostics handed to the iteration callback
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    /// One-based iteration index
    pub iteration: usize,
    /// Largest relative preconditioned residual over target columns
    pub relative_residual: f64,
    /// Time spent inside the solver so far
    pub elapsed: Duration,
    /// Training error, when error reporting is due this iteration
    pub train_error: Option<f64>,
    /// Validation error, when a validation set is configured and reporting is due
    pub validation_error: Option<f64>,
}

/// Error metric used for diagnostics and evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorMetric {
    #[default]
    MeanSquared,
    RootMeanSquared,
    MeanAbsolute,
}

impl ErrorMetric {
    /// Compute the metric over all entries of two equally shaped matrices
    pub fn compute(&self, truth: ArrayView2<f64>, predicted: ArrayView2<f64>) -> f64 {
        let count = truth.len();
        if count == 0 {
            return 0.0;
        }
        let diffs = truth.iter().zip(predicted.iter()).map(|(t, p)| t - p);
        match self {
            ErrorMetric::MeanSquared => diffs.map(|d| d * d).sum::<f64>() / count as f64,
            ErrorMetric::RootMeanSquared => {
                (diffs.map(|d| d * d).sum::<f64>() / count as f64).sqrt()
            }
            ErrorMetric::MeanAbsolute => diffs.map(f64::abs).sum::<f64>() / count as f64,
        }
    }
}
