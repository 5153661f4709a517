//! Preconditioned conjugate gradient
//!
//! Classical PCG on `H·x = b` where every column of `b` is an independent
//! right-hand side. All recurrence scalars (step, beta, residual norms) are
//! kept per column, so columns never mix.
//!
//! The solver moves through [`CgState`]: `Init` computes the initial
//! residual, `Iterating` runs the recursion, and the terminal states record
//! why it stopped. Convergence is measured on the preconditioned residual
//! relative to its initial value: `sqrt(rᵗPr / r₀ᵗPr₀) ≤ tolerance` for every
//! column. Once that residual is below `sqrt(epsilon)` and stops decreasing,
//! the working precision has been exhausted and the solve also counts as
//! converged.

use crate::core::{ConvergenceStatus, Options, Result};
use crate::solver::{LinearOperator, Precondition};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use std::time::{Duration, Instant};

/// Solver state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgState {
    Init,
    Iterating,
    Converged,
    MaxIterReached,
    TimeLimitReached,
}

impl CgState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CgState::Init | CgState::Iterating)
    }
}

/// Stopping rules and numerical guards for [`ConjugateGradient`]
#[derive(Debug, Clone, PartialEq)]
pub struct CgConfig {
    /// Iteration cap
    pub max_iterations: usize,
    /// Relative preconditioned residual at which the solver stops
    pub tolerance: f64,
    /// Relative breakdown threshold: a column whose curvature `pᵗHp` is at
    /// or below `epsilon·rᵗPr` takes no step. Its square root is the
    /// residual floor below which stagnation stops the solve.
    pub epsilon: f64,
    /// Recompute `r = b − H·x` from scratch every this many iterations
    pub full_gradient_every: usize,
    /// Optional wall-clock limit
    pub time_limit: Option<Duration>,
    /// Log every iteration at debug level
    pub debug: bool,
}

impl Default for CgConfig {
    fn default() -> Self {
        Self::from_options(&Options::default(), 20)
    }
}

impl CgConfig {
    pub fn from_options(options: &Options, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            tolerance: options.cg_tolerance,
            epsilon: options.cg_epsilon(),
            full_gradient_every: options.cg_full_gradient_every.max(1),
            time_limit: None,
            debug: options.debug,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }
}

/// Progress handed to the per-iteration callback
#[derive(Debug)]
pub struct CgProgress<'a> {
    /// One-based iteration index
    pub iteration: usize,
    /// Largest relative preconditioned residual over columns
    pub relative_residual: f64,
    /// Time since the solver started
    pub elapsed: Duration,
    /// Current iterate
    pub solution: ArrayView2<'a, f64>,
}

/// Result of a solve
#[derive(Debug, Clone)]
pub struct CgOutcome {
    pub solution: Array2<f64>,
    pub iterations: usize,
    pub status: ConvergenceStatus,
    pub relative_residual: f64,
}

/// Preconditioned conjugate gradient solver
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    config: CgConfig,
    state: CgState,
}

impl ConjugateGradient {
    pub fn new(config: CgConfig) -> Self {
        Self {
            config,
            state: CgState::Init,
        }
    }

    pub fn config(&self) -> &CgConfig {
        &self.config
    }

    /// State reached by the last call to [`solve`](Self::solve)
    pub fn state(&self) -> CgState {
        self.state
    }

    /// Solve `H·x = b` starting from `x0` (zero when absent)
    ///
    /// The callback observes every iteration but cannot influence it.
    pub fn solve(
        &mut self,
        op: &dyn LinearOperator,
        preconditioner: &dyn Precondition,
        b: ArrayView2<f64>,
        x0: Option<ArrayView2<f64>>,
        callback: &mut dyn FnMut(&CgProgress<'_>),
    ) -> Result<CgOutcome> {
        let start = Instant::now();
        self.state = CgState::Init;
        let eps = self.config.epsilon;

        let (mut x, mut r) = match x0 {
            Some(x0) => {
                let x = x0.to_owned();
                let r = &b - &op.apply(x.view())?;
                (x, r)
            }
            None => (Array2::zeros(b.raw_dim()), b.to_owned()),
        };
        let mut z = preconditioner.precondition(r.view());
        let mut rz = column_dots(&r, &z);
        let rz0 = rz.clone();

        if rz0.iter().all(|&v| v <= 0.0) {
            self.state = CgState::Converged;
            debug!("Right-hand side is zero, nothing to solve");
            return Ok(CgOutcome {
                solution: x,
                iterations: 0,
                status: ConvergenceStatus::Converged,
                relative_residual: 0.0,
            });
        }

        let mut p = z.clone();
        let mut residual = 1.0;
        let mut previous = f64::INFINITY;
        let floor = eps.max(0.0).sqrt();
        let mut iterations = 0;
        self.state = CgState::Iterating;

        while self.state == CgState::Iterating {
            if iterations >= self.config.max_iterations {
                self.state = CgState::MaxIterReached;
                break;
            }
            iterations += 1;

            let hp = op.apply(p.view())?;
            let php = column_dots(&p, &hp);
            let step = Zip::from(&rz).and(&php).map_collect(|&rz, &php| {
                if rz > 0.0 && php > eps * rz {
                    rz / php
                } else {
                    0.0
                }
            });

            x += &(&p * &step);
            if iterations % self.config.full_gradient_every == 0 {
                r = &b - &op.apply(x.view())?;
            } else {
                r -= &(&hp * &step);
            }

            z = preconditioner.precondition(r.view());
            let rz_new = column_dots(&r, &z);
            residual = relative_residual(&rz_new, &rz0);

            let elapsed = start.elapsed();
            if self.config.debug {
                debug!(
                    "CG iteration {iterations}: relative residual {residual:.3e} ({:.3}s)",
                    elapsed.as_secs_f64()
                );
            }
            callback(&CgProgress {
                iteration: iterations,
                relative_residual: residual,
                elapsed,
                solution: x.view(),
            });

            if residual <= self.config.tolerance {
                self.state = CgState::Converged;
                break;
            }
            if residual <= floor && residual >= previous {
                debug!("CG residual stagnated at {residual:.3e}, below the precision floor {floor:.3e}");
                self.state = CgState::Converged;
                break;
            }
            previous = residual;
            if let Some(limit) = self.config.time_limit {
                if elapsed >= limit {
                    self.state = CgState::TimeLimitReached;
                    break;
                }
            }

            let beta = Zip::from(&rz_new)
                .and(&rz)
                .map_collect(|&new, &old| if old > 0.0 { new / old } else { 0.0 });
            p = &z + &(&p * &beta);
            rz = rz_new;
        }

        let status = match self.state {
            CgState::Converged => {
                info!("CG converged in {iterations} iterations (residual {residual:.3e})");
                ConvergenceStatus::Converged
            }
            CgState::TimeLimitReached => {
                warn!("CG stopped by time limit after {iterations} iterations (residual {residual:.3e})");
                ConvergenceStatus::TimeLimitReached
            }
            _ => {
                warn!(
                    "CG did not converge in {iterations} iterations (residual {residual:.3e}, tolerance {:.3e})",
                    self.config.tolerance
                );
                ConvergenceStatus::MaxIterReached
            }
        };

        Ok(CgOutcome {
            solution: x,
            iterations,
            status,
            relative_residual: residual,
        })
    }
}

/// `aᵢᵗ·bᵢ` for every column `i`
fn column_dots(a: &Array2<f64>, b: &Array2<f64>) -> Array1<f64> {
    (a * b).sum_axis(Axis(0))
}

/// `max_i sqrt(rzᵢ / rz0ᵢ)`, ignoring columns that started at zero
fn relative_residual(rz: &Array1<f64>, rz0: &Array1<f64>) -> f64 {
    rz.iter()
        .zip(rz0.iter())
        .filter(|(_, &initial)| initial > 0.0)
        .map(|(&current, &initial)| (current.max(0.0) / initial).sqrt())
        .fold(0.0, f64::max)
}
