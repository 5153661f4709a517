//! Fit orchestration
//!
//! Ties center selection, planning, the preconditioner, the Nystroem
//! operator and the CG solver together into a [`FittedModel`].

use crate::backend::{create, Backend};
use crate::center::{CenterSelector, UniformSelector};
use crate::core::{
    ErrorMetric, FitConfig, FitReport, IterationReport, KrrError, Options, Regressor, Result,
};
use crate::kernel::{Kernel, KernelEvaluator};
use crate::operator::NystromOperator;
use crate::planner::{plan, BlockPlan, PlanRequest};
use crate::precond::Preconditioner;
use crate::solver::{CgConfig, ConjugateGradient};
use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Held-out data scored during the fit
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: ArrayView2<'a, f64>,
}

/// Fits Nystroem kernel ridge regression with a fixed kernel and configuration
pub struct KrrOptimizer<K: Kernel> {
    kernel: Arc<K>,
    config: FitConfig,
}

impl<K: Kernel> KrrOptimizer<K> {
    pub fn new(kernel: K, config: FitConfig) -> Self {
        Self {
            kernel: Arc::new(kernel),
            config,
        }
    }

    /// Create an optimizer with the default configuration
    pub fn with_kernel(kernel: K) -> Self {
        Self::new(kernel, FitConfig::default())
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Fit with uniformly sampled centers
    pub fn fit(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<FittedModel<K>> {
        let selector = UniformSelector::new(self.config.seed);
        self.fit_with(x, y, &selector, None, &mut |_| {})
    }

    /// Fit with a custom center selector, optional validation data and an
    /// iteration callback
    pub fn fit_with(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        selector: &dyn CenterSelector,
        validation: Option<Validation<'_>>,
        callback: &mut dyn FnMut(&IterationReport),
    ) -> Result<FittedModel<K>> {
        let start = Instant::now();
        self.config.validate()?;
        check_training_data(x, y)?;
        if let Some(v) = validation {
            check_validation(x, y, v)?;
        }

        let (n, d, t) = (x.nrows(), x.ncols(), y.ncols());
        if self.config.n_centers > n {
            warn!(
                "Requested {} centers but only {n} points are available, using {n}",
                self.config.n_centers
            );
        }
        let centers = selector.select(x, self.config.n_centers.min(n))?;
        if centers.ncols() != d {
            return Err(KrrError::DimensionMismatch {
                expected: d,
                actual: centers.ncols(),
            });
        }
        let m = centers.nrows();
        info!(
            "Fitting {} kernel ridge regression: {n} points, {d} features, {t} targets, {m} centers, penalty {:e}",
            self.kernel.name(),
            self.config.penalty
        );

        let (block_plan, backend, options) =
            plan_and_create(PlanRequest::new(n, m, d, t), &self.config.options)?;
        let evaluator =
            KernelEvaluator::new(self.kernel.as_ref(), Arc::clone(&backend), &block_plan, &options);

        let preconditioner = Preconditioner::build(
            &evaluator,
            centers.view(),
            self.config.penalty,
            &block_plan,
            &options,
        )?;
        let operator =
            NystromOperator::new(x.reborrow(), centers.view(), &evaluator, self.config.penalty)?;
        let b = operator.rhs(y)?;

        let cg_config = CgConfig::from_options(&options, self.config.max_iterations)
            .with_time_limit(self.config.time_limit);
        let mut solver = ConjugateGradient::new(cg_config);
        let metric = self.config.error_metric;
        let error_every = self.config.error_every;

        let outcome = solver.solve(
            &operator,
            &preconditioner,
            b.view(),
            None,
            &mut |progress| {
                let due = error_every.is_some_and(|k| progress.iteration % k == 0);
                let (train_error, validation_error) = if due {
                    let train = score(&evaluator, centers.view(), progress.solution, x, y, metric);
                    let held_out = validation.and_then(|v| {
                        score(&evaluator, centers.view(), progress.solution, v.x, v.y, metric)
                    });
                    match held_out {
                        Some(v) => info!(
                            "Iteration {}: train {metric:?} {:.6e}, validation {metric:?} {v:.6e}",
                            progress.iteration,
                            train.unwrap_or(f64::NAN)
                        ),
                        None => info!(
                            "Iteration {}: train {metric:?} {:.6e}",
                            progress.iteration,
                            train.unwrap_or(f64::NAN)
                        ),
                    }
                    (train, held_out)
                } else {
                    (None, None)
                };
                callback(&IterationReport {
                    iteration: progress.iteration,
                    relative_residual: progress.relative_residual,
                    elapsed: progress.elapsed,
                    train_error,
                    validation_error,
                });
            },
        )?;

        let report = FitReport {
            iterations: outcome.iterations,
            status: outcome.status,
            relative_residual: outcome.relative_residual,
            diagonal_shift: preconditioner.diagonal_shift(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            "Fit finished in {:.3}s: {:?} after {} iterations",
            report.elapsed_secs, report.status, report.iterations
        );

        let model = FittedModel::from_parts(
            Arc::clone(&self.kernel),
            centers,
            outcome.solution,
            self.config.penalty,
            self.config.options.clone(),
            report,
        );
        // Fresh cell, cannot already be set
        let _ = model.runtime.set(Runtime { backend, options });
        Ok(model)
    }
}

/// Plan, then instantiate the planned backend
///
/// When the parallel pool cannot be built the plan is redone for the CPU,
/// so block sizes always match the backend actually used.
fn plan_and_create(
    request: PlanRequest,
    options: &Options,
) -> Result<(BlockPlan, Arc<dyn Backend>, Options)> {
    let request = match options.device_threads {
        Some(threads) => request.with_device_workers(threads),
        None => request,
    };
    let block_plan = plan(&request, options)?;
    let backend = create(block_plan.device, options);
    if backend.device() == block_plan.device {
        return Ok((block_plan, backend, options.clone()));
    }
    let fallback = Options {
        cpu_only: true,
        ..options.clone()
    };
    let block_plan = plan(&request, &fallback)?;
    Ok((block_plan, backend, fallback))
}

fn check_training_data(x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(KrrError::EmptyDataset);
    }
    if x.ncols() == 0 {
        return Err(KrrError::InvalidParameter(
            "Training points have no features".to_string(),
        ));
    }
    if y.nrows() != x.nrows() {
        return Err(KrrError::DimensionMismatch {
            expected: x.nrows(),
            actual: y.nrows(),
        });
    }
    if y.ncols() == 0 {
        return Err(KrrError::InvalidParameter(
            "Targets must have at least one column".to_string(),
        ));
    }
    Ok(())
}

fn check_validation(x: ArrayView2<f64>, y: ArrayView2<f64>, v: Validation<'_>) -> Result<()> {
    if v.x.ncols() != x.ncols() {
        return Err(KrrError::DimensionMismatch {
            expected: x.ncols(),
            actual: v.x.ncols(),
        });
    }
    if v.y.ncols() != y.ncols() {
        return Err(KrrError::DimensionMismatch {
            expected: y.ncols(),
            actual: v.y.ncols(),
        });
    }
    if v.y.nrows() != v.x.nrows() {
        return Err(KrrError::DimensionMismatch {
            expected: v.x.nrows(),
            actual: v.y.nrows(),
        });
    }
    Ok(())
}

/// Error of the current iterate on one data set; failures are logged, not raised
fn score(
    evaluator: &KernelEvaluator<'_>,
    centers: ArrayView2<f64>,
    alpha: ArrayView2<f64>,
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    metric: ErrorMetric,
) -> Option<f64> {
    match evaluator.mmv(x, centers, alpha) {
        Ok(predicted) => Some(metric.compute(y, predicted.view())),
        Err(e) => {
            warn!("Could not compute {metric:?} during fit: {e}");
            None
        }
    }
}

/// Backend kept alive between predictions, with the options it was planned under
#[derive(Debug, Clone)]
struct Runtime {
    backend: Arc<dyn Backend>,
    options: Options,
}

/// A fitted Nystroem kernel ridge regression model
///
/// Immutable after fit; prediction is `K(x, centers)·alpha`. The backend
/// used by the fit is reused by every prediction; a loaded model creates
/// one on its first prediction.
#[derive(Debug, Clone)]
pub struct FittedModel<K: Kernel> {
    kernel: Arc<K>,
    centers: Array2<f64>,
    alpha: Array2<f64>,
    penalty: f64,
    options: Options,
    report: FitReport,
    runtime: OnceLock<Runtime>,
}

impl<K: Kernel> FittedModel<K> {
    pub(crate) fn from_parts(
        kernel: Arc<K>,
        centers: Array2<f64>,
        alpha: Array2<f64>,
        penalty: f64,
        options: Options,
        report: FitReport,
    ) -> Self {
        Self {
            kernel,
            centers,
            alpha,
            penalty,
            options,
            report,
            runtime: OnceLock::new(),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let request = PlanRequest::new(1, self.n_centers(), self.dim(), self.n_targets());
        let (_, backend, options) = plan_and_create(request, &self.options)?;
        Ok(self.runtime.get_or_init(|| Runtime { backend, options }))
    }

    /// Predict targets for `x` (n×D → n×T), streamed in planner row blocks
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.dim() {
            return Err(KrrError::DimensionMismatch {
                expected: self.dim(),
                actual: x.ncols(),
            });
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, self.n_targets())));
        }
        let runtime = self.runtime()?;
        let request = PlanRequest::new(x.nrows(), self.n_centers(), self.dim(), self.n_targets())
            .with_device_workers(runtime.backend.workers());
        let block_plan = plan(&request, &runtime.options)?;
        let backend = if block_plan.device == runtime.backend.device() {
            Arc::clone(&runtime.backend)
        } else {
            create(block_plan.device, &runtime.options)
        };
        let evaluator = KernelEvaluator::new(self.kernel.as_ref(), backend, &block_plan, &runtime.options);
        evaluator.mmv(x, self.centers.view(), self.alpha.view())
    }

    /// Score predictions on `x` against `y`
    pub fn evaluate(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        metric: ErrorMetric,
    ) -> Result<f64> {
        if y.nrows() != x.nrows() {
            return Err(KrrError::DimensionMismatch {
                expected: x.nrows(),
                actual: y.nrows(),
            });
        }
        if y.ncols() != self.n_targets() {
            return Err(KrrError::DimensionMismatch {
                expected: self.n_targets(),
                actual: y.ncols(),
            });
        }
        let predicted = self.predict(x)?;
        Ok(metric.compute(y, predicted.view()))
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }

    /// Coefficient matrix (M×T)
    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn report(&self) -> &FitReport {
        &self.report
    }

    /// Feature dimension
    pub fn dim(&self) -> usize {
        self.centers.ncols()
    }
}

impl<K: Kernel> Regressor for FittedModel<K> {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        FittedModel::predict(self, x)
    }

    fn n_centers(&self) -> usize {
        self.centers.nrows()
    }

    fn n_targets(&self) -> usize {
        self.alpha.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::center::FixedCenters;
    use crate::core::ConvergenceStatus;
    use crate::kernel::{GaussianKernel, LinearKernel};
    use ndarray::{array, Axis};

    fn sine_data(n: usize) -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / n as f64);
        let y = x.mapv(|v| (6.0 * v).sin());
        (x, y)
    }

    fn config(centers: usize, max_iterations: usize) -> FitConfig {
        FitConfig {
            penalty: 1e-4,
            n_centers: centers,
            max_iterations,
            ..FitConfig::default()
        }
    }

    #[test]
    fn test_optimizer_creation() {
        let optimizer = KrrOptimizer::with_kernel(LinearKernel::new());
        assert_eq!(optimizer.config().penalty, 1e-6);
        assert_eq!(optimizer.kernel().name(), "linear");
    }

    #[test]
    fn test_fit_sine() {
        let (x, y) = sine_data(80);
        let optimizer = KrrOptimizer::new(GaussianKernel::new(0.2), config(30, 50));
        let model = optimizer
            .fit(x.view(), y.view())
            .expect("Training should succeed");

        assert_eq!(model.n_centers(), 30);
        assert_eq!(model.n_targets(), 1);
        assert_eq!(model.alpha().dim(), (30, 1));
        let mse = model
            .evaluate(x.view(), y.view(), ErrorMetric::MeanSquared)
            .unwrap();
        assert!(mse < 1e-3, "mse {mse}");
    }

    #[test]
    fn test_centers_clamped_to_dataset() {
        let (x, y) = sine_data(10);
        let model = KrrOptimizer::new(GaussianKernel::new(0.3), config(50, 20))
            .fit(x.view(), y.view())
            .unwrap();
        assert_eq!(model.n_centers(), 10);
    }

    #[test]
    fn test_mismatched_targets() {
        let (x, _) = sine_data(10);
        let y = Array2::zeros((9, 1));
        let result = KrrOptimizer::with_kernel(LinearKernel::new()).fit(x.view(), y.view());
        assert!(matches!(
            result,
            Err(KrrError::DimensionMismatch { expected: 10, actual: 9 })
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array2::<f64>::zeros((0, 1));
        let result = KrrOptimizer::with_kernel(LinearKernel::new()).fit(x.view(), y.view());
        assert!(matches!(result, Err(KrrError::EmptyDataset)));
    }

    #[test]
    fn test_callback_reports_errors() {
        let (x, y) = sine_data(40);
        let (xv, yv) = sine_data(15);
        let optimizer = KrrOptimizer::new(
            GaussianKernel::new(0.2),
            FitConfig {
                error_every: Some(2),
                ..config(20, 6)
            },
        );

        let mut reports = Vec::new();
        let model = optimizer
            .fit_with(
                x.view(),
                y.view(),
                &UniformSelector::new(1),
                Some(Validation {
                    x: xv.view(),
                    y: yv.view(),
                }),
                &mut |r| reports.push(r.clone()),
            )
            .unwrap();

        assert_eq!(reports.len(), model.report().iterations);
        for r in &reports {
            let due = r.iteration % 2 == 0;
            assert_eq!(r.train_error.is_some(), due);
            assert_eq!(r.validation_error.is_some(), due);
        }
    }

    #[test]
    fn test_fixed_centers_and_multiple_targets() {
        let (x, y) = sine_data(30);
        let mut targets = y.clone();
        targets.append(Axis(1), (&y * 2.0).view()).unwrap();
        let centers = x.select(Axis(0), &[0, 5, 10, 15, 20, 25]);

        let model = KrrOptimizer::new(GaussianKernel::new(0.3), config(6, 30))
            .fit_with(
                x.view(),
                targets.view(),
                &FixedCenters::new(centers.clone()),
                None,
                &mut |_| {},
            )
            .unwrap();
        assert_eq!(model.centers(), &centers);

        let pred = model.predict(x.view()).unwrap();
        for row in pred.outer_iter() {
            assert!((row[1] - 2.0 * row[0]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_predictions_reuse_backend() {
        let (x, y) = sine_data(40);
        let model = KrrOptimizer::new(GaussianKernel::new(0.2), config(10, 10))
            .fit(x.view(), y.view())
            .unwrap();
        let fitted = Arc::clone(&model.runtime.get().unwrap().backend);
        let first = model.predict(x.view()).unwrap();
        let second = model.predict(x.view()).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&fitted, &model.runtime.get().unwrap().backend));

        // Rebuilt from parts, as after loading: backend created once on demand
        let loaded = FittedModel::from_parts(
            Arc::new(GaussianKernel::new(0.2)),
            model.centers().clone(),
            model.alpha().clone(),
            model.penalty(),
            model.options().clone(),
            model.report().clone(),
        );
        assert!(loaded.runtime.get().is_none());
        let reloaded = loaded.predict(x.view()).unwrap();
        for (a, b) in reloaded.iter().zip(first.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        let created = Arc::clone(&loaded.runtime.get().unwrap().backend);
        loaded.predict(x.view()).unwrap();
        assert!(Arc::ptr_eq(&created, &loaded.runtime.get().unwrap().backend));
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let (x, y) = sine_data(10);
        let model = KrrOptimizer::new(LinearKernel::new(), config(5, 5))
            .fit(x.view(), y.view())
            .unwrap();
        let wrong = array![[1.0, 2.0]];
        assert!(matches!(
            model.predict(wrong.view()),
            Err(KrrError::DimensionMismatch { expected: 1, actual: 2 })
        ));
        assert_eq!(model.predict(Array2::zeros((0, 1)).view()).unwrap().dim(), (0, 1));
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let (x, y) = sine_data(50);
        let model = KrrOptimizer::new(GaussianKernel::new(0.1), config(50, 1))
            .fit(x.view(), y.view())
            .unwrap();
        assert_eq!(model.report().iterations, 1);
        assert_eq!(model.report().status, ConvergenceStatus::MaxIterReached);
    }
}
