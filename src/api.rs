//! High-level API for kernel ridge regression
//!
//! This module provides a builder-style interface over the Nystroem solver,
//! including training, prediction, and model evaluation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rkrr::api::Krr;
//! use rkrr::kernel::GaussianKernel;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Krr::with_kernel(GaussianKernel::new(1.0))
//!     .with_penalty(1e-6)
//!     .with_centers(500)
//!     .fit_from_csv("train.csv", 1)?;
//!
//! let predictions = model.predict_from_csv("test.csv", 1)?;
//! println!("{} predictions, MSE {:.4}", predictions.nrows(), model.evaluate_from_csv("test.csv", 1)?);
//! # Ok(())
//! # }
//! ```

use crate::center::{CenterSelector, FixedCenters, UniformSelector};
use crate::core::{
    ConvergenceStatus, Dataset, ErrorMetric, FitConfig, FitReport, IterationReport, KrrError,
    Options, Regressor, Result,
};
use crate::data::CSVDataset;
use crate::kernel::{GaussianKernel, Kernel};
use crate::optimizer::{FittedModel, KrrOptimizer, Validation};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::path::Path;
use std::time::Duration;

/// Kernel ridge regression with builder-style configuration
pub struct Krr<K: Kernel = GaussianKernel> {
    kernel: K,
    config: FitConfig,
    selector: Option<Box<dyn CenterSelector>>,
}

impl Krr<GaussianKernel> {
    /// Create a model with a unit-bandwidth Gaussian kernel and default parameters
    pub fn new() -> Self {
        Self::with_kernel(GaussianKernel::default())
    }
}

impl Default for Krr<GaussianKernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Krr<K> {
    /// Create a model with a custom kernel
    pub fn with_kernel(kernel: K) -> Self {
        Self {
            kernel,
            config: FitConfig::default(),
            selector: None,
        }
    }

    /// Set the ridge penalty λ
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.config.penalty = penalty;
        self
    }

    /// Set the number of Nystroem centers M
    pub fn with_centers(mut self, n_centers: usize) -> Self {
        self.config.n_centers = n_centers;
        self
    }

    /// Set the CG iteration cap
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the seed of the uniform center sampler
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Replace the engine options
    pub fn with_options(mut self, options: Options) -> Self {
        self.config.options = options;
        self
    }

    /// Report train and validation errors every `every` iterations
    pub fn with_error_every(mut self, every: usize) -> Self {
        self.config.error_every = Some(every);
        self
    }

    /// Metric used for error reports
    pub fn with_error_metric(mut self, metric: ErrorMetric) -> Self {
        self.config.error_metric = metric;
        self
    }

    /// Stop CG once this much wall-clock time has passed
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.config.time_limit = Some(limit);
        self
    }

    /// Use a custom center selector instead of uniform sampling
    pub fn with_center_selector<S: CenterSelector + 'static>(mut self, selector: S) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit on features `x` (N×D) and targets `y` (N×T)
    pub fn fit(self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<TrainedModel<K>> {
        self.fit_with_callback(x, y, |_| {})
    }

    /// Fit on a single target column
    pub fn fit_targets(self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<TrainedModel<K>> {
        let y = y.insert_axis(Axis(1));
        self.fit(x, y)
    }

    /// Fit on a dataset
    pub fn fit_dataset<D: Dataset>(self, dataset: &D) -> Result<TrainedModel<K>> {
        self.fit(dataset.features(), dataset.targets())
    }

    /// Fit with an explicit center set
    pub fn fit_with_centers(
        mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        centers: Array2<f64>,
    ) -> Result<TrainedModel<K>> {
        self.config.n_centers = centers.nrows().max(1);
        self.with_center_selector(FixedCenters::new(centers)).fit(x, y)
    }

    /// Fit, observing every CG iteration
    pub fn fit_with_callback<F>(
        self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        mut callback: F,
    ) -> Result<TrainedModel<K>>
    where
        F: FnMut(&IterationReport),
    {
        self.run(x, y, None, &mut callback)
    }

    /// Fit while scoring held-out data every `error_every` iterations
    ///
    /// Error reporting defaults to every iteration when not configured.
    pub fn fit_with_validation<F>(
        mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        x_val: ArrayView2<f64>,
        y_val: ArrayView2<f64>,
        mut callback: F,
    ) -> Result<TrainedModel<K>>
    where
        F: FnMut(&IterationReport),
    {
        if self.config.error_every.is_none() {
            self.config.error_every = Some(1);
        }
        let validation = Validation {
            x: x_val.reborrow(),
            y: y_val.reborrow(),
        };
        self.run(x, y, Some(validation), &mut callback)
    }

    /// Fit from a CSV file whose last `n_targets` columns are targets
    pub fn fit_from_csv<P: AsRef<Path>>(self, path: P, n_targets: usize) -> Result<TrainedModel<K>> {
        if n_targets == 0 {
            return Err(KrrError::InvalidParameter(
                "Training data needs at least one target column".to_string(),
            ));
        }
        let dataset = CSVDataset::from_file(path, n_targets)?;
        self.fit_dataset(&dataset)
    }

    fn run(
        self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        validation: Option<Validation<'_>>,
        callback: &mut dyn FnMut(&IterationReport),
    ) -> Result<TrainedModel<K>> {
        let selector: Box<dyn CenterSelector> = match self.selector {
            Some(selector) => selector,
            None => Box::new(UniformSelector::new(self.config.seed)),
        };
        let optimizer = KrrOptimizer::new(self.kernel, self.config);
        let model = optimizer.fit_with(x, y, selector.as_ref(), validation, callback)?;
        Ok(TrainedModel { model })
    }
}

/// Fitted model with high-level prediction interface
pub struct TrainedModel<K: Kernel> {
    model: FittedModel<K>,
}

impl<K: Kernel> TrainedModel<K> {
    pub(crate) fn from_model(model: FittedModel<K>) -> Self {
        Self { model }
    }

    /// Predict targets for new points (n×D → n×T)
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.model.predict(x)
    }

    /// Predict a single target column
    pub fn predict_targets(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        if self.model.n_targets() != 1 {
            return Err(KrrError::DimensionMismatch {
                expected: 1,
                actual: self.model.n_targets(),
            });
        }
        Ok(self.model.predict(x)?.column(0).to_owned())
    }

    /// Predict from a dataset's features
    pub fn predict_dataset<D: Dataset>(&self, dataset: &D) -> Result<Array2<f64>> {
        self.model.predict(dataset.features())
    }

    /// Predict from CSV file; the last `n_targets` columns are ignored
    pub fn predict_from_csv<P: AsRef<Path>>(&self, path: P, n_targets: usize) -> Result<Array2<f64>> {
        let dataset = CSVDataset::from_file(path, n_targets)?;
        self.predict_dataset(&dataset)
    }

    /// Mean squared error on a dataset
    pub fn evaluate<D: Dataset>(&self, dataset: &D) -> Result<f64> {
        self.evaluate_with(dataset, ErrorMetric::MeanSquared)
    }

    /// Error on a dataset with a chosen metric
    pub fn evaluate_with<D: Dataset>(&self, dataset: &D, metric: ErrorMetric) -> Result<f64> {
        self.model
            .evaluate(dataset.features(), dataset.targets(), metric)
    }

    /// Mean squared error on a CSV file
    pub fn evaluate_from_csv<P: AsRef<Path>>(&self, path: P, n_targets: usize) -> Result<f64> {
        let dataset = CSVDataset::from_file(path, n_targets)?;
        self.evaluate(&dataset)
    }

    /// Get model information
    pub fn info(&self) -> ModelInfo {
        let report = self.model.report();
        ModelInfo {
            kernel: self.model.kernel().name().to_string(),
            n_centers: self.model.n_centers(),
            n_features: self.model.dim(),
            n_targets: self.model.n_targets(),
            penalty: self.model.penalty(),
            iterations: report.iterations,
            status: report.status,
            relative_residual: report.relative_residual,
        }
    }

    pub fn report(&self) -> &FitReport {
        self.model.report()
    }

    /// Get the underlying fitted model
    pub fn inner(&self) -> &FittedModel<K> {
        &self.model
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub kernel: String,
    pub n_centers: usize,
    pub n_features: usize,
    pub n_targets: usize,
    pub penalty: f64,
    pub iterations: usize,
    pub status: ConvergenceStatus,
    pub relative_residual: f64,
}

/// Convenience functions for quick operations
pub mod quick {
    use super::*;

    /// Fit a Gaussian model on CSV data with one target column and default parameters
    pub fn fit_csv<P: AsRef<Path>>(path: P, sigma: f64) -> Result<TrainedModel<GaussianKernel>> {
        Krr::with_kernel(GaussianKernel::new(sigma)).fit_from_csv(path, 1)
    }

    /// Quick evaluation: fit on the training file, report MSE on the test file
    pub fn evaluate_split<P1: AsRef<Path>, P2: AsRef<Path>>(
        train_path: P1,
        test_path: P2,
        sigma: f64,
    ) -> Result<f64> {
        let model = fit_csv(train_path, sigma)?;
        model.evaluate_from_csv(test_path, 1)
    }

    /// Hold-out validation with a sequential split (not randomized for reproducibility)
    pub fn simple_validation<D: Dataset>(
        dataset: &D,
        train_ratio: f64,
        sigma: f64,
        penalty: f64,
    ) -> Result<f64> {
        if train_ratio <= 0.0 || train_ratio >= 1.0 {
            return Err(KrrError::InvalidParameter(format!(
                "Train ratio must be between 0 and 1, got: {train_ratio}"
            )));
        }
        let n = dataset.len();
        let train_size = (n as f64 * train_ratio) as usize;
        if train_size == 0 || train_size == n {
            return Err(KrrError::EmptyDataset);
        }

        let (x, y) = (dataset.features(), dataset.targets());
        let (x_train, x_test) = x.split_at(Axis(0), train_size);
        let (y_train, y_test) = y.split_at(Axis(0), train_size);

        let model = Krr::with_kernel(GaussianKernel::new(sigma))
            .with_penalty(penalty)
            .fit(x_train, y_train)?;
        model
            .inner()
            .evaluate(x_test, y_test, ErrorMetric::MeanSquared)
    }
}
