//! Core traits for kernel ridge regression

use crate::core::Result;
use ndarray::{Array2, ArrayView2};

/// Dense dataset abstraction
pub trait Dataset: Send + Sync {
    /// Feature matrix, one row per sample (N×D)
    fn features(&self) -> ArrayView2<'_, f64>;

    /// Target matrix, one row per sample (N×T)
    fn targets(&self) -> ArrayView2<'_, f64>;

    /// Number of samples in the dataset
    fn len(&self) -> usize {
        self.features().nrows()
    }

    /// Number of features (dimensionality)
    fn dim(&self) -> usize {
        self.features().ncols()
    }

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fitted regression model
pub trait Regressor: Send + Sync {
    /// Predict targets for new points (n×D in, n×T out)
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Number of inducing points the model was fitted on
    fn n_centers(&self) -> usize;

    /// Number of target columns
    fn n_targets(&self) -> usize;
}
