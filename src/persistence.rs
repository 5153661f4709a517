//! Model serialization and persistence
//!
//! This module provides functionality to save and load fitted models for
//! use with the CLI application and other scenarios where model persistence
//! is needed. The kernel travels as a [`KernelSpec`], so any built-in kernel
//! can be restored without knowing its concrete type.

use crate::api::TrainedModel;
use crate::core::{FitReport, KrrError, Options, Regressor, Result};
use crate::kernel::{Kernel, KernelSpec};
use crate::optimizer::FittedModel;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

/// Serializable representation of a fitted model
#[derive(Debug, Serialize, Deserialize)]
pub struct SerializableModel {
    /// Kernel and its hyperparameters
    pub kernel: KernelSpec,
    /// Nystroem centers (M×D)
    pub centers: Array2<f64>,
    /// Coefficients (M×T)
    pub alpha: Array2<f64>,
    /// Ridge penalty the model was fitted with
    pub penalty: f64,
    /// Engine options, reused at prediction time
    pub options: Options,
    /// Model metadata
    pub metadata: ModelMetadata,
}

/// Model metadata for tracking and validation
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    pub n_centers: usize,
    pub n_features: usize,
    pub n_targets: usize,
    /// Outcome of the fit
    pub report: FitReport,
    /// Creation timestamp
    pub created_at: String,
}

impl SerializableModel {
    /// Create a serializable model from a fitted model
    pub fn from_trained_model<K>(model: &TrainedModel<K>) -> Self
    where
        K: Kernel + Clone + Into<KernelSpec>,
    {
        Self::from_fitted(model.inner())
    }

    pub fn from_fitted<K>(model: &FittedModel<K>) -> Self
    where
        K: Kernel + Clone + Into<KernelSpec>,
    {
        Self {
            kernel: model.kernel().clone().into(),
            centers: model.centers().clone(),
            alpha: model.alpha().clone(),
            penalty: model.penalty(),
            options: model.options().clone(),
            metadata: ModelMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                n_centers: model.n_centers(),
                n_features: model.dim(),
                n_targets: model.n_targets(),
                report: model.report().clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    /// Save model to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Load model from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: Self = serde_json::from_reader(reader)?;
        model.validate()?;
        Ok(model)
    }

    /// Check that the stored arrays and kernel describe a usable model
    pub fn validate(&self) -> Result<()> {
        self.kernel.validate()?;
        self.options.validate()?;
        if self.centers.nrows() == 0 {
            return Err(KrrError::EmptyDataset);
        }
        if self.alpha.nrows() != self.centers.nrows() {
            return Err(KrrError::DimensionMismatch {
                expected: self.centers.nrows(),
                actual: self.alpha.nrows(),
            });
        }
        if self.alpha.ncols() == 0 {
            return Err(KrrError::InvalidParameter(
                "Stored model has no target columns".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert back to a trained model
    pub fn to_trained_model(&self) -> Result<TrainedModel<KernelSpec>> {
        self.validate()?;
        let fitted = FittedModel::from_parts(
            Arc::new(self.kernel),
            self.centers.clone(),
            self.alpha.clone(),
            self.penalty,
            self.options.clone(),
            self.metadata.report.clone(),
        );
        Ok(TrainedModel::from_model(fitted))
    }

    /// Print model summary
    pub fn print_summary(&self) {
        println!("=== KRR Model Summary ===");
        println!("Kernel: {}", serde_json::to_string(&self.kernel).unwrap_or_default());
        println!("Centers: {}", self.metadata.n_centers);
        println!("Features: {}", self.metadata.n_features);
        println!("Targets: {}", self.metadata.n_targets);
        println!("Penalty: {:e}", self.penalty);
        println!("Library Version: {}", self.metadata.library_version);
        println!("Created: {}", self.metadata.created_at);
        println!("Fit:");
        println!("  Status: {:?}", self.metadata.report.status);
        println!("  Iterations: {}", self.metadata.report.iterations);
        println!(
            "  Relative Residual: {:.3e}",
            self.metadata.report.relative_residual
        );
        println!("  Diagonal Shift: {:.3e}", self.metadata.report.diagonal_shift);
        println!("  Elapsed: {:.3}s", self.metadata.report.elapsed_secs);
    }
}
