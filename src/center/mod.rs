//! Center (inducing point) selection

use crate::core::{KrrError, Result};
use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Picks the M points spanning the Nystroem subspace
pub trait CenterSelector: Send + Sync {
    /// Return an M×D matrix of centers for the training points `x`
    fn select(&self, x: ArrayView2<f64>, m: usize) -> Result<Array2<f64>>;
}

/// Uniform sampling of training rows without replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSelector {
    seed: u64,
}

impl UniformSelector {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Row indices chosen for `n` points; sorted so centers keep data order
    pub fn indices(&self, n: usize, m: usize) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked = index::sample(&mut rng, n, m.min(n)).into_vec();
        picked.sort_unstable();
        picked
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CenterSelector for UniformSelector {
    fn select(&self, x: ArrayView2<f64>, m: usize) -> Result<Array2<f64>> {
        if x.nrows() == 0 {
            return Err(KrrError::EmptyDataset);
        }
        if m == 0 {
            return Err(KrrError::InvalidParameter(
                "Number of centers must be at least 1".to_string(),
            ));
        }
        let picked = self.indices(x.nrows(), m);
        debug!("Sampled {} of {} points as centers", picked.len(), x.nrows());
        Ok(x.select(Axis(0), &picked))
    }
}

/// A caller-supplied center set, used as is
#[derive(Debug, Clone)]
pub struct FixedCenters {
    centers: Array2<f64>,
}

impl FixedCenters {
    pub fn new(centers: Array2<f64>) -> Self {
        Self { centers }
    }
}

impl CenterSelector for FixedCenters {
    fn select(&self, x: ArrayView2<f64>, _m: usize) -> Result<Array2<f64>> {
        if self.centers.nrows() == 0 {
            return Err(KrrError::EmptyDataset);
        }
        if self.centers.ncols() != x.ncols() {
            return Err(KrrError::DimensionMismatch {
                expected: x.ncols(),
                actual: self.centers.ncols(),
            });
        }
        if self.centers.nrows() > x.nrows() {
            return Err(KrrError::InvalidParameter(format!(
                "{} fixed centers for only {} points",
                self.centers.nrows(),
                x.nrows()
            )));
        }
        Ok(self.centers.clone())
    }
}
