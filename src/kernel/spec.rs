//! Serializable kernel description
//!
//! `KernelSpec` names one of the built-in kernels together with its
//! hyperparameters. It implements [`Kernel`] itself, which lets a model
//! loaded from disk predict without knowing the concrete kernel type.

use crate::core::{KrrError, Result};
use crate::kernel::{GaussianKernel, Kernel, LaplacianKernel, LinearKernel, PolynomialKernel};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelSpec {
    Linear,
    Gaussian { sigma: f64 },
    Laplacian { sigma: f64 },
    Polynomial { degree: u32, gamma: f64, coef0: f64 },
}

impl KernelSpec {
    /// Check hyperparameters without panicking
    pub fn validate(&self) -> Result<()> {
        match *self {
            KernelSpec::Linear => Ok(()),
            KernelSpec::Gaussian { sigma } | KernelSpec::Laplacian { sigma } => {
                if sigma > 0.0 && sigma.is_finite() {
                    Ok(())
                } else {
                    Err(KrrError::InvalidParameter(format!(
                        "Sigma must be positive, got: {sigma}"
                    )))
                }
            }
            KernelSpec::Polynomial {
                degree,
                gamma,
                coef0,
            } => {
                if degree == 0 || !(gamma > 0.0) || !(coef0 >= 0.0) {
                    Err(KrrError::InvalidParameter(format!(
                        "Invalid polynomial kernel: degree={degree}, gamma={gamma}, coef0={coef0}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Kernel for KernelSpec {
    fn compute(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        match *self {
            KernelSpec::Linear => LinearKernel.compute(x, y),
            KernelSpec::Gaussian { sigma } => GaussianKernel::new(sigma).compute(x, y),
            KernelSpec::Laplacian { sigma } => LaplacianKernel::new(sigma).compute(x, y),
            KernelSpec::Polynomial {
                degree,
                gamma,
                coef0,
            } => PolynomialKernel::new(degree, gamma, coef0).compute(x, y),
        }
    }

    fn block(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
        match *self {
            KernelSpec::Linear => LinearKernel.block(a, b),
            KernelSpec::Gaussian { sigma } => GaussianKernel::new(sigma).block(a, b),
            KernelSpec::Laplacian { sigma } => LaplacianKernel::new(sigma).block(a, b),
            KernelSpec::Polynomial {
                degree,
                gamma,
                coef0,
            } => PolynomialKernel::new(degree, gamma, coef0).block(a, b),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            KernelSpec::Linear => "linear",
            KernelSpec::Gaussian { .. } => "gaussian",
            KernelSpec::Laplacian { .. } => "laplacian",
            KernelSpec::Polynomial { .. } => "polynomial",
        }
    }
}

impl From<LinearKernel> for KernelSpec {
    fn from(_: LinearKernel) -> Self {
        KernelSpec::Linear
    }
}

impl From<GaussianKernel> for KernelSpec {
    fn from(kernel: GaussianKernel) -> Self {
        KernelSpec::Gaussian {
            sigma: kernel.sigma(),
        }
    }
}

impl From<LaplacianKernel> for KernelSpec {
    fn from(kernel: LaplacianKernel) -> Self {
        KernelSpec::Laplacian {
            sigma: kernel.sigma(),
        }
    }
}

impl From<PolynomialKernel> for KernelSpec {
    fn from(kernel: PolynomialKernel) -> Self {
        KernelSpec::Polynomial {
            degree: kernel.degree,
            gamma: kernel.gamma,
            coef0: kernel.coef0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_spec_matches_concrete_kernel() {
        let x = array![0.5, -1.0];
        let y = array![1.5, 2.0];

        let spec = KernelSpec::from(GaussianKernel::new(0.8));
        let direct = GaussianKernel::new(0.8);
        assert_eq!(spec.compute(x.view(), y.view()), direct.compute(x.view(), y.view()));
        assert_eq!(spec.name(), "gaussian");
    }

    #[test]
    fn test_spec_json_shape() {
        let spec = KernelSpec::Gaussian { sigma: 2.0 };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"type":"gaussian","sigma":2.0}"#);

        let back: KernelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_spec_validation() {
        assert!(KernelSpec::Linear.validate().is_ok());
        assert!(KernelSpec::Gaussian { sigma: 0.0 }.validate().is_err());
        assert!(KernelSpec::Laplacian { sigma: f64::NAN }.validate().is_err());
        assert!(KernelSpec::Polynomial {
            degree: 2,
            gamma: 1.0,
            coef0: -0.5
        }
        .validate()
        .is_err());
    }
}
