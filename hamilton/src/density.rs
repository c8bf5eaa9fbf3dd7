//! Density fields sampled on the grid.

use nalgebra::DVector;

/// Density carried by a density matrix, sampled on the integration grid,
/// optionally with its radial gradient and laplacian when the potential
/// assembler asks for them.
#[derive(Debug, Clone)]
pub struct DensityInfo {
    pub value: DVector<f64>,
    pub grad: Option<DVector<f64>>,
    pub laplacian: Option<DVector<f64>>,
}

impl DensityInfo {
    pub fn new(value: DVector<f64>) -> Self {
        DensityInfo {
            value,
            grad: None,
            laplacian: None,
        }
    }

    pub fn with_grad(value: DVector<f64>, grad: DVector<f64>) -> Self {
        DensityInfo {
            value,
            grad: Some(grad),
            laplacian: None,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        DensityInfo {
            value: &self.value * factor,
            grad: self.grad.as_ref().map(|g| g * factor),
            laplacian: self.laplacian.as_ref().map(|l| l * factor),
        }
    }

    /// Pointwise sum; derivative fields survive only when both sides carry
    /// them.
    pub fn add(&self, other: &Self) -> Self {
        let both = |a: &Option<DVector<f64>>, b: &Option<DVector<f64>>| match (a, b) {
            (Some(x), Some(y)) => Some(x + y),
            _ => None,
        };
        DensityInfo {
            value: &self.value + &other.value,
            grad: both(&self.grad, &other.grad),
            laplacian: both(&self.laplacian, &other.laplacian),
        }
    }
}
