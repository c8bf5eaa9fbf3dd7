//! Radial integration grid with precomputed volume weights.

use nalgebra::DVector;

/// Radial quadrature grid. Fields sampled on `points` are integrated over
/// all of space with `integrate`, the weights already carrying the `4πr²dr`
/// volume element.
#[derive(Debug, Clone)]
pub struct RadialGrid {
    points: DVector<f64>,
    weights: DVector<f64>,
}

impl RadialGrid {
    /// Log-spaced radial shells on `[rmin, rmax]` with trapezoidal volume
    /// weights. `rmin` must be positive for the logarithmic spacing.
    pub fn logspace(rmin: f64, rmax: f64, n: usize) -> Self {
        assert!(n >= 2, "radial grid needs at least two points");
        assert!(
            rmin > 0.0 && rmax > rmin,
            "radial grid bounds must satisfy 0 < rmin < rmax"
        );

        let log_min = rmin.ln();
        let log_max = rmax.ln();
        let step = (log_max - log_min) / (n - 1) as f64;
        let points = DVector::from_fn(n, |i, _| (log_min + step * i as f64).exp());

        // Trapezoidal dr on the non-uniform radii.
        let mut weights = DVector::zeros(n);
        for i in 0..n {
            let left = if i == 0 { points[0] } else { points[i - 1] };
            let right = if i == n - 1 { points[n - 1] } else { points[i + 1] };
            let dr = 0.5 * (right - left);
            let r = points[i];
            weights[i] = 4.0 * std::f64::consts::PI * r * r * dr;
        }

        RadialGrid { points, weights }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.len() == 0
    }

    pub fn points(&self) -> &DVector<f64> {
        &self.points
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Quadrature of a field sampled on this grid.
    pub fn integrate(&self, field: &DVector<f64>) -> f64 {
        assert_eq!(
            field.len(),
            self.points.len(),
            "field length does not match the grid"
        );
        self.weights.dot(field)
    }
}
