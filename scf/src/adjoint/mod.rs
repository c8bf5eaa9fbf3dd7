//! Implicit differentiation at a converged fixed point.
//!
//! For `y* = g(y*; θ)` and a downstream scalar `L(y*, θ)`, the derivative
//! is obtained from the implicit function theorem by one linear solve at
//! the fixed point instead of differentiating through the iteration trace:
//! `dL/dθ = ∂L/∂θ + wᵀ (I - J)⁻¹ ∂g/∂θ` with `w = ∂L/∂y` and `J = ∂g/∂y`
//! evaluated at `y*`. The linearization is only ever applied as a
//! directional operator — never materialized — so the solve runs in
//! tangent form, one GMRES solve per manifest parameter. Cost is a few
//! evaluations of `g` per Krylov iteration, independent of how many
//! forward fixed-point iterations were needed.

mod gmres;
#[cfg(test)]
mod tests;

use nalgebra::DVector;

use crate::error::{Result, ScfError};

/// A fixed-point map `g(y; θ)` with directional linearizations.
///
/// The default `jvp_*` implementations take a central finite difference of
/// a single `eval`; maps with cheap analytic linearizations can override
/// them.
pub trait DifferentiableMap {
    fn dim(&self) -> usize;

    /// Number of entries in the external-parameter manifest.
    fn nparams(&self) -> usize;

    fn eval(&self, y: &DVector<f64>, params: &DVector<f64>) -> Result<DVector<f64>>;

    /// Step used by the finite-difference linearizations.
    fn fd_step(&self) -> f64 {
        1e-6
    }

    /// `∂g/∂y · dy` at `(y, θ)`.
    fn jvp_y(
        &self,
        y: &DVector<f64>,
        params: &DVector<f64>,
        dy: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let norm = dy.norm();
        if norm == 0.0 {
            return Ok(DVector::zeros(self.dim()));
        }
        let h = self.fd_step();
        let dir = dy / norm;
        let plus = self.eval(&(y + &dir * h), params)?;
        let minus = self.eval(&(y - &dir * h), params)?;
        Ok((plus - minus) * (norm / (2.0 * h)))
    }

    /// `∂g/∂θ · dθ` at `(y, θ)`.
    fn jvp_params(
        &self,
        y: &DVector<f64>,
        params: &DVector<f64>,
        dparams: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let norm = dparams.norm();
        if norm == 0.0 {
            return Ok(DVector::zeros(self.dim()));
        }
        let h = self.fd_step();
        let dir = dparams / norm;
        let plus = self.eval(y, &(params + &dir * h))?;
        let minus = self.eval(y, &(params - &dir * h))?;
        Ok((plus - minus) * (norm / (2.0 * h)))
    }
}

#[derive(Debug, Clone)]
pub struct AdjointOptions {
    /// Relative tolerance of the implicit linear solve.
    pub tolerance: f64,
    /// Krylov dimension cap; exhaustion is a nested `NonConvergence`.
    pub max_krylov: usize,
}

impl Default for AdjointOptions {
    fn default() -> Self {
        AdjointOptions {
            tolerance: 1e-8,
            max_krylov: 100,
        }
    }
}

/// Linearization handle captured at a converged fixed point. Holds the
/// point of linearization; the map itself is borrowed, so the handle is
/// only as durable as the solve that produced it.
pub struct Linearization<'a, G: DifferentiableMap + ?Sized> {
    map: &'a G,
    y: DVector<f64>,
    params: DVector<f64>,
}

impl<'a, G: DifferentiableMap + ?Sized> Linearization<'a, G> {
    /// Capture the linearization of `map` at `(y*, θ)`. The caller is
    /// responsible for `y*` actually being a fixed point; the gradient
    /// contract only holds there.
    pub fn at(map: &'a G, y: DVector<f64>, params: DVector<f64>) -> Result<Self> {
        if y.len() != map.dim() {
            return Err(ScfError::InvalidConfiguration(format!(
                "fixed point has dimension {}, map expects {}",
                y.len(),
                map.dim()
            )));
        }
        if params.len() != map.nparams() {
            return Err(ScfError::InvalidConfiguration(format!(
                "parameter manifest has {} entries, map expects {}",
                params.len(),
                map.nparams()
            )));
        }
        Ok(Linearization { map, y, params })
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    /// Solve `(I - J) u = rhs` at the captured point.
    pub fn solve_linearized(
        &self,
        rhs: &DVector<f64>,
        options: &AdjointOptions,
    ) -> Result<DVector<f64>> {
        gmres::solve(
            |v| {
                let jv = self.map.jvp_y(&self.y, &self.params, v)?;
                Ok(v - jv)
            },
            rhs,
            options.tolerance,
            options.max_krylov,
        )
    }

    /// Implicit part of `dL/dθ` for a scalar with y-seed `w = ∂L/∂y`:
    /// `wᵀ (I - J)⁻¹ ∂g/∂θ`, one linear solve per manifest parameter. The
    /// explicit `∂L/∂θ` partial is the caller's to add. Either succeeds to
    /// solver tolerance or fails loudly.
    pub fn gradient(&self, seed: &DVector<f64>, options: &AdjointOptions) -> Result<DVector<f64>> {
        if seed.len() != self.map.dim() {
            return Err(ScfError::InvalidConfiguration(format!(
                "gradient seed has dimension {}, map expects {}",
                seed.len(),
                self.map.dim()
            )));
        }
        let nparams = self.map.nparams();
        let mut grad = DVector::zeros(nparams);
        for p in 0..nparams {
            let mut ep = DVector::zeros(nparams);
            ep[p] = 1.0;
            let b = self.map.jvp_params(&self.y, &self.params, &ep)?;
            let u = self.solve_linearized(&b, options)?;
            grad[p] = seed.dot(&u);
        }
        Ok(grad)
    }
}
