//! Generic iterative minimization with an explicit backward policy.
//!
//! `argmin` minimizes `model(x, y)` over `x` with the external inputs `y`
//! held fixed, using a descent method chosen by a closed enum. The
//! backward policy is deliberately restrictive: sensitivities of the
//! optimum w.r.t. `y` are obtained by re-evaluating the model gradient at
//! `x*` with `x*` treated as a constant — valid exactly when `x*` is a
//! stationary point — and any sensitivity seeded through `x*` itself fails
//! loudly instead of being silently approximated.

mod lbfgs;
mod sgd;

use nalgebra::DVector;
use std::str::FromStr;

use crate::error::{Result, ScfError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimMethod {
    /// Limited-memory BFGS with backtracking line search.
    Lbfgs,
    /// Momentum gradient descent.
    Sgd,
}

impl FromStr for OptimMethod {
    type Err = ScfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lbfgs" => Ok(Self::Lbfgs),
            "sgd" => Ok(Self::Sgd),
            other => Err(ScfError::InvalidConfiguration(format!(
                "unknown optimizer method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimOptions {
    pub method: OptimMethod,
    pub lr: f64,
    /// Momentum factor, used by the SGD family only.
    pub momentum: f64,
    pub max_niter: usize,
    /// Stop once the per-iteration improvement falls below this.
    pub min_improvement: f64,
    /// Curvature-pair window for L-BFGS.
    pub history_size: usize,
}

impl Default for OptimOptions {
    fn default() -> Self {
        OptimOptions {
            method: OptimMethod::Lbfgs,
            lr: 1e-2,
            momentum: 0.9,
            max_niter: 100,
            min_improvement: 1e-6,
            history_size: 10,
        }
    }
}

impl OptimOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0) {
            return Err(ScfError::InvalidConfiguration(
                "optimizer learning rate must be positive".into(),
            ));
        }
        if self.max_niter == 0 {
            return Err(ScfError::InvalidConfiguration(
                "optimizer iteration budget must be at least 1".into(),
            ));
        }
        if self.history_size == 0 {
            return Err(ScfError::InvalidConfiguration(
                "optimizer history size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A scalar objective over optimization variables `x` and fixed inputs `y`.
///
/// The gradient defaults take central finite differences of `value`;
/// models with analytic gradients should override them.
pub trait ObjectiveModel {
    fn value(&self, x: &DVector<f64>, y: &DVector<f64>) -> f64;

    fn fd_step(&self) -> f64 {
        1e-6
    }

    fn grad_x(&self, x: &DVector<f64>, y: &DVector<f64>) -> DVector<f64> {
        let h = self.fd_step();
        DVector::from_fn(x.len(), |i, _| {
            let mut up = x.clone();
            up[i] += h;
            let mut dn = x.clone();
            dn[i] -= h;
            (self.value(&up, y) - self.value(&dn, y)) / (2.0 * h)
        })
    }

    /// Gradient w.r.t. the fixed inputs, `x` held constant.
    fn grad_y(&self, x: &DVector<f64>, y: &DVector<f64>) -> DVector<f64> {
        let h = self.fd_step();
        DVector::from_fn(y.len(), |i, _| {
            let mut up = y.clone();
            up[i] += h;
            let mut dn = y.clone();
            dn[i] -= h;
            (self.value(x, &up) - self.value(x, &dn)) / (2.0 * h)
        })
    }
}

/// Terminal state of one minimization.
#[derive(Debug, Clone)]
pub struct ArgminSolution {
    pub value: f64,
    pub x: DVector<f64>,
    pub iterations: usize,
    /// Whether the improvement threshold was reached inside the budget.
    pub converged: bool,
}

/// Minimize `model(x, y)` over `x`, holding `y` fixed, until the iteration
/// budget or the minimum-improvement threshold is reached.
pub fn argmin<M: ObjectiveModel>(
    model: &M,
    x0: &DVector<f64>,
    y: &DVector<f64>,
    options: &OptimOptions,
) -> Result<ArgminSolution> {
    options.validate()?;
    match options.method {
        OptimMethod::Lbfgs => lbfgs::minimize(model, x0, y, options),
        OptimMethod::Sgd => sgd::minimize(model, x0, y, options),
    }
}

impl ArgminSolution {
    /// Gradient of the optimum value w.r.t. the fixed inputs `y`,
    /// re-evaluating the model at `x*` with `x*` treated as a constant.
    ///
    /// Valid exactly when `x*` is a true stationary point (`∂model/∂x = 0`
    /// there). Gradients flowing back through `x*` are not modeled: any
    /// nonzero `seed_x` raises `UnimplementedGradientPath` rather than
    /// returning a silently wrong value.
    pub fn gradient_wrt_fixed<M: ObjectiveModel>(
        &self,
        model: &M,
        y: &DVector<f64>,
        seed_value: f64,
        seed_x: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if seed_x.iter().any(|&v| v != 0.0) {
            return Err(ScfError::UnimplementedGradientPath(
                "gradient contribution flowing through the argmin output is not modeled".into(),
            ));
        }
        Ok(model.grad_y(&self.x, y) * seed_value)
    }
}
