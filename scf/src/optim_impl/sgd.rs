//! Momentum gradient descent.

use nalgebra::DVector;

use super::{ArgminSolution, ObjectiveModel, OptimOptions};
use crate::error::{Result, ScfError};

pub(super) fn minimize<M: ObjectiveModel>(
    model: &M,
    x0: &DVector<f64>,
    y: &DVector<f64>,
    options: &OptimOptions,
) -> Result<ArgminSolution> {
    let mut x = x0.clone();
    let mut velocity = DVector::zeros(x.len());
    let mut f = model.value(&x, y);
    if !f.is_finite() {
        return Err(ScfError::NumericalDegeneracy(
            "objective is not finite at the starting point".into(),
        ));
    }

    let mut iterations = 0;
    let mut converged = false;

    for iter in 1..=options.max_niter {
        iterations = iter;
        let g = model.grad_x(&x, y);
        if g.iter().any(|v| !v.is_finite()) {
            return Err(ScfError::NumericalDegeneracy(
                "objective gradient is not finite".into(),
            ));
        }

        velocity = &velocity * options.momentum - &g * options.lr;
        x += &velocity;

        let ft = model.value(&x, y);
        if !ft.is_finite() {
            return Err(ScfError::NumericalDegeneracy(
                "objective is not finite".into(),
            ));
        }

        let improvement = f - ft;
        f = ft;
        if improvement.abs() < options.min_improvement {
            converged = true;
            break;
        }
    }

    Ok(ArgminSolution {
        value: f,
        x,
        iterations,
        converged,
    })
}
