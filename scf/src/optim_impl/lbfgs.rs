//! Limited-memory BFGS with backtracking line search.

use nalgebra::DVector;
use tracing::debug;

use super::{ArgminSolution, ObjectiveModel, OptimOptions};
use crate::error::{Result, ScfError};

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 30;

pub(super) fn minimize<M: ObjectiveModel>(
    model: &M,
    x0: &DVector<f64>,
    y: &DVector<f64>,
    options: &OptimOptions,
) -> Result<ArgminSolution> {
    let mut x = x0.clone();
    let mut f = model.value(&x, y);
    let mut g = model.grad_x(&x, y);
    check_finite(f, &g)?;

    // curvature pairs (s, t, 1/sᵀt); oldest evicted first
    let mut s_hist: Vec<DVector<f64>> = Vec::new();
    let mut t_hist: Vec<DVector<f64>> = Vec::new();
    let mut rho_hist: Vec<f64> = Vec::new();

    let mut iterations = 0;
    let mut converged = false;

    for iter in 1..=options.max_niter {
        iterations = iter;
        let dir = -two_loop(&g, &s_hist, &t_hist, &rho_hist);
        let slope = g.dot(&dir);
        if slope >= 0.0 {
            // the approximation lost descent; restart from the raw gradient
            s_hist.clear();
            t_hist.clear();
            rho_hist.clear();
        }
        let dir = if slope >= 0.0 { -g.clone() } else { dir };
        let slope = g.dot(&dir);

        // backtracking Armijo search, initial unit step
        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let xt = &x + &dir * step;
            let ft = model.value(&xt, y);
            if ft.is_finite() && ft <= f + ARMIJO_C1 * step * slope {
                accepted = Some((xt, ft));
                break;
            }
            step *= 0.5;
        }
        let Some((xt, ft)) = accepted else {
            // no acceptable step: the gradient is at the numerical floor
            debug!("l-bfgs line search stalled at iteration {iter}");
            converged = true;
            break;
        };

        let gt = model.grad_x(&xt, y);
        check_finite(ft, &gt)?;

        let s = &xt - &x;
        let t = &gt - &g;
        let st = s.dot(&t);
        if st > 1e-12 {
            if s_hist.len() >= options.history_size {
                s_hist.remove(0);
                t_hist.remove(0);
                rho_hist.remove(0);
            }
            s_hist.push(s);
            t_hist.push(t);
            rho_hist.push(1.0 / st);
        }

        let improvement = f - ft;
        x = xt;
        f = ft;
        g = gt;

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

/// Two-loop recursion: apply the inverse-Hessian approximation to `g`.
fn two_loop(
    g: &DVector<f64>,
    s_hist: &[DVector<f64>],
    t_hist: &[DVector<f64>],
    rho_hist: &[f64],
) -> DVector<f64> {
    let m = s_hist.len();
    let mut q = g.clone();
    let mut alphas = vec![0.0; m];
    for i in (0..m).rev() {
        let a = rho_hist[i] * s_hist[i].dot(&q);
        q.axpy(-a, &t_hist[i], 1.0);
        alphas[i] = a;
    }
    if m > 0 {
        let t = &t_hist[m - 1];
        let gamma = s_hist[m - 1].dot(t) / t.dot(t);
        q *= gamma;
    }
    for i in 0..m {
        let b = rho_hist[i] * t_hist[i].dot(&q);
        q.axpy(alphas[i] - b, &s_hist[i], 1.0);
    }
    q
}

fn check_finite(f: f64, g: &DVector<f64>) -> Result<()> {
    if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
        return Err(ScfError::NumericalDegeneracy(
            "objective or gradient is not finite".into(),
        ));
    }
    Ok(())
}
