//! Matrix-free GMRES for the implicit-function linear solves.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, ScfError};

/// Solve `Op x = b` where `Op` is only available as an application. Plain
/// (unrestarted) Arnoldi with a small least-squares solve per iteration;
/// the Krylov dimension is capped by `max_iter`.
pub(crate) fn solve<F>(apply: F, b: &DVector<f64>, tol: f64, max_iter: usize) -> Result<DVector<f64>>
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>>,
{
    let n = b.len();
    let beta = b.norm();
    if beta == 0.0 {
        return Ok(DVector::zeros(n));
    }
    let max_iter = max_iter.min(n);

    let mut basis: Vec<DVector<f64>> = vec![b / beta];
    // upper Hessenberg, column j filled at iteration j
    let mut h = DMatrix::<f64>::zeros(max_iter + 1, max_iter);
    let mut residual = f64::INFINITY;

    for j in 0..max_iter {
        let mut w = apply(&basis[j])?;
        if w.iter().any(|v| !v.is_finite()) {
            return Err(ScfError::NumericalDegeneracy(
                "linear operator produced a non-finite application".into(),
            ));
        }
        for (i, v) in basis.iter().enumerate() {
            let hij = v.dot(&w);
            h[(i, j)] = hij;
            w.axpy(-hij, v, 1.0);
        }
        let hnext = w.norm();
        h[(j + 1, j)] = hnext;

        // least squares over the current Krylov dimension
        let dim = j + 1;
        let h_bar = h.view((0, 0), (dim + 1, dim)).into_owned();
        let mut rhs = DVector::zeros(dim + 1);
        rhs[0] = beta;
        let ys = h_bar
            .clone()
            .svd(true, true)
            .solve(&rhs, 1e-14)
            .map_err(|e| ScfError::NumericalDegeneracy(format!("GMRES least squares: {e}")))?;
        residual = (&h_bar * &ys - &rhs).norm();

        let happy_breakdown = hnext < 1e-14 * beta.max(1.0);
        if residual <= tol * beta || happy_breakdown {
            let mut x = DVector::zeros(n);
            for (i, v) in basis.iter().take(dim).enumerate() {
                x.axpy(ys[i], v, 1.0);
            }
            return Ok(x);
        }
        basis.push(w / hnext);
    }

    Err(ScfError::NonConvergence {
        context: "adjoint linear solve",
        iterations: max_iter,
        residual: residual / beta,
    })
}
