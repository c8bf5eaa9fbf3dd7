//! Iterative strategy: block Davidson subspace expansion.
//!
//! Operates on `A` and `M` only through their `apply`; suitable when the
//! problem dimension makes the dense transformation unattractive. The
//! search space is kept M-orthonormal so the projected overlap stays the
//! identity and the small problem is an ordinary symmetric decomposition.

use hamilton::Operator;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{align_signs, EigenOptions, EigenResult};
use crate::error::{Result, ScfError};

pub(super) fn solve_davidson(
    a: &dyn Operator,
    m: &dyn Operator,
    k: usize,
    options: &EigenOptions,
) -> Result<EigenResult> {
    let n = a.shape().0;
    let diag_a = a.diagonal();
    let diag_m = m.diagonal();
    if diag_m.iter().any(|&d| d <= 0.0) {
        return Err(ScfError::NumericalDegeneracy(
            "overlap diagonal is not positive".into(),
        ));
    }

    let max_subspace = (4 * k + 8).min(n);

    // seed with coordinate vectors at the smallest diagonal Ritz estimates
    let mut order: Vec<usize> = (0..n).collect();
    use std::cmp::Ordering;
    order.sort_by(|&p, &q| {
        (diag_a[p] / diag_m[p])
            .partial_cmp(&(diag_a[q] / diag_m[q]))
            .unwrap_or(Ordering::Equal)
    });

    let mut space = Subspace::new(n);
    for &i in order.iter().take(k) {
        let mut e = DVector::zeros(n);
        e[i] = 1.0;
        space.push(e, a, m);
    }
    if space.len() < k {
        return Err(ScfError::NumericalDegeneracy(
            "could not seed an M-orthonormal starting block".into(),
        ));
    }

    let mut worst = f64::INFINITY;
    for expansion in 0..options.max_expansions {
        // projected problem; VᵀMV = I by construction
        let sub = space.len();
        let mut h = DMatrix::zeros(sub, sub);
        for i in 0..sub {
            for j in i..sub {
                let v = space.basis[i].dot(&space.av[j]);
                h[(i, j)] = v;
                h[(j, i)] = v;
            }
        }
        let eig = h.symmetric_eigen();
        let mut idx: Vec<usize> = (0..sub).collect();
        idx.sort_by(|&p, &q| {
            eig.eigenvalues[p]
                .partial_cmp(&eig.eigenvalues[q])
                .unwrap_or(Ordering::Equal)
        });
        idx.truncate(k);

        let lambdas = DVector::from_fn(k, |i, _| eig.eigenvalues[idx[i]]);
        let coeffs = eig.eigenvectors.select_columns(&idx);

        // Ritz vectors and residuals from the cached applications
        let mut ritz = Vec::with_capacity(k);
        let mut residuals = Vec::with_capacity(k);
        worst = 0.0;
        for j in 0..k {
            let mut x = DVector::zeros(n);
            let mut ax = DVector::zeros(n);
            let mut mx = DVector::zeros(n);
            for i in 0..sub {
                let c = coeffs[(i, j)];
                x.axpy(c, &space.basis[i], 1.0);
                ax.axpy(c, &space.av[i], 1.0);
                mx.axpy(c, &space.mv[i], 1.0);
            }
            let r = &ax - &mx * lambdas[j];
            worst = worst.max(r.norm());
            ritz.push((x, ax, mx));
            residuals.push(r);
        }

        if worst < options.tolerance {
            let mut eigenvectors = DMatrix::zeros(n, k);
            for (j, (x, _, _)) in ritz.iter().enumerate() {
                eigenvectors.set_column(j, x);
            }
            return Ok(EigenResult {
                eigenvalues: lambdas,
                eigenvectors: align_signs(eigenvectors),
            });
        }

        if space.len() >= max_subspace {
            debug!("davidson restart at expansion {expansion} (subspace {})", space.len());
            space.restart(&ritz);
            continue;
        }

        // expand with diagonally preconditioned residuals
        let mut added = 0;
        for j in 0..k {
            if residuals[j].norm() < options.tolerance {
                continue;
            }
            let t = DVector::from_fn(n, |i, _| {
                let denom = diag_a[i] - lambdas[j] * diag_m[i];
                if denom.abs() > 1e-10 {
                    residuals[j][i] / denom
                } else {
                    residuals[j][i]
                }
            });
            if space.push(t, a, m) {
                added += 1;
            }
            if space.len() >= max_subspace {
                break;
            }
        }
        if added == 0 {
            // new directions are linearly dependent on the search space
            return Err(ScfError::NonConvergence {
                context: "davidson eigensolver",
                iterations: expansion + 1,
                residual: worst,
            });
        }
    }

    Err(ScfError::NonConvergence {
        context: "davidson eigensolver",
        iterations: options.max_expansions,
        residual: worst,
    })
}

/// M-orthonormal search space with cached `A v` and `M v` applications.
struct Subspace {
    n: usize,
    basis: Vec<DVector<f64>>,
    av: Vec<DVector<f64>>,
    mv: Vec<DVector<f64>>,
}

impl Subspace {
    fn new(n: usize) -> Self {
        Subspace {
            n,
            basis: Vec::new(),
            av: Vec::new(),
            mv: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.basis.len()
    }

    /// M-orthogonalize `t` against the space (twice, for stability) and
    /// append it. Returns false when `t` is linearly dependent.
    fn push(&mut self, mut t: DVector<f64>, a: &dyn Operator, m: &dyn Operator) -> bool {
        for _ in 0..2 {
            for (v, mv) in self.basis.iter().zip(self.mv.iter()) {
                let c = mv.dot(&t);
                t.axpy(-c, v, 1.0);
            }
        }
        let mt = m.apply(&t);
        let norm2 = t.dot(&mt);
        if !(norm2 > 1e-20) {
            return false;
        }
        let norm = norm2.sqrt();
        t /= norm;
        self.av.push(a.apply(&t));
        self.mv.push(mt / norm);
        self.basis.push(t);
        true
    }

    /// Collapse the space onto the given Ritz triples, which are already
    /// M-orthonormal.
    fn restart(&mut self, ritz: &[(DVector<f64>, DVector<f64>, DVector<f64>)]) {
        self.basis.clear();
        self.av.clear();
        self.mv.clear();
        for (x, ax, mx) in ritz {
            debug_assert_eq!(x.len(), self.n);
            self.basis.push(x.clone());
            self.av.push(ax.clone());
            self.mv.push(mx.clone());
        }
    }
}
