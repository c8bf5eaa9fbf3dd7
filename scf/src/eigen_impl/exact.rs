//! Dense strategy: Cholesky transformation to a standard eigenproblem.

use hamilton::Operator;
use nalgebra::DVector;

use super::{align_signs, EigenResult};
use crate::error::{Result, ScfError};

/// Factor `M = L Lᵀ`, decompose `L⁻¹ A L⁻ᵀ`, select the `k` smallest pairs
/// and back-transform. Only valid for operators that can materialize.
pub(super) fn solve_exact(a: &dyn Operator, m: &dyn Operator, k: usize) -> Result<EigenResult> {
    let a_dense = a.dense().ok_or_else(|| {
        ScfError::InvalidConfiguration(
            "exact eigensolver requires dense-materializable operators".into(),
        )
    })?;
    let m_dense = m.dense().ok_or_else(|| {
        ScfError::InvalidConfiguration(
            "exact eigensolver requires dense-materializable operators".into(),
        )
    })?;

    let chol = m_dense.cholesky().ok_or_else(|| {
        ScfError::NumericalDegeneracy("overlap operator is not positive-definite".into())
    })?;
    let l = chol.l();

    // A' = L⁻¹ A L⁻ᵀ, built in two triangular solves
    let y = l
        .solve_lower_triangular(&a_dense)
        .ok_or_else(singular_factor)?;
    let a_std = l
        .solve_lower_triangular(&y.transpose())
        .ok_or_else(singular_factor)?;
    let a_std = 0.5 * (&a_std + a_std.transpose());

    let eig = a_std.symmetric_eigen();
    let mut indices: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    use std::cmp::Ordering;
    indices.sort_by(|&p, &q| {
        eig.eigenvalues[p]
            .partial_cmp(&eig.eigenvalues[q])
            .unwrap_or(Ordering::Equal)
    });
    indices.truncate(k);

    let eigenvalues = DVector::from_fn(k, |i, _| eig.eigenvalues[indices[i]]);
    let u = eig.eigenvectors.select_columns(&indices);

    // back-transform: v = L⁻ᵀ u, which keeps the columns M-orthonormal
    let v = l
        .transpose()
        .solve_upper_triangular(&u)
        .ok_or_else(singular_factor)?;

    Ok(EigenResult {
        eigenvalues,
        eigenvectors: align_signs(v),
    })
}

fn singular_factor() -> ScfError {
    ScfError::NumericalDegeneracy("singular Cholesky factor of the overlap".into())
}
