//! Density-matrix construction and normalization.

use hamilton::Operator;
use nalgebra::DMatrix;

use crate::error::{Result, ScfError};

/// Closed-shell density matrix from the occupied eigenvectors:
/// `D = 2 Σᵢ vᵢ vᵢᵀ` (each orbital doubly occupied).
pub fn build(eigvecs: &DMatrix<f64>) -> DMatrix<f64> {
    2.0 * eigvecs * eigvecs.transpose()
}

/// Rescale `dm` so its trace against the overlap operator equals the target
/// particle count: `D * (target / trace(D·M))`. A near-zero trace means the
/// occupied orbitals carry no weight against the overlap metric and the
/// rescale is undefined.
pub fn normalize(dm: &DMatrix<f64>, overlap: &dyn Operator, target: f64) -> Result<DMatrix<f64>> {
    let trace = overlap.apply_mat(dm).trace();
    if !trace.is_finite() || trace.abs() < 1e-12 * target.abs().max(1.0) {
        return Err(ScfError::NumericalDegeneracy(format!(
            "density trace against the overlap is {trace:.3e}; normalization to {target} is undefined"
        )));
    }
    Ok(dm * (target / trace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamilton::DenseOperator;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn one_orbital_with_unit_norm_gives_trace_two() {
        // ‖v‖²_M = 1 against M = diag(1, 4); target particle count 2.
        let m = DenseOperator::from_diagonal(&DVector::from_vec(vec![1.0, 4.0]));
        let v = DMatrix::from_column_slice(2, 1, &[(0.5f64).sqrt(), (0.125f64).sqrt()]);
        let dm = build(&v);
        let dm = normalize(&dm, &m, 2.0).unwrap();
        let trace = m.apply_mat(&dm).trace();
        assert!((trace - 2.0).abs() < 1e-12);
        // the build already satisfied the target, so the rescale is a no-op
        assert!((dm - build(&v)).abs().max() < 1e-12);
    }

    #[test]
    fn rescales_to_target_count() {
        let m = DenseOperator::identity(3);
        let v = DMatrix::from_column_slice(3, 1, &[2.0, 0.0, 0.0]);
        let dm = normalize(&build(&v), &m, 2.0).unwrap();
        assert!((m.apply_mat(&dm).trace() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_trace_is_a_degeneracy_error() {
        let m = DenseOperator::identity(2);
        let dm = DMatrix::zeros(2, 2);
        assert!(matches!(
            normalize(&dm, &m, 2.0),
            Err(ScfError::NumericalDegeneracy(_))
        ));
    }

    #[test]
    fn density_matrix_is_symmetric() {
        let v = DMatrix::from_column_slice(2, 2, &[1.0, 0.5, -0.3, 0.8]);
        let dm = build(&v);
        assert!((&dm - dm.transpose()).abs().max() < 1e-14);
    }
}
