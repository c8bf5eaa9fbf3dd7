//! Tests for the generalized eigensolvers.

use super::*;
use hamilton::{DenseOperator, Operator};
use nalgebra::{DMatrix, DVector};

fn exact_options() -> EigenOptions {
    EigenOptions::default()
}

fn davidson_options() -> EigenOptions {
    EigenOptions {
        method: EigenMethod::Davidson,
        ..EigenOptions::default()
    }
}

/// A deterministic symmetric test pair: A dense symmetric, M diagonally
/// dominant SPD.
fn test_pair(n: usize) -> (DenseOperator, DenseOperator) {
    let b = DMatrix::from_fn(n, n, |i, j| ((3 * i + 7 * j + 1) % 11) as f64 / 11.0);
    let a = 0.5 * (&b + b.transpose());
    let c = DMatrix::from_fn(n, n, |i, j| ((5 * i + 2 * j + 3) % 7) as f64 / 70.0);
    let m = DMatrix::identity(n, n) + 0.5 * (&c + c.transpose());
    (DenseOperator::new(a, true), DenseOperator::new(m, true))
}

#[test]
fn diagonal_two_by_two_returns_smallest_pair() {
    // A = diag(1, 2), M = I, one pair requested
    let a = DenseOperator::from_diagonal(&DVector::from_vec(vec![1.0, 2.0]));
    let m = DenseOperator::identity(2);
    for options in [exact_options(), davidson_options()] {
        let res = solve(&a, &m, 1, &options).unwrap();
        assert!((res.eigenvalues[0] - 1.0).abs() < 1e-10);
        assert!((res.eigenvectors[(0, 0)] - 1.0).abs() < 1e-8);
        assert!(res.eigenvectors[(1, 0)].abs() < 1e-8);
    }
}

#[test]
fn eigenvectors_are_m_orthonormal() {
    let (a, m) = test_pair(6);
    let res = solve(&a, &m, 3, &exact_options()).unwrap();
    let gram = res.eigenvectors.transpose() * m.matrix() * &res.eigenvectors;
    let dev = (&gram - DMatrix::identity(3, 3)).abs().max();
    assert!(dev < 1e-10, "max orthonormality deviation {dev}");
}

#[test]
fn residuals_satisfy_the_pencil() {
    let (a, m) = test_pair(6);
    let res = solve(&a, &m, 3, &exact_options()).unwrap();
    for j in 0..3 {
        let v = res.eigenvectors.column(j).into_owned();
        let r = a.apply(&v) - m.apply(&v) * res.eigenvalues[j];
        assert!(r.norm() < 1e-10, "pair {j} residual {}", r.norm());
    }
}

#[test]
fn davidson_matches_exact() {
    let (a, m) = test_pair(12);
    let exact = solve(&a, &m, 3, &exact_options()).unwrap();
    let david = solve(&a, &m, 3, &davidson_options()).unwrap();
    for j in 0..3 {
        assert!(
            (exact.eigenvalues[j] - david.eigenvalues[j]).abs() < 1e-6,
            "pair {j}: {} vs {}",
            exact.eigenvalues[j],
            david.eigenvalues[j]
        );
    }
}

#[test]
fn degenerate_cluster_is_broken_deterministically() {
    let a = DenseOperator::identity(3);
    let m = DenseOperator::identity(3);
    let first = solve(&a, &m, 2, &exact_options()).unwrap();
    let second = solve(&a, &m, 2, &exact_options()).unwrap();
    // bit-identical across runs: the symmetry-breaking shift is graded and
    // deterministic, never randomized
    assert_eq!(first.eigenvalues, second.eigenvalues);
    assert_eq!(first.eigenvectors, second.eigenvectors);
    let gram = first.eigenvectors.transpose() * &first.eigenvectors;
    assert!((&gram - DMatrix::identity(2, 2)).abs().max() < 1e-8);
}

#[test]
fn too_many_pairs_is_invalid_configuration() {
    let a = DenseOperator::identity(2);
    let m = DenseOperator::identity(2);
    assert!(matches!(
        solve(&a, &m, 3, &exact_options()),
        Err(ScfError::InvalidConfiguration(_))
    ));
}

#[test]
fn asymmetric_operator_is_rejected() {
    let a = DenseOperator::new(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]), false);
    let m = DenseOperator::identity(2);
    assert!(matches!(
        solve(&a, &m, 1, &exact_options()),
        Err(ScfError::InvalidConfiguration(_))
    ));
}

#[test]
fn indefinite_overlap_is_a_degeneracy_error() {
    let a = DenseOperator::identity(2);
    let m = DenseOperator::from_diagonal(&DVector::from_vec(vec![1.0, -1.0]));
    assert!(matches!(
        solve(&a, &m, 1, &exact_options()),
        Err(ScfError::NumericalDegeneracy(_))
    ));
}

#[test]
fn exhausted_expansion_budget_is_recoverable_nonconvergence() {
    let (a, m) = test_pair(12);
    let options = EigenOptions {
        method: EigenMethod::Davidson,
        tolerance: 1e-14,
        max_expansions: 1,
        ..EigenOptions::default()
    };
    match solve(&a, &m, 3, &options) {
        Err(ScfError::NonConvergence {
            context,
            iterations,
            ..
        }) => {
            assert_eq!(context, "davidson eigensolver");
            assert!(iterations <= 1);
        }
        other => panic!("expected NonConvergence, got {other:?}"),
    }
}
