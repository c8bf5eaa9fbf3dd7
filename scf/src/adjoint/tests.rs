//! Tests for the implicit-differentiation layer.

use super::*;
use crate::fixed_point::{self, FixedPointOptions};
use nalgebra::{DMatrix, DVector};

/// Affine map `g(y; θ) = A y + b θ₀` with a contractive `A`.
struct AffineMap {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl AffineMap {
    fn new() -> Self {
        AffineMap {
            a: DMatrix::from_row_slice(2, 2, &[0.3, 0.1, -0.2, 0.4]),
            b: DVector::from_vec(vec![1.0, 2.0]),
        }
    }

    fn fixed_point(&self, theta: f64) -> DVector<f64> {
        let lhs = DMatrix::identity(2, 2) - &self.a;
        lhs.lu().solve(&(&self.b * theta)).unwrap()
    }
}

impl DifferentiableMap for AffineMap {
    fn dim(&self) -> usize {
        2
    }

    fn nparams(&self) -> usize {
        1
    }

    fn eval(&self, y: &DVector<f64>, params: &DVector<f64>) -> crate::error::Result<DVector<f64>> {
        Ok(&self.a * y + &self.b * params[0])
    }
}

/// Mildly nonlinear map with two parameters.
struct TanhMap;

impl DifferentiableMap for TanhMap {
    fn dim(&self) -> usize {
        2
    }

    fn nparams(&self) -> usize {
        2
    }

    fn eval(&self, y: &DVector<f64>, params: &DVector<f64>) -> crate::error::Result<DVector<f64>> {
        // g_i = 0.4 tanh(y_i + θ_0) + 0.1 θ_1 y_{1-i}
        let mut out = DVector::zeros(2);
        for i in 0..2 {
            out[i] = 0.4 * (y[i] + params[0]).tanh() + 0.1 * params[1] * y[1 - i];
        }
        Ok(out)
    }
}

#[test]
fn gradient_of_affine_fixed_point_is_analytic() {
    let map = AffineMap::new();
    let theta = DVector::from_element(1, 1.5);
    let ystar = map.fixed_point(1.5);

    // L = c·y*, so dL/dθ = cᵀ (I - A)⁻¹ b
    let c = DVector::from_vec(vec![2.0, -1.0]);
    let lin = Linearization::at(&map, ystar, theta).unwrap();
    let grad = lin.gradient(&c, &AdjointOptions::default()).unwrap();

    let lhs = DMatrix::identity(2, 2) - &map.a;
    let exact = c.dot(&lhs.lu().solve(&map.b).unwrap());
    assert!((grad[0] - exact).abs() < 1e-6, "{} vs {exact}", grad[0]);
}

#[test]
fn implicit_gradient_matches_finite_differences_of_the_full_solve() {
    let map = TanhMap;
    let theta = DVector::from_vec(vec![0.3, 0.7]);
    let opts = FixedPointOptions {
        tolerance: 1e-12,
        max_iter: 200,
        ..FixedPointOptions::default()
    };

    let solve_at = |params: &DVector<f64>| {
        fixed_point::solve(
            |y| map.eval(y, params),
            DVector::zeros(2),
            &opts,
        )
        .unwrap()
        .y
    };

    // L = sum(y*)
    let seed = DVector::from_element(2, 1.0);
    let ystar = solve_at(&theta);
    let lin = Linearization::at(&map, ystar, theta.clone()).unwrap();
    let grad = lin.gradient(&seed, &AdjointOptions::default()).unwrap();

    let step = 1e-5;
    for p in 0..2 {
        let mut up = theta.clone();
        up[p] += step;
        let mut dn = theta.clone();
        dn[p] -= step;
        let fd = (solve_at(&up).sum() - solve_at(&dn).sum()) / (2.0 * step);
        assert!(
            (grad[p] - fd).abs() < 1e-5,
            "param {p}: implicit {} vs fd {fd}",
            grad[p]
        );
    }
}

#[test]
fn zero_seed_gives_zero_gradient() {
    let map = AffineMap::new();
    let ystar = map.fixed_point(1.0);
    let lin = Linearization::at(&map, ystar, DVector::from_element(1, 1.0)).unwrap();
    let grad = lin
        .gradient(&DVector::zeros(2), &AdjointOptions::default())
        .unwrap();
    assert_eq!(grad, DVector::zeros(1));
}

#[test]
fn krylov_cap_surfaces_as_nested_nonconvergence() {
    let map = AffineMap::new();
    let ystar = map.fixed_point(1.0);
    let lin = Linearization::at(&map, ystar, DVector::from_element(1, 1.0)).unwrap();
    let tight = AdjointOptions {
        tolerance: 1e-15,
        max_krylov: 1,
    };
    let seed = DVector::from_vec(vec![1.0, 1.0]);
    match lin.gradient(&seed, &tight) {
        Err(crate::error::ScfError::NonConvergence { context, .. }) => {
            assert_eq!(context, "adjoint linear solve")
        }
        other => panic!("expected nested NonConvergence, got {other:?}"),
    }
}

#[test]
fn dimension_mismatches_are_rejected_up_front() {
    let map = AffineMap::new();
    assert!(Linearization::at(&map, DVector::zeros(3), DVector::zeros(1)).is_err());
    assert!(Linearization::at(&map, DVector::zeros(2), DVector::zeros(2)).is_err());
    let lin = Linearization::at(&map, DVector::zeros(2), DVector::zeros(1)).unwrap();
    assert!(lin
        .gradient(&DVector::zeros(3), &AdjointOptions::default())
        .is_err());
}
