//! End-to-end tests on the single-atom model system with Dirac exchange.

use hamilton::{DiracExchange, GaussAtomHamiltonian, Hamiltonian, Operator, RadialGrid};

use scf::adjoint::AdjointOptions;
use scf::eigen_impl::{self, EigenMethod, EigenOptions};
use scf::fixed_point::{FixedPointOptions, FixedPointStatus};
use scf::ks::{ExternalParams, KohnSham, KsOptions};

fn model() -> (GaussAtomHamiltonian, DiracExchange) {
    let grid = RadialGrid::logspace(1e-4, 40.0, 250);
    let widths = GaussAtomHamiltonian::well_tempered_widths(0.2, 6.0, 5);
    (GaussAtomHamiltonian::new(grid, widths), DiracExchange::new())
}

fn tight_options() -> KsOptions {
    KsOptions {
        fixed_point: FixedPointOptions {
            tolerance: 1e-10,
            max_iter: 200,
            ..FixedPointOptions::default()
        },
        adjoint: AdjointOptions {
            tolerance: 1e-8,
            max_krylov: 200,
        },
        ..KsOptions::default()
    }
}

fn helium() -> ExternalParams {
    ExternalParams {
        atomz: 2.0,
        vext_strength: 0.0,
    }
}

#[test]
fn helium_like_atom_converges() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();

    assert_eq!(solution.status, FixedPointStatus::Converged);
    assert!(solution.residual < 1e-10);
    // bound electron: the occupied level and the total energy are negative
    assert!(solution.eigenvalues[0] < 0.0);
    assert!(solution.energy < 0.0);
    assert!(solution.energy.is_finite());
}

#[test]
fn converged_density_integrates_to_the_electron_count() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();

    let overlap = h.get_overlap();
    let trace = overlap.apply_mat(&solution.density_matrix).trace();
    assert!((trace - 2.0).abs() < 1e-9, "trace(D·M) = {trace}");

    // the grid quadrature agrees with the overlap trace to trapezoid
    // accuracy on the 250-point log grid
    let dens = h.dm2dens(&solution.density_matrix, false);
    let integral = h.grid().integrate(&dens.value);
    assert!((integral - 2.0).abs() < 2e-3, "∫ρ = {integral}");
}

#[test]
fn converged_fock_satisfies_the_fixed_point_property() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();
    let residual = ks.verify_solution(&solution).unwrap();
    assert!(residual < 1e-9, "‖g(y*) - y*‖ = {residual}");
}

#[test]
fn restarting_from_the_converged_density_is_idempotent() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let first = ks.solve(&helium(), None).unwrap();
    let second = ks.solve(&helium(), Some(&first.density_matrix)).unwrap();
    assert_eq!(second.status, FixedPointStatus::Converged);
    assert!(second.iterations <= 2, "took {}", second.iterations);
    assert!((second.energy - first.energy).abs() < 1e-8);
}

#[test]
fn occupied_orbitals_are_overlap_orthonormal() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();

    let fock = hamilton::DenseOperator::new(solution.fock.clone(), true);
    let overlap = h.get_overlap();
    let eig = eigen_impl::solve(&fock, &overlap, 1, &EigenOptions::default()).unwrap();
    let v = eig.eigenvectors.column(0).into_owned();
    let norm_m = v.dot(&overlap.apply(&v));
    assert!((norm_m - 1.0).abs() < 1e-10, "‖v‖²_M = {norm_m}");
}

#[test]
fn davidson_and_exact_agree_on_the_model_fock() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();

    let fock = hamilton::DenseOperator::new(solution.fock.clone(), true);
    let overlap = h.get_overlap();
    let exact = eigen_impl::solve(&fock, &overlap, 2, &EigenOptions::default()).unwrap();
    let david = eigen_impl::solve(
        &fock,
        &overlap,
        2,
        &EigenOptions {
            method: EigenMethod::Davidson,
            ..EigenOptions::default()
        },
    )
    .unwrap();
    for j in 0..2 {
        assert!(
            (exact.eigenvalues[j] - david.eigenvalues[j]).abs() < 1e-6,
            "pair {j}: {} vs {}",
            exact.eigenvalues[j],
            david.eigenvalues[j]
        );
    }
}

#[test]
fn energy_gradient_matches_finite_differences() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let params = helium();
    let solution = ks.solve(&params, None).unwrap();
    let grad = ks.energy_gradient(&solution).unwrap();

    let step = 1e-3;
    let solve_energy = |p: &ExternalParams| ks.solve(p, None).unwrap().energy;
    let fd_checks = [
        (
            0,
            ExternalParams {
                atomz: params.atomz + step,
                ..params.clone()
            },
            ExternalParams {
                atomz: params.atomz - step,
                ..params.clone()
            },
        ),
        (
            1,
            ExternalParams {
                vext_strength: params.vext_strength + step,
                ..params.clone()
            },
            ExternalParams {
                vext_strength: params.vext_strength - step,
                ..params.clone()
            },
        ),
    ];
    for (index, up, dn) in fd_checks {
        let fd = (solve_energy(&up) - solve_energy(&dn)) / (2.0 * step);
        let tol = 1e-4 * fd.abs().max(1.0);
        assert!(
            (grad[index] - fd).abs() < tol,
            "{}: implicit {} vs fd {fd}",
            ExternalParams::LABELS[index],
            grad[index]
        );
    }
}

#[test]
fn batched_systems_match_their_solo_solves() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let batch_params = vec![
        helium(),
        ExternalParams {
            atomz: 2.0,
            vext_strength: 0.05,
        },
    ];
    let batch = ks.solve_batch(&batch_params).unwrap();
    assert_eq!(batch.len(), 2);
    // shared schedule across the batch
    assert_eq!(batch[0].iterations, batch[1].iterations);

    for (params, batched) in batch_params.iter().zip(&batch) {
        let solo = ks.solve(params, None).unwrap();
        assert!(
            (batched.energy - solo.energy).abs() < 1e-7,
            "batched {} vs solo {}",
            batched.energy,
            solo.energy
        );
    }
}

#[test]
fn snapshot_roundtrip_still_satisfies_the_fixed_point() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let solution = ks.solve(&helium(), None).unwrap();

    let path = std::env::temp_dir().join("scf_snapshot_roundtrip.json");
    let path = path.to_str().unwrap();
    scf::io::save_solution(path, &solution).unwrap();
    let reloaded = scf::io::load_solution(path).unwrap();
    std::fs::remove_file(path).ok();

    assert_eq!(reloaded.params, solution.params);
    assert!((reloaded.energy - solution.energy).abs() < 1e-12);
    let residual = ks.verify_solution(&reloaded).unwrap();
    assert!(residual < 1e-8, "reloaded residual {residual}");
}

#[test]
fn confinement_raises_the_occupied_level() {
    let (h, xc) = model();
    let ks = KohnSham::new(&h, &xc, 2.0, tight_options()).unwrap();
    let free = ks.solve(&helium(), None).unwrap();
    let confined = ks
        .solve(
            &ExternalParams {
                atomz: 2.0,
                vext_strength: 0.1,
            },
            None,
        )
        .unwrap();
    assert!(confined.eigenvalues[0] > free.eigenvalues[0]);
}
