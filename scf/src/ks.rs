//! Restricted Kohn-Sham self-consistency over a basis Hamiltonian.
//!
//! The iteration map is "diagonalize the Fock operator, build and
//! renormalize the density matrix, reassemble the potential, form the next
//! Fock operator". The driver finds its fixed point; the implicit layer
//! differentiates the converged result with respect to the external
//! parameter manifest.

use hamilton::{DenseOperator, Hamiltonian, PotentialAssembler};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adjoint::{AdjointOptions, DifferentiableMap, Linearization};
use crate::density;
use crate::eigen_impl::{self, EigenOptions};
use crate::error::{Result, ScfError};
use crate::fixed_point::{self, FixedPointOptions, FixedPointState, FixedPointStatus};

/// Typed manifest of the differentiable external parameters. Passed into
/// the solve explicitly; gradients are reported in this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalParams {
    /// Nuclear charge of the central atom.
    pub atomz: f64,
    /// Strength of the harmonic confinement field `v(r) = strength · r²`.
    pub vext_strength: f64,
}

impl ExternalParams {
    pub const LABELS: [&'static str; 2] = ["atomz", "vext_strength"];

    pub fn flatten(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.atomz, self.vext_strength])
    }

    pub fn from_flat(theta: &DVector<f64>) -> Self {
        ExternalParams {
            atomz: theta[0],
            vext_strength: theta[1],
        }
    }
}

#[derive(Debug, Clone)]
pub struct KsOptions {
    pub fixed_point: FixedPointOptions,
    pub eigen: EigenOptions,
    pub adjoint: AdjointOptions,
    /// Step for the finite-difference energy partials feeding the implicit
    /// solve.
    pub fd_step: f64,
}

impl Default for KsOptions {
    fn default() -> Self {
        KsOptions {
            fixed_point: FixedPointOptions::default(),
            eigen: EigenOptions::default(),
            adjoint: AdjointOptions::default(),
            // large enough to keep round-off out of the directional
            // derivatives the Krylov solve consumes
            fd_step: 1e-5,
        }
    }
}

/// Converged solution, annotated with its convergence status. Holds enough
/// to recheck `g(y*) ≈ y*` after a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KsSolution {
    pub fock: DMatrix<f64>,
    pub density_matrix: DMatrix<f64>,
    pub eigenvalues: DVector<f64>,
    pub energy: f64,
    pub status: FixedPointStatus,
    pub residual: f64,
    pub iterations: usize,
    pub params: ExternalParams,
}

/// Restricted (closed-shell) Kohn-Sham engine over a basis Hamiltonian and
/// a potential assembler.
pub struct KohnSham<'a, H: Hamiltonian, X: PotentialAssembler> {
    hamiltonian: &'a H,
    xc: &'a X,
    numel: f64,
    norb: usize,
    options: KsOptions,
}

impl<'a, H: Hamiltonian, X: PotentialAssembler> KohnSham<'a, H, X> {
    pub fn new(hamiltonian: &'a H, xc: &'a X, numel: f64, options: KsOptions) -> Result<Self> {
        options.fixed_point.validate()?;
        if !(numel > 0.0) {
            return Err(ScfError::InvalidConfiguration(
                "electron count must be positive".into(),
            ));
        }
        let norb = (numel / 2.0).round() as usize;
        if norb == 0 || (norb as f64 * 2.0 - numel).abs() > 1e-12 {
            return Err(ScfError::InvalidConfiguration(format!(
                "closed-shell engine needs an even electron count, got {numel}"
            )));
        }
        if norb > hamiltonian.nbasis() {
            return Err(ScfError::InvalidConfiguration(format!(
                "{norb} occupied orbitals do not fit a {}-function basis",
                hamiltonian.nbasis()
            )));
        }
        if hamiltonian.grid().is_empty() {
            return Err(ScfError::InvalidConfiguration(
                "hamiltonian carries an empty integration grid".into(),
            ));
        }
        Ok(KohnSham {
            hamiltonian,
            xc,
            numel,
            norb,
            options,
        })
    }

    pub fn norb(&self) -> usize {
        self.norb
    }

    /// Run the self-consistent iteration for the given parameter manifest.
    /// `dm0` seeds the iteration; otherwise the bare-Hamiltonian guess is
    /// run through one forward pass.
    pub fn solve(&self, params: &ExternalParams, dm0: Option<&DMatrix<f64>>) -> Result<KsSolution> {
        let map = ScfMap { ks: self };
        let theta = params.flatten();
        let y0 = self.initial_iterate(&map, params, dm0)?;

        let state = fixed_point::solve(|y| map.eval(y, &theta), y0, &self.options.fixed_point)?;
        self.finalize(state, params)
    }

    /// Solve several parameter manifests as one batch: every system runs
    /// the same iteration schedule and convergence is aggregate. Data
    /// parallel over the batch, sequential over iterations.
    pub fn solve_batch(&self, params_list: &[ExternalParams]) -> Result<Vec<KsSolution>>
    where
        H: Sync,
        X: Sync,
    {
        let map = ScfMap { ks: self };
        let thetas: Vec<DVector<f64>> = params_list.iter().map(|p| p.flatten()).collect();
        let mut y0s = Vec::with_capacity(params_list.len());
        for params in params_list {
            y0s.push(self.initial_iterate(&map, params, None)?);
        }

        let states = fixed_point::solve_batch(
            &|i: usize, y: &DVector<f64>| map.eval(y, &thetas[i]),
            y0s,
            &self.options.fixed_point,
        )?;

        states
            .into_iter()
            .zip(params_list)
            .map(|(state, params)| self.finalize(state, params))
            .collect()
    }

    /// Total-energy derivative with respect to the parameter manifest,
    /// computed by the implicit-function solve at the fixed point plus the
    /// explicit partial. Entries follow `ExternalParams::LABELS`.
    pub fn energy_gradient(&self, solution: &KsSolution) -> Result<DVector<f64>> {
        let map = ScfMap { ks: self };
        let y = flatten(&solution.fock);
        let theta = solution.params.flatten();
        let h = self.options.fd_step;

        // The energy has no explicit manifest dependence: every parameter
        // enters through the Fock fixed point, so dE/dθ is the implicit
        // term alone.
        let scalar = |y: &DVector<f64>| -> Result<f64> {
            let fock = unflatten(y);
            let (eigenvalues, dm) = self.fock_to_dm(&fock)?;
            self.energy(&dm, &eigenvalues)
        };

        // seed w = ∂E/∂y
        let mut seed = DVector::zeros(y.len());
        for i in 0..y.len() {
            let mut up = y.clone();
            up[i] += h;
            let mut dn = y.clone();
            dn[i] -= h;
            seed[i] = (scalar(&up)? - scalar(&dn)?) / (2.0 * h);
        }

        let lin = Linearization::at(&map, y, theta)?;
        lin.gradient(&seed, &self.options.adjoint)
    }

    /// Residual `‖g(y) - y‖` of a solution, e.g. one reloaded from disk.
    pub fn verify_solution(&self, solution: &KsSolution) -> Result<f64> {
        let map = ScfMap { ks: self };
        let y = flatten(&solution.fock);
        let gy = map.eval(&y, &solution.params.flatten())?;
        Ok((gy - y).norm())
    }

    fn initial_iterate(
        &self,
        map: &ScfMap<'_, 'a, H, X>,
        params: &ExternalParams,
        dm0: Option<&DMatrix<f64>>,
    ) -> Result<DVector<f64>> {
        let theta = params.flatten();
        match dm0 {
            Some(dm) => {
                if dm.nrows() != self.hamiltonian.nbasis() || dm.ncols() != self.hamiltonian.nbasis()
                {
                    return Err(ScfError::InvalidConfiguration(format!(
                        "initial density matrix is {}x{}, basis dimension is {}",
                        dm.nrows(),
                        dm.ncols(),
                        self.hamiltonian.nbasis()
                    )));
                }
                Ok(flatten(&self.dm_to_fock(dm, params)?))
            }
            None => {
                // bare guess pushed through one forward pass so the first
                // iterate already lies in the range of the map
                let bare = flatten(&self.bare_fock(params));
                map.eval(&bare, &theta)
            }
        }
    }

    fn finalize(&self, state: FixedPointState, params: &ExternalParams) -> Result<KsSolution> {
        let fock = unflatten(&state.y);
        let (eigenvalues, dm) = self.fock_to_dm(&fock)?;
        let energy = self.energy(&dm, &eigenvalues)?;
        info!(
            "self-consistency finished after {} iterations: E = {:.10} au (residual {:.3e})",
            state.iterations, energy, state.residual
        );
        Ok(KsSolution {
            fock,
            density_matrix: dm,
            eigenvalues,
            energy,
            status: state.status,
            residual: state.residual,
            iterations: state.iterations,
            params: params.clone(),
        })
    }

    /// Diagonalize a Fock matrix against the overlap and build the
    /// normalized density matrix from the occupied orbitals.
    fn fock_to_dm(&self, fock: &DMatrix<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let op = DenseOperator::new(fock.clone(), true);
        let overlap = self.hamiltonian.get_overlap();
        let eig = eigen_impl::solve(&op, &overlap, self.norb, &self.options.eigen)?;
        let dm = density::build(&eig.eigenvectors);
        let dm = density::normalize(&dm, &overlap, self.numel)?;
        Ok((eig.eigenvalues, dm))
    }

    /// Assemble the next Fock matrix from a density matrix: density on the
    /// grid, effective potential, then the one-body operator.
    fn dm_to_fock(&self, dm: &DMatrix<f64>, params: &ExternalParams) -> Result<DMatrix<f64>> {
        let dens = self.hamiltonian.dm2dens(dm, self.xc.needs_gradient());
        let vks = self.xc.assemble(&dens);
        let vtot = self.vext_field(params.vext_strength) + vks;
        Ok(self
            .hamiltonian
            .get_hamiltonian(&vtot, params.atomz)
            .into_matrix())
    }

    fn bare_fock(&self, params: &ExternalParams) -> DMatrix<f64> {
        self.hamiltonian
            .get_hamiltonian(&self.vext_field(params.vext_strength), params.atomz)
            .into_matrix()
    }

    fn vext_field(&self, strength: f64) -> DVector<f64> {
        self.hamiltonian.grid().points().map(|r| strength * r * r)
    }

    /// Total energy: `2 Σ εᵢ - ∫ v_xc ρ + ∫ e_xc + E_nuclei`. The sum of
    /// eigenvalues double-counts the assembled potential; the correction
    /// swaps it for the energy density.
    pub fn energy(&self, dm: &DMatrix<f64>, eigenvalues: &DVector<f64>) -> Result<f64> {
        let grid = self.hamiltonian.grid();
        let dens = self.hamiltonian.dm2dens(dm, self.xc.needs_gradient());
        let eks = grid.integrate(&self.xc.energy_density(&dens));
        let vks = self.xc.assemble(&dens);
        let vks_int = grid.integrate(&vks.component_mul(&dens.value));
        let total =
            2.0 * eigenvalues.sum() - vks_int + eks + self.hamiltonian.nuclei_energy();
        if !total.is_finite() {
            return Err(ScfError::NumericalDegeneracy(
                "total energy is not finite".into(),
            ));
        }
        Ok(total)
    }
}

/// The self-consistency map as a differentiable fixed-point map over the
/// flattened Fock matrix.
struct ScfMap<'k, 'a, H: Hamiltonian, X: PotentialAssembler> {
    ks: &'k KohnSham<'a, H, X>,
}

impl<H: Hamiltonian, X: PotentialAssembler> DifferentiableMap for ScfMap<'_, '_, H, X> {
    fn dim(&self) -> usize {
        let n = self.ks.hamiltonian.nbasis();
        n * n
    }

    fn nparams(&self) -> usize {
        ExternalParams::LABELS.len()
    }

    fn fd_step(&self) -> f64 {
        self.ks.options.fd_step
    }

    fn eval(&self, y: &DVector<f64>, theta: &DVector<f64>) -> Result<DVector<f64>> {
        let fock = unflatten(y);
        let params = ExternalParams::from_flat(theta);
        let (_, dm) = self.ks.fock_to_dm(&fock)?;
        Ok(flatten(&self.ks.dm_to_fock(&dm, &params)?))
    }
}

fn flatten(m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_column_slice(m.as_slice())
}

fn unflatten(y: &DVector<f64>) -> DMatrix<f64> {
    let n = (y.len() as f64).sqrt().round() as usize;
    DMatrix::from_column_slice(n, n, y.as_slice())
}
