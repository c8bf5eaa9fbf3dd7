//! Exchange-correlation collaborators.
//!
//! The engine only sees `PotentialAssembler`; the Hartree (Poisson) part is
//! an external collaborator and is not bundled here.

use nalgebra::DVector;

use crate::density::DensityInfo;

/// Maps a density to the effective potential and matching energy density on
/// the grid.
pub trait PotentialAssembler {
    /// Whether `assemble` consumes the density gradient (GGA-style input).
    fn needs_gradient(&self) -> bool {
        false
    }

    /// Effective one-body potential `v(r)` for the given density.
    fn assemble(&self, dens: &DensityInfo) -> DVector<f64>;

    /// Energy density `e(r)` whose functional derivative is `assemble`.
    fn energy_density(&self, dens: &DensityInfo) -> DVector<f64>;
}

/// Dirac exchange (the LDA exchange functional):
/// `e_x(ρ) = -C ρ^{4/3}`, `v_x(ρ) = -(4C/3) ρ^{1/3}`,
/// with `C = (3/4)(3/π)^{1/3}`.
#[derive(Debug, Clone, Default)]
pub struct DiracExchange;

const C_X: f64 = 0.738_558_766_382_022_4;

impl DiracExchange {
    pub fn new() -> Self {
        DiracExchange
    }
}

impl PotentialAssembler for DiracExchange {
    fn assemble(&self, dens: &DensityInfo) -> DVector<f64> {
        // densities can dip slightly negative from quadrature round-off
        dens.value
            .map(|rho| -(4.0 / 3.0) * C_X * rho.max(0.0).powf(1.0 / 3.0))
    }

    fn energy_density(&self, dens: &DensityInfo) -> DVector<f64> {
        dens.value.map(|rho| -C_X * rho.max(0.0).powf(4.0 / 3.0))
    }
}
