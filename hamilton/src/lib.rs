//! Collaborator-side abstractions for the self-consistent-field engine:
//! linear operators, grid quadrature, densities on the grid, and a concrete
//! single-atom model system used by the binary and the tests.

pub mod density;
pub mod grid;
pub mod model;
pub mod operator;
pub mod xc;

pub use density::DensityInfo;
pub use grid::RadialGrid;
pub use model::{GaussAtomHamiltonian, Hamiltonian};
pub use operator::{DenseOperator, Operator};
pub use xc::{DiracExchange, PotentialAssembler};
