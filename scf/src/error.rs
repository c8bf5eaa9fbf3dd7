//! Error taxonomy of the engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScfError>;

#[derive(Debug, Error)]
pub enum ScfError {
    /// An iterative solve ran out of budget before reaching tolerance.
    /// Recoverable: the caller may retry with a larger budget or accept the
    /// annotated best-effort state where one is returned.
    #[error("{context} did not converge within {iterations} iterations (residual {residual:.3e})")]
    NonConvergence {
        context: &'static str,
        iterations: usize,
        residual: f64,
    },

    /// Near-zero normalization denominator, non-positive-definite overlap,
    /// non-finite intermediate. Fatal for the current solve; never papered
    /// over with a NaN-producing division.
    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// A sensitivity was requested through a path for which gradients are
    /// not modeled. Raised loudly instead of returning a wrong value.
    #[error("unimplemented gradient path: {0}")]
    UnimplementedGradientPath(String),

    /// Rejected before any iteration starts.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
