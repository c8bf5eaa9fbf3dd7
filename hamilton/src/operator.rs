//! Abstract linear operators over a fixed-dimension real vector space.

use nalgebra::{DMatrix, DVector};

/// Opaque linear map consumed by the eigensolvers and the SCF engine.
///
/// Implementations must expose matrix-vector products; dense materialization
/// is optional and only consulted by the small-system exact paths. Operators
/// are immutable — a new instance is produced whenever the underlying
/// density changes.
pub trait Operator {
    fn shape(&self) -> (usize, usize);

    fn is_symmetric(&self) -> bool;

    fn is_real(&self) -> bool {
        true
    }

    /// Apply the operator to a vector.
    fn apply(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Apply the operator to each column of `x`.
    fn apply_mat(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let (rows, _) = self.shape();
        let mut out = DMatrix::zeros(rows, x.ncols());
        for j in 0..x.ncols() {
            let col = self.apply(&x.column(j).into_owned());
            out.set_column(j, &col);
        }
        out
    }

    /// Dense materialization, if the operator supports it.
    fn dense(&self) -> Option<DMatrix<f64>> {
        None
    }

    /// Diagonal of the operator, used for preconditioning. The default goes
    /// through `apply` with coordinate vectors and costs one apply per row.
    fn diagonal(&self) -> DVector<f64> {
        let (rows, cols) = self.shape();
        let mut diag = DVector::zeros(rows.min(cols));
        for i in 0..diag.len() {
            let mut e = DVector::zeros(cols);
            e[i] = 1.0;
            diag[i] = self.apply(&e)[i];
        }
        diag
    }
}

/// Dense operator backed by a matrix, with explicit symmetry flags.
#[derive(Debug, Clone)]
pub struct DenseOperator {
    matrix: DMatrix<f64>,
    symmetric: bool,
}

impl DenseOperator {
    pub fn new(matrix: DMatrix<f64>, symmetric: bool) -> Self {
        DenseOperator { matrix, symmetric }
    }

    /// Symmetric operator from its diagonal.
    pub fn from_diagonal(diag: &DVector<f64>) -> Self {
        DenseOperator {
            matrix: DMatrix::from_diagonal(diag),
            symmetric: true,
        }
    }

    pub fn identity(n: usize) -> Self {
        DenseOperator {
            matrix: DMatrix::identity(n, n),
            symmetric: true,
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.matrix
    }
}

impl Operator for DenseOperator {
    fn shape(&self) -> (usize, usize) {
        (self.matrix.nrows(), self.matrix.ncols())
    }

    fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.matrix * x
    }

    fn apply_mat(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        &self.matrix * x
    }

    fn dense(&self) -> Option<DMatrix<f64>> {
        Some(self.matrix.clone())
    }

    fn diagonal(&self) -> DVector<f64> {
        self.matrix.diagonal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_operator_applies_like_its_matrix() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 5.0]);
        let op = DenseOperator::new(m.clone(), true);
        let x = DVector::from_vec(vec![1.0, -1.0]);
        assert_eq!(op.apply(&x), &m * &x);
        assert_eq!(op.diagonal(), m.diagonal());
        assert_eq!(op.shape(), (2, 2));
    }

    #[test]
    fn default_diagonal_goes_through_apply() {
        struct Shift;
        impl Operator for Shift {
            fn shape(&self) -> (usize, usize) {
                (3, 3)
            }
            fn is_symmetric(&self) -> bool {
                true
            }
            fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
                DVector::from_fn(3, |i, _| (i as f64 + 1.0) * x[i])
            }
        }
        let diag = Shift.diagonal();
        assert_eq!(diag, DVector::from_vec(vec![1.0, 2.0, 3.0]));
    }
}
