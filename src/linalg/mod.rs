pub mod cholesky;
pub mod qr;

use crate::core::Graph;
use faer::{Mat, sparse::SparseColMat};
use std::{
    collections::HashMap,
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    #[default]
    SparseCholesky,
    SparseQR,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::SparseCholesky => write!(f, "Sparse Cholesky"),
            LinearSolverType::SparseQR => write!(f, "Sparse QR"),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, QR, etc.)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular, indefinite or otherwise non-invertible information matrix
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Right-hand side does not match the matrix
    #[error("Dimension mismatch: matrix is {matrix}×{matrix}, right-hand side has {rhs} rows")]
    DimensionMismatch { matrix: usize, rhs: usize },
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// This logs both the LinAlgError and the underlying faer error
    /// (`LltError`, `FaerError`, ...).
    ///
    /// # Example
    /// ```ignore
    /// SymbolicLlt::try_new(matrix.symbolic(), Side::Lower)
    ///     .map_err(|e| {
    ///         LinAlgError::FactorizationFailed(
    ///             "Symbolic Cholesky decomposition failed".to_string()
    ///         )
    ///         .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Trait for sparse solvers of the normal equations `H·dx = b`
pub trait SparseLinearSolver {
    /// Solve `H·dx = b` for `dx`
    ///
    /// # Errors
    /// Returns `LinAlgError` if:
    /// - The right-hand side does not match `H`
    /// - Matrix factorization fails
    /// - `H` is singular or indefinite
    fn solve(
        &mut self,
        hessian: &SparseColMat<usize, f64>,
        rhs: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>>;

    /// Get the information matrix factorized by the last solve
    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>>;

    /// Compute the covariance matrix `H⁻¹` from the cached factorization
    ///
    /// Returns None if no factorization is available.
    fn compute_covariance_matrix(&mut self) -> Option<&Mat<f64>>;

    /// Get the cached covariance matrix, None if it has not been computed yet
    fn get_covariance_matrix(&self) -> Option<&Mat<f64>>;
}

pub use cholesky::SparseCholeskySolver;
pub use qr::SparseQRSolver;

/// Create the solver backend selected by `solver_type`
pub fn create_solver(solver_type: LinearSolverType) -> Box<dyn SparseLinearSolver> {
    match solver_type {
        LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
        LinearSolverType::SparseQR => Box::new(SparseQRSolver::new()),
    }
}

pub(crate) fn check_dimensions(
    hessian: &SparseColMat<usize, f64>,
    rhs: &Mat<f64>,
) -> LinAlgResult<()> {
    if hessian.nrows() != hessian.ncols() || rhs.nrows() != hessian.nrows() {
        return Err(LinAlgError::DimensionMismatch {
            matrix: hessian.ncols(),
            rhs: rhs.nrows(),
        }
        .log());
    }
    Ok(())
}

/// True when both matrices share the same sparsity pattern
pub(crate) fn same_pattern(a: &SparseColMat<usize, f64>, b: &SparseColMat<usize, f64>) -> bool {
    let (a, b) = (a.symbolic(), b.symbolic());
    a.nrows() == b.nrows()
        && a.ncols() == b.ncols()
        && a.col_ptr() == b.col_ptr()
        && a.row_idx() == b.row_idx()
}

/// Extract per-node covariance blocks from the full covariance matrix.
///
/// Given `H⁻¹` over the whole state vector, returns the diagonal block of every
/// node keyed by node id: 3×3 for poses, 2×2 for landmarks.
pub fn extract_node_covariances(
    full_covariance: &Mat<f64>,
    graph: &Graph,
) -> HashMap<usize, Mat<f64>> {
    graph
        .nodes()
        .iter()
        .filter(|node| node.offset + node.dimension() <= full_covariance.nrows())
        .map(|node| {
            let dim = node.dimension();
            let start = node.offset;
            let block = Mat::from_fn(dim, dim, |i, j| full_covariance[(start + i, start + j)]);
            (node.id, block)
        })
        .collect()
}
