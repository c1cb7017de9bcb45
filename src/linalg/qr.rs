use faer::{
    Mat,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Qr, SymbolicQr},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, check_dimensions, same_pattern,
};

/// Sparse QR backend for ill-conditioned information matrices.
///
/// The sparse QR happily returns a finite but arbitrary solution for a
/// rank-deficient `H`, so every solve first runs a rank test on a
/// column-pivoted QR of `H` and reports [`LinAlgError::SingularMatrix`] when
/// any `|R_ii| <= n·ε·max|R_jj|`. The test factors a dense copy of `H`.
#[derive(Debug, Clone)]
pub struct SparseQRSolver {
    factorizer: Option<Qr<usize, f64>>,

    /// Cached symbolic factorization, reused while the sparsity pattern is unchanged
    symbolic_factorization: Option<SymbolicQr<usize>>,

    hessian: Option<SparseColMat<usize, f64>>,

    covariance_matrix: Option<Mat<f64>>,
}

impl SparseQRSolver {
    pub fn new() -> Self {
        SparseQRSolver {
            factorizer: None,
            symbolic_factorization: None,
            hessian: None,
            covariance_matrix: None,
        }
    }
}

impl Default for SparseQRSolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_finite(mat: &Mat<f64>) -> bool {
    (0..mat.ncols()).all(|j| (0..mat.nrows()).all(|i| mat[(i, j)].is_finite()))
}

/// Numerical rank test on the diagonal of the column-pivoted `R` factor
fn is_rank_deficient(hessian: &SparseColMat<usize, f64>) -> bool {
    let n = hessian.ncols();
    if n == 0 {
        return false;
    }

    let r = hessian.to_dense().col_piv_qr().thin_R().to_owned();
    let diagonal: Vec<f64> = (0..n).map(|i| r[(i, i)].abs()).collect();
    let max_diagonal = diagonal.iter().copied().fold(0.0, f64::max);
    let threshold = n as f64 * f64::EPSILON * max_diagonal;

    !max_diagonal.is_finite() || max_diagonal == 0.0 || diagonal.iter().any(|&d| d <= threshold)
}

impl SparseLinearSolver for SparseQRSolver {
    fn solve(
        &mut self,
        hessian: &SparseColMat<usize, f64>,
        rhs: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>> {
        check_dimensions(hessian, rhs)?;

        let reusable = self
            .hessian
            .as_ref()
            .is_some_and(|cached| same_pattern(cached, hessian));

        let sym = match &self.symbolic_factorization {
            // SymbolicQr is reference-counted, clone is O(1)
            Some(cached_sym) if reusable => cached_sym.clone(),
            _ => {
                let new_sym = SymbolicQr::try_new(hessian.symbolic()).map_err(|e| {
                    LinAlgError::FactorizationFailed("Symbolic QR decomposition failed".to_string())
                        .log_with_source(e)
                })?;
                self.symbolic_factorization = Some(new_sym.clone());
                new_sym
            }
        };

        let qr = Qr::try_new_with_symbolic(sym, hessian.as_ref())
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        if is_rank_deficient(hessian) {
            return Err(LinAlgError::SingularMatrix.log());
        }

        let dx = qr.solve(rhs);
        if !is_finite(&dx) {
            return Err(LinAlgError::SingularMatrix.log());
        }

        self.hessian = Some(hessian.clone());
        self.factorizer = Some(qr);
        self.covariance_matrix = None;

        Ok(dx)
    }

    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>> {
        self.hessian.as_ref()
    }

    fn compute_covariance_matrix(&mut self) -> Option<&Mat<f64>> {
        if self.covariance_matrix.is_none()
            && let (Some(factorizer), Some(hessian)) = (&self.factorizer, &self.hessian)
        {
            let n = hessian.ncols();
            let identity = Mat::identity(n, n);
            let cov_matrix = factorizer.solve(&identity);
            if is_finite(&cov_matrix) {
                self.covariance_matrix = Some(cov_matrix);
            }
        }
        self.covariance_matrix.as_ref()
    }

    fn get_covariance_matrix(&self) -> Option<&Mat<f64>> {
        self.covariance_matrix.as_ref()
    }
}
