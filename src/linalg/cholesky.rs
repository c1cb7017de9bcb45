use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, check_dimensions, same_pattern,
};

#[derive(Debug, Clone)]
pub struct SparseCholeskySolver {
    factorizer: Option<Llt<usize, f64>>,

    /// Cached symbolic factorization for reuse across iterations.
    ///
    /// The pattern of `H` only depends on the edge set, so within one
    /// optimization the symbolic analysis is computed once.
    symbolic_factorization: Option<SymbolicLlt<usize>>,

    /// The information matrix factorized by the last solve
    hessian: Option<SparseColMat<usize, f64>>,

    /// The covariance matrix `H⁻¹`.
    ///
    /// This is `None` until requested, or if no factorization is available.
    covariance_matrix: Option<Mat<f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        SparseCholeskySolver {
            factorizer: None,
            symbolic_factorization: None,
            hessian: None,
            covariance_matrix: None,
        }
    }
}

impl Default for SparseCholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
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
            // SymbolicLlt is reference-counted, clone is O(1)
            Some(cached_sym) if reusable => cached_sym.clone(),
            _ => {
                let new_sym =
                    SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
                        LinAlgError::FactorizationFailed(
                            "Symbolic Cholesky decomposition failed".to_string(),
                        )
                        .log_with_source(e)
                    })?;
                self.symbolic_factorization = Some(new_sym.clone());
                new_sym
            }
        };

        // A non-positive pivot means H is singular or indefinite
        let cholesky = Llt::try_new_with_symbolic(sym, hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        let dx = cholesky.solve(rhs);
        self.hessian = Some(hessian.clone());
        self.factorizer = Some(cholesky);
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
            // Solve H * X = I
            let identity = Mat::identity(n, n);
            self.covariance_matrix = Some(factorizer.solve(&identity));
        }
        self.covariance_matrix.as_ref()
    }

    fn get_covariance_matrix(&self) -> Option<&Mat<f64>> {
        self.covariance_matrix.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    const TOLERANCE: f64 = 1e-10;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Symmetric positive definite 3×3 system with a known solution
    fn create_test_data()
    -> Result<(SparseColMat<usize, f64>, Mat<f64>, [f64; 3]), faer::sparse::CreationError> {
        // H = [[4, 1, 0], [1, 3, 1], [0, 1, 2]], x = [1, -1, 2]
        let triplets = vec![
            Triplet::new(0, 0, 4.0),
            Triplet::new(0, 1, 1.0),
            Triplet::new(1, 0, 1.0),
            Triplet::new(1, 1, 3.0),
            Triplet::new(1, 2, 1.0),
            Triplet::new(2, 1, 1.0),
            Triplet::new(2, 2, 2.0),
        ];
        let hessian = SparseColMat::try_new_from_triplets(3, 3, &triplets)?;
        let rhs = Mat::from_fn(3, 1, |i, _| match i {
            0 => 3.0,
            1 => 0.0,
            _ => 3.0,
        });
        Ok((hessian, rhs, [1.0, -1.0, 2.0]))
    }

    #[test]
    fn test_solver_creation() {
        let solver = SparseCholeskySolver::new();
        assert!(solver.factorizer.is_none());
        assert!(solver.get_hessian().is_none());

        let default_solver = SparseCholeskySolver::default();
        assert!(default_solver.factorizer.is_none());
    }

    #[test]
    fn test_numerical_accuracy() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (hessian, rhs, expected) = create_test_data()?;

        let solution = solver.solve(&hessian, &rhs)?;
        assert_eq!(solution.nrows(), 3);
        assert_eq!(solution.ncols(), 1);
        for (i, value) in expected.iter().enumerate() {
            assert!((solution[(i, 0)] - value).abs() < TOLERANCE);
        }
        assert!(solver.factorizer.is_some());
        assert!(solver.get_hessian().is_some());
        Ok(())
    }

    #[test]
    fn test_symbolic_pattern_caching() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (hessian, rhs, _) = create_test_data()?;

        let sol1 = solver.solve(&hessian, &rhs)?;
        assert!(solver.symbolic_factorization.is_some());
        let sol2 = solver.solve(&hessian, &rhs)?;

        for i in 0..sol1.nrows() {
            assert!((sol1[(i, 0)] - sol2[(i, 0)]).abs() < TOLERANCE);
        }
        Ok(())
    }

    #[test]
    fn test_pattern_change_triggers_new_symbolic() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (hessian, rhs, _) = create_test_data()?;
        solver.solve(&hessian, &rhs)?;

        let diagonal = SparseColMat::try_new_from_triplets(
            3,
            3,
            &[
                Triplet::new(0, 0, 2.0),
                Triplet::new(1, 1, 2.0),
                Triplet::new(2, 2, 2.0),
            ],
        )?;
        let solution = solver.solve(&diagonal, &rhs)?;
        assert!((solution[(0, 0)] - 1.5).abs() < TOLERANCE);
        assert!((solution[(2, 0)] - 1.5).abs() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_singular_matrix() -> TestResult {
        let mut solver = SparseCholeskySolver::new();

        // Second row is 2x the first row
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 1, 2.0),
            Triplet::new(1, 0, 2.0),
            Triplet::new(1, 1, 4.0),
        ];
        let singular = SparseColMat::try_new_from_triplets(2, 2, &triplets)?;
        let rhs = Mat::from_fn(2, 1, |i, _| i as f64);

        let result = solver.solve(&singular, &rhs);
        assert!(matches!(result, Err(LinAlgError::SingularMatrix)));
        Ok(())
    }

    #[test]
    fn test_zero_diagonal_block_is_singular() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        // Third unknown is not coupled to anything
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(1, 1, 1.0),
            Triplet::new(2, 2, 0.0),
        ];
        let hessian = SparseColMat::try_new_from_triplets(3, 3, &triplets)?;
        let rhs = Mat::zeros(3, 1);

        assert!(matches!(
            solver.solve(&hessian, &rhs),
            Err(LinAlgError::SingularMatrix)
        ));
        Ok(())
    }

    #[test]
    fn test_dimension_mismatch() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (hessian, _, _) = create_test_data()?;
        let rhs = Mat::zeros(2, 1);

        assert!(matches!(
            solver.solve(&hessian, &rhs),
            Err(LinAlgError::DimensionMismatch { matrix: 3, rhs: 2 })
        ));
        Ok(())
    }

    #[test]
    fn test_covariance_computation() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        assert!(solver.compute_covariance_matrix().is_none());

        let (hessian, rhs, _) = create_test_data()?;
        solver.solve(&hessian, &rhs)?;

        let cov = solver
            .compute_covariance_matrix()
            .ok_or("covariance should be available after a solve")?
            .clone();
        assert_eq!(cov.nrows(), 3);

        // H · H⁻¹ = I
        let dense_h = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 4.0,
            (1, 1) => 3.0,
            (2, 2) => 2.0,
            (0, 1) | (1, 0) | (1, 2) | (2, 1) => 1.0,
            _ => 0.0,
        });
        let product = &dense_h * &cov;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product[(i, j)] - expected).abs() < 1e-9);
            }
        }

        // Symmetric
        for i in 0..3 {
            for j in 0..3 {
                assert!((cov[(i, j)] - cov[(j, i)]).abs() < TOLERANCE);
            }
        }
        assert!(solver.get_covariance_matrix().is_some());
        Ok(())
    }
}
