//! Nonlinear least-squares optimization of the pose graph.
//!
//! The solver is Gauss-Newton on the sparse normal equations assembled by
//! [`crate::core::LinearSystem`]. Updates are additive on the flat state vector.

use crate::core::{CoreResult, Graph};
use crate::error::SlamResult;
use crate::linalg::LinAlgError;
use faer::Mat;
use std::collections::HashMap;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;
use web_time as time;

pub mod gauss_newton;

pub use gauss_newton::{GaussNewton, GaussNewtonConfig};

// Re-export observer types from the observers module
pub use crate::observers::{OptObserver, OptObserverVec};

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// The sparse solver could not solve the normal equations
    #[error("Linear system solve failed at iteration {iteration}: {source}")]
    LinearSolveFailed {
        iteration: usize,
        #[source]
        source: LinAlgError,
    },

    /// No pose could be chosen to fix the gauge freedom
    #[error("No gauge anchor: the graph has no pose-pose edge to anchor the solution")]
    MissingGaugeAnchor,

    /// Graph has no nodes to optimize
    #[error("Graph has no nodes to optimize")]
    EmptyProblem,

    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error for debugging context
    ///
    /// # Arguments
    /// * `source_error` - The original error (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Detailed convergence information.
#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    /// Norm of the right-hand side `b` at the last linearization
    pub final_gradient_norm: f64,
    /// Norm of the last applied update
    pub final_step_norm: f64,
    /// Number of linear systems built and solved
    pub linearizations: usize,
}

impl Display for ConvergenceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final step norm: {:.2e}, Linearizations: {}",
            self.final_gradient_norm, self.final_step_norm, self.linearizations
        )
    }
}

/// Terminal state of an optimization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Consecutive step norms stopped changing
    Converged,
    /// Iteration budget exhausted
    MaxIterationsReached,
    /// Wall-clock budget exhausted between two iterations
    Timeout,
    /// NaN or Inf in the step or the cost
    InvalidNumericalValues,
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
            OptimizationStatus::InvalidNumericalValues => {
                write!(f, "Invalid numerical values (NaN/Inf) detected")
            }
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Global cost before the first update
    pub initial_cost: f64,
    /// Global cost after the last applied update
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// `‖dx‖₂` of every iteration, in order
    pub step_norms: Vec<f64>,
    /// Global cost after every iteration, in order
    pub costs: Vec<f64>,
    /// Total time elapsed
    pub elapsed_time: time::Duration,
    /// Convergence statistics
    pub convergence_info: Option<ConvergenceInfo>,
    /// Per-node covariance blocks keyed by node id
    ///
    /// `None` unless `compute_covariances` is enabled in the optimizer config.
    /// Poses get 3×3 blocks, landmarks 2×2.
    pub covariances: Option<HashMap<usize, Mat<f64>>>,
}

impl SolverResult {
    pub fn converged(&self) -> bool {
        self.status == OptimizationStatus::Converged
    }
}

/// Run Gauss-Newton with default settings and at most `max_iterations` iterations.
///
/// Returns the step norm of every iteration. The graph holds the optimized
/// estimate afterwards.
pub fn optimize(graph: &mut Graph, max_iterations: usize) -> SlamResult<Vec<f64>> {
    let config = GaussNewtonConfig::new().with_max_iterations(max_iterations);
    let mut solver = GaussNewton::with_config(config);
    Ok(solver.optimize(graph)?.step_norms)
}

/// Total weighted squared error `Σ eᵀΩe` of the graph at its current state
pub fn global_cost(graph: &Graph) -> CoreResult<f64> {
    graph.global_cost()
}
