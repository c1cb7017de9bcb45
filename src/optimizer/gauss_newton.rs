//! Gauss-Newton optimization of a 2D pose graph.
//!
//! The pose graph is a nonlinear least-squares problem
//!
//! ```text
//! min F(x) = Σ_k e_k(x)ᵀ Ω_k e_k(x)
//! ```
//!
//! over the flat state vector `x` of all poses and landmarks.
//!
//! # Algorithm Overview
//!
//! Each iteration linearizes every edge around the current estimate, assembles the
//! sparse normal equations and solves them:
//!
//! ```text
//! H·dx = b        H = Σ JᵀΩJ + prior,   b = -Σ JᵀΩe
//! x ← x + dx
//! ```
//!
//! The update is additive on the state vector, so headings are not re-wrapped
//! after the update; every residual wraps its own angle difference instead.
//!
//! ## Gauge freedom
//!
//! Relative measurements do not constrain the global position and heading of the
//! map, so `H` is singular without a prior. One anchor pose, chosen once per
//! call by [`AnchorPolicy`](crate::core::AnchorPolicy), receives `weight·I₃` on its
//! diagonal block. A graph with no pose-pose edge has no anchor candidate and is
//! rejected with [`OptimizerError::MissingGaugeAnchor`](crate::optimizer::OptimizerError)
//! before any solve.
//!
//! ## Termination
//!
//! - **Converged**: from the second iteration on, `|‖dx_i‖ − ‖dx_{i−1}‖| < step_norm_tolerance`
//! - **MaxIterationsReached**: the iteration budget is used up
//! - **Timeout**: the wall-clock budget ran out; checked only between iterations
//! - **InvalidNumericalValues**: the step or the cost is NaN/Inf; the offending
//!   step is not applied, and a finite step whose cost overflows is rolled back
//!
//! A singular or indefinite `H` is a hard error
//! ([`OptimizerError::LinearSolveFailed`](crate::optimizer::OptimizerError)) and is
//! never retried with regularization.
//!
//! # Examples
//!
//! ```
//! use pose_graph_slam::core::{Edge, Graph, Vertex};
//! use pose_graph_slam::optimizer::{GaussNewton, GaussNewtonConfig};
//! use nalgebra::{Matrix3, Vector3};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::load(
//!     vec![Vertex::pose(0, 0.0, 0.0, 0.0), Vertex::pose(1, 0.8, 0.1, 0.0)],
//!     vec![Edge::pose_pose(0, 1, Vector3::new(1.0, 0.0, 0.0), Matrix3::identity())],
//! )?;
//!
//! let config = GaussNewtonConfig::new().with_max_iterations(20);
//! let mut solver = GaussNewton::with_config(config);
//! let result = solver.optimize(&mut graph)?;
//!
//! assert!(result.final_cost < 1e-10);
//! # Ok(())
//! # }
//! ```

use crate::{core, error, linalg, optimizer};

use std::fmt;
use tracing::{debug, info};
use web_time as time;

/// Summary statistics for the Gauss-Newton optimization process.
#[derive(Debug, Clone)]
pub struct GaussNewtonSummary {
    /// Global cost before the first update
    pub initial_cost: f64,
    /// Global cost after the last applied update
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Maximum right-hand side norm encountered
    pub max_gradient_norm: f64,
    /// Right-hand side norm at the last linearization
    pub final_gradient_norm: f64,
    /// Maximum update norm
    pub max_step_norm: f64,
    /// Norm of the last update
    pub final_step_norm: f64,
    /// Total time elapsed
    pub total_time: time::Duration,
    /// Average time per iteration
    pub average_time_per_iteration: time::Duration,
    /// Pose that received the gauge prior
    pub anchor: Option<usize>,
    /// Detailed per-iteration statistics history
    pub iteration_history: Vec<IterationStats>,
    /// Convergence status
    pub convergence_status: optimizer::OptimizationStatus,
}

/// Per-iteration statistics for the debug table.
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Iteration number (0-indexed)
    pub iteration: usize,
    /// Global cost after this iteration's update
    pub cost: f64,
    /// Change in cost caused by this iteration
    pub cost_change: f64,
    /// `‖b‖₂` at the linearization point
    pub gradient_norm: f64,
    /// `‖dx‖₂` of this iteration
    pub step_norm: f64,
    /// `|‖dx_i‖ − ‖dx_{i−1}‖|`, the quantity tested for convergence
    pub step_norm_change: f64,
    /// Time taken for this iteration in milliseconds
    pub iter_time_ms: f64,
    /// Total elapsed time since optimization started in milliseconds
    pub total_time_ms: f64,
}

impl IterationStats {
    /// Print table header
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>13}",
            "iter",
            "cost",
            "cost_change",
            "|gradient|",
            "|step|",
            "|step|_change",
            "iter_time",
            "total_time",
        );
    }

    pub fn print_line(&self) {
        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>9.2}ms  {:>11.2}ms",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.step_norm_change,
            self.iter_time_ms,
            self.total_time_ms,
        );
    }
}

impl fmt::Display for GaussNewtonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Gauss-Newton Final Result")?;

        if self.convergence_status == optimizer::OptimizationStatus::Converged {
            writeln!(f, "CONVERGED ({:?})", self.convergence_status)?;
        } else {
            writeln!(f, "NOT CONVERGED ({:?})", self.convergence_status)?;
        }

        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:  {}", self.iterations)?;
        match self.anchor {
            Some(anchor) => writeln!(f, "  Anchor: pose {anchor}")?,
            None => writeln!(f, "  Anchor: none")?,
        }
        writeln!(f)?;
        writeln!(f, "Gradient:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_gradient_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_gradient_norm)?;
        writeln!(f)?;
        writeln!(f, "Step:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_step_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_step_norm)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )?;

        Ok(())
    }
}

/// Configuration parameters for the Gauss-Newton optimizer.
///
/// # Builder Pattern
///
/// ```
/// use pose_graph_slam::core::AnchorPolicy;
/// use pose_graph_slam::linalg::LinearSolverType;
/// use pose_graph_slam::optimizer::GaussNewtonConfig;
///
/// let config = GaussNewtonConfig::new()
///     .with_max_iterations(50)
///     .with_step_norm_tolerance(1e-6)
///     .with_anchor_policy(AnchorPolicy::FirstPosePoseEdge)
///     .with_linear_solver_type(LinearSolverType::SparseQR);
/// ```
#[derive(Debug, Clone)]
pub struct GaussNewtonConfig {
    /// Type of linear solver for the normal equations
    pub linear_solver_type: linalg::LinearSolverType,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold on the change of consecutive step norms
    pub step_norm_tolerance: f64,
    /// How the gauge anchor pose is chosen
    pub anchor_policy: core::AnchorPolicy,
    /// Diagonal weight of the gauge prior
    pub prior_weight: f64,
    /// Timeout duration, checked before each iteration
    pub timeout: Option<time::Duration>,
    /// Compute per-node covariance blocks after termination
    ///
    /// Default: false
    pub compute_covariances: bool,
}

impl Default for GaussNewtonConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: linalg::LinearSolverType::default(),
            max_iterations: 50,
            step_norm_tolerance: 1e-4,
            anchor_policy: core::AnchorPolicy::default(),
            prior_weight: core::GaugePrior::DEFAULT_WEIGHT,
            timeout: None,
            compute_covariances: false,
        }
    }
}

impl GaussNewtonConfig {
    /// Create a new Gauss-Newton configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the linear solver type
    pub fn with_linear_solver_type(mut self, linear_solver_type: linalg::LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    /// Set the maximum number of iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence threshold on consecutive step norms
    pub fn with_step_norm_tolerance(mut self, step_norm_tolerance: f64) -> Self {
        self.step_norm_tolerance = step_norm_tolerance;
        self
    }

    /// Set the gauge anchor policy
    pub fn with_anchor_policy(mut self, anchor_policy: core::AnchorPolicy) -> Self {
        self.anchor_policy = anchor_policy;
        self
    }

    /// Set the diagonal weight of the gauge prior
    pub fn with_prior_weight(mut self, prior_weight: f64) -> Self {
        self.prior_weight = prior_weight;
        self
    }

    /// Set the timeout duration
    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable covariance computation (uncertainty estimation).
    pub fn with_compute_covariances(mut self, compute_covariances: bool) -> Self {
        self.compute_covariances = compute_covariances;
        self
    }

    /// Print configuration parameters (debug level logging)
    pub fn print_configuration(&self) {
        debug!(
            "\nConfiguration:\n  Solver:              Gauss-Newton\n  Linear solver:       {}\n  Max iterations:      {}\n  Step norm tolerance: {:.2e}\n  Anchor policy:       {}\n  Prior weight:        {:.2e}\n  Timeout:             {:?}\n  Compute covariances: {}",
            self.linear_solver_type,
            self.max_iterations,
            self.step_norm_tolerance,
            self.anchor_policy,
            self.prior_weight,
            self.timeout,
            if self.compute_covariances {
                "enabled"
            } else {
                "disabled"
            }
        );
    }

    fn validate(&self) -> optimizer::OptimizerResult<()> {
        if !self.step_norm_tolerance.is_finite() || self.step_norm_tolerance < 0.0 {
            return Err(optimizer::OptimizerError::InvalidParameters(format!(
                "step norm tolerance must be finite and non-negative, got {}",
                self.step_norm_tolerance
            ))
            .log());
        }
        Ok(())
    }
}

/// Outcome of one assemble/solve/update cycle
struct StepResult {
    step_norm: f64,
    gradient_norm: f64,
    cost: f64,
}

/// Gauss-Newton solver for pose graphs.
///
/// # Examples
///
/// ```no_run
/// use pose_graph_slam::io::{G2oLoader, GraphLoader};
/// use pose_graph_slam::optimizer::GaussNewton;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut graph = G2oLoader::load("data/simulation.g2o")?;
/// let mut solver = GaussNewton::new();
/// let result = solver.optimize(&mut graph)?;
/// println!("{:?} after {} iterations", result.status, result.iterations);
/// # Ok(())
/// # }
/// ```
pub struct GaussNewton {
    config: GaussNewtonConfig,
    observers: optimizer::OptObserverVec,
}

impl Default for GaussNewton {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussNewton {
    /// Create a new Gauss-Newton solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(GaussNewtonConfig::default())
    }

    /// Create a new Gauss-Newton solver with the given configuration.
    pub fn with_config(config: GaussNewtonConfig) -> Self {
        Self {
            config,
            observers: optimizer::OptObserverVec::new(),
        }
    }

    pub fn config(&self) -> &GaussNewtonConfig {
        &self.config
    }

    /// Add an observer to the solver.
    ///
    /// Observers are notified after each update with the current graph.
    pub fn add_observer(&mut self, observer: impl optimizer::OptObserver + 'static) {
        self.observers.add(observer);
    }

    /// Check the step-norm convergence criterion
    fn check_convergence(&self, iteration: usize, step_norms: &[f64]) -> bool {
        if iteration == 0 {
            return false;
        }
        match step_norms {
            [.., previous, current] => {
                (current - previous).abs() < self.config.step_norm_tolerance
            }
            _ => false,
        }
    }

    /// Assemble and solve the normal equations, then apply the update.
    ///
    /// The update is only applied when it is finite; a non-finite step is
    /// reported through its norm.
    fn step(
        &self,
        graph: &mut core::Graph,
        gauge: &core::GaugePrior,
        linear_solver: &mut dyn linalg::SparseLinearSolver,
        iteration: usize,
    ) -> error::SlamResult<StepResult> {
        let system = core::LinearSystem::build(graph, gauge)?;
        let gradient_norm = system.rhs.norm_l2();

        let dx = linear_solver
            .solve(&system.hessian, &system.rhs)
            .map_err(|e| optimizer::OptimizerError::LinearSolveFailed {
                iteration,
                source: e,
            })?;
        let step_norm = dx.norm_l2();

        if !step_norm.is_finite() {
            return Ok(StepResult {
                step_norm,
                gradient_norm,
                cost: system.cost,
            });
        }

        let dx = nalgebra::DVector::from_fn(dx.nrows(), |i, _| dx[(i, 0)]);
        let previous_state = graph.state().clone();
        graph.apply_update(&dx)?;
        let cost = graph.global_cost()?;
        if !cost.is_finite() {
            graph.set_state(previous_state)?;
        }

        Ok(StepResult {
            step_norm,
            gradient_norm,
            cost,
        })
    }

    /// Optimize `graph` in place.
    ///
    /// # Errors
    /// - [`OptimizerError::EmptyProblem`](optimizer::OptimizerError) for a graph without nodes
    /// - [`OptimizerError::MissingGaugeAnchor`](optimizer::OptimizerError) when no anchor can be chosen
    /// - [`OptimizerError::LinearSolveFailed`](optimizer::OptimizerError) when `H` cannot be factorized
    pub fn optimize(&mut self, graph: &mut core::Graph) -> error::SlamResult<optimizer::SolverResult> {
        let start_time = time::Instant::now();
        self.config.validate()?;

        if graph.node_count() == 0 {
            return Err(optimizer::OptimizerError::EmptyProblem.log().into());
        }

        let gauge = core::GaugePrior::resolve(
            graph,
            self.config.anchor_policy,
            self.config.prior_weight,
        )?;
        if gauge.anchor.is_none() {
            return Err(optimizer::OptimizerError::MissingGaugeAnchor.log().into());
        }

        let mut linear_solver = linalg::create_solver(self.config.linear_solver_type);

        let initial_cost = graph.global_cost()?;
        let mut current_cost = initial_cost;
        let mut step_norms = Vec::with_capacity(self.config.max_iterations);
        let mut costs = Vec::with_capacity(self.config.max_iterations);
        let mut iteration_stats = Vec::new();
        let mut max_gradient_norm: f64 = 0.0;
        let mut final_gradient_norm = 0.0;

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
            IterationStats::print_header();
        }

        let mut status = optimizer::OptimizationStatus::MaxIterationsReached;
        for iteration in 0..self.config.max_iterations {
            if let Some(timeout) = self.config.timeout
                && start_time.elapsed() >= timeout
            {
                status = optimizer::OptimizationStatus::Timeout;
                break;
            }

            let iter_start = time::Instant::now();
            let step = self.step(graph, &gauge, linear_solver.as_mut(), iteration)?;

            max_gradient_norm = max_gradient_norm.max(step.gradient_norm);
            final_gradient_norm = step.gradient_norm;
            let step_norm_change = step_norms
                .last()
                .map_or(f64::NAN, |previous: &f64| (step.step_norm - previous).abs());
            step_norms.push(step.step_norm);

            if !step.step_norm.is_finite() || !step.cost.is_finite() {
                status = optimizer::OptimizationStatus::InvalidNumericalValues;
                break;
            }
            costs.push(step.cost);

            if tracing::enabled!(tracing::Level::DEBUG) {
                let stats = IterationStats {
                    iteration,
                    cost: step.cost,
                    cost_change: current_cost - step.cost,
                    gradient_norm: step.gradient_norm,
                    step_norm: step.step_norm,
                    step_norm_change,
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                };
                stats.print_line();
                iteration_stats.push(stats);
            }
            current_cost = step.cost;

            self.observers
                .set_iteration_metrics(step.cost, step.step_norm);
            self.observers.notify(graph, iteration);

            if self.check_convergence(iteration, &step_norms) {
                status = optimizer::OptimizationStatus::Converged;
                break;
            }
        }

        let elapsed = start_time.elapsed();
        let iterations = step_norms.len();
        let final_step_norm = step_norms.last().copied().unwrap_or(0.0);

        let summary = GaussNewtonSummary {
            initial_cost,
            final_cost: current_cost,
            iterations,
            max_gradient_norm,
            final_gradient_norm,
            max_step_norm: step_norms.iter().copied().fold(0.0, f64::max),
            final_step_norm,
            total_time: elapsed,
            average_time_per_iteration: if iterations > 0 {
                elapsed / iterations as u32
            } else {
                time::Duration::from_secs(0)
            },
            anchor: gauge.anchor,
            iteration_history: iteration_stats,
            convergence_status: status.clone(),
        };
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!("{}", summary);
        }
        info!(
            "Gauss-Newton finished: {} after {} iterations, cost {:.6e} -> {:.6e}",
            status, iterations, initial_cost, current_cost
        );

        let covariances = if self.config.compute_covariances {
            linear_solver
                .compute_covariance_matrix()
                .map(|cov| linalg::extract_node_covariances(cov, graph))
        } else {
            None
        };

        Ok(optimizer::SolverResult {
            status,
            initial_cost,
            final_cost: current_cost,
            iterations,
            step_norms,
            costs,
            elapsed_time: elapsed,
            convergence_info: Some(optimizer::ConvergenceInfo {
                final_gradient_norm,
                final_step_norm,
                linearizations: iterations,
            }),
            covariances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnchorPolicy, Edge, Graph, Vertex};
    use crate::error::SlamError;
    use crate::linalg::{LinAlgError, LinearSolverType};
    use crate::manifold::se2::{invert_transform, transform_to_vector, vector_to_transform};
    use crate::observers::TrajectoryRecorder;
    use crate::optimizer::{OptimizationStatus, OptimizerError};
    use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn relative_pose(graph: &Graph, from: usize, to: usize) -> Result<Vector3<f64>, SlamError> {
        let t1 = vector_to_transform(&graph.pose(from)?);
        let t2 = vector_to_transform(&graph.pose(to)?);
        Ok(transform_to_vector(&(invert_transform(&t1) * t2)))
    }

    fn toy_graph() -> Result<Graph, crate::core::CoreError> {
        Graph::load(
            vec![Vertex::pose(0, 0.0, 0.0, 0.0), Vertex::pose(1, 0.7, 0.4, 0.3)],
            vec![Edge::pose_pose(
                0,
                1,
                Vector3::new(1.0, 0.5, 0.2),
                Matrix3::from_diagonal(&Vector3::new(10.0, 10.0, 20.0)),
            )],
        )
    }

    /// Square loop with a landmark in the middle, observed from every pose
    fn loop_graph() -> Result<Graph, crate::core::CoreError> {
        let information = Matrix3::from_diagonal(&Vector3::new(50.0, 50.0, 100.0));
        let landmark_information = Matrix2::identity() * 20.0;
        let step = Vector3::new(2.0, 0.0, std::f64::consts::FRAC_PI_2);

        Graph::load(
            vec![
                Vertex::pose(0, 0.0, 0.0, 0.0),
                Vertex::pose(1, 2.1, 0.1, 1.5),
                Vertex::pose(2, 2.2, 1.9, 3.1),
                Vertex::pose(3, -0.1, 2.2, -1.6),
                Vertex::landmark(10, 0.9, 1.1),
            ],
            vec![
                Edge::pose_pose(0, 1, step, information),
                Edge::pose_pose(1, 2, step, information),
                Edge::pose_pose(2, 3, step, information),
                Edge::pose_pose(3, 0, step, information),
                Edge::pose_landmark(0, 10, Vector2::new(1.0, 1.0), landmark_information),
                Edge::pose_landmark(1, 10, Vector2::new(1.0, 1.0), landmark_information),
                Edge::pose_landmark(2, 10, Vector2::new(1.0, 1.0), landmark_information),
                Edge::pose_landmark(3, 10, Vector2::new(1.0, 1.0), landmark_information),
            ],
        )
    }

    #[test]
    fn test_toy_graph_converges_to_measurement() -> TestResult {
        let mut graph = toy_graph()?;
        let mut solver = GaussNewton::new();
        let result = solver.optimize(&mut graph)?;

        assert_eq!(result.status, OptimizationStatus::Converged);
        let relative = relative_pose(&graph, 0, 1)?;
        assert!((relative - Vector3::new(1.0, 0.5, 0.2)).norm() < 1e-6);
        assert!(result.final_cost < 1e-10);

        // Step norms shrink and end below the tolerance
        for pair in result.step_norms.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "step norms {:?}", result.step_norms);
        }
        let last = result.step_norms.last().copied().ok_or("no iterations")?;
        assert!(last < 1e-4);
        assert_eq!(result.costs.len(), result.step_norms.len());
        Ok(())
    }

    #[test]
    fn test_anchor_pose_barely_moves() -> TestResult {
        let mut graph = toy_graph()?;
        GaussNewton::new().optimize(&mut graph)?;

        // Anchor is the lowest pose id, pinned by the prior
        assert!(graph.pose(0)?.norm() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_loop_with_landmark() -> TestResult {
        let mut graph = loop_graph()?;
        let initial_cost = graph.global_cost()?;

        let config = GaussNewtonConfig::new().with_max_iterations(30);
        let result = GaussNewton::with_config(config).optimize(&mut graph)?;

        assert_eq!(result.status, OptimizationStatus::Converged);
        assert!((result.initial_cost - initial_cost).abs() < 1e-12);
        assert!(result.final_cost < 1e-8);
        assert!(result.final_cost <= result.initial_cost);

        // Landmark as seen from pose 0
        let pose = graph.pose(0)?;
        let (sin, cos) = pose[2].sin_cos();
        let delta = graph.landmark(10)? - pose.xy();
        let observed = Vector2::new(cos * delta.x + sin * delta.y, -sin * delta.x + cos * delta.y);
        assert!((observed - Vector2::new(1.0, 1.0)).norm() < 1e-5);
        let relative = relative_pose(&graph, 1, 2)?;
        assert!((relative - Vector3::new(2.0, 0.0, std::f64::consts::FRAC_PI_2)).norm() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_qr_backend_matches_cholesky() -> TestResult {
        let mut cholesky_graph = loop_graph()?;
        let mut qr_graph = loop_graph()?;

        GaussNewton::new().optimize(&mut cholesky_graph)?;
        let config = GaussNewtonConfig::new().with_linear_solver_type(LinearSolverType::SparseQR);
        GaussNewton::with_config(config).optimize(&mut qr_graph)?;

        assert!((cholesky_graph.state() - qr_graph.state()).norm() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_disconnected_node_fails_linear_solve() -> TestResult {
        let mut graph = Graph::load(
            vec![
                Vertex::pose(0, 0.0, 0.0, 0.0),
                Vertex::pose(1, 1.0, 0.0, 0.0),
                Vertex::pose(2, 5.0, 5.0, 0.0),
            ],
            vec![Edge::pose_pose(0, 1, Vector3::new(1.0, 0.0, 0.0), Matrix3::identity())],
        )?;

        let result = GaussNewton::new().optimize(&mut graph);
        assert!(matches!(
            result,
            Err(SlamError::Optimizer(OptimizerError::LinearSolveFailed {
                iteration: 0,
                source: LinAlgError::SingularMatrix,
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_disconnected_component_fails_first_qr_solve() -> TestResult {
        let information = Matrix3::identity();
        let mut graph = Graph::load(
            vec![
                Vertex::pose(0, 0.0, 0.0, 0.0),
                Vertex::pose(1, 1.1, 0.1, 0.05),
                Vertex::pose(2, 5.0, 5.0, 0.3),
                Vertex::pose(3, 6.2, 4.9, 0.2),
            ],
            vec![
                Edge::pose_pose(0, 1, Vector3::new(1.0, 0.0, 0.0), information),
                Edge::pose_pose(2, 3, Vector3::new(1.0, 0.0, 0.0), information),
            ],
        )?;
        let before = graph.state().clone();

        let config = GaussNewtonConfig::new().with_linear_solver_type(LinearSolverType::SparseQR);
        let result = GaussNewton::with_config(config).optimize(&mut graph);
        assert!(matches!(
            result,
            Err(SlamError::Optimizer(OptimizerError::LinearSolveFailed {
                iteration: 0,
                source: LinAlgError::SingularMatrix,
            }))
        ));
        assert_eq!(graph.state(), &before);
        Ok(())
    }

    #[test]
    fn test_overflowing_cost_rolls_back_step() -> TestResult {
        // Two contradicting measurements 2e160 apart: the step is finite, the
        // squared residuals at the compromise are not
        let mut graph = Graph::load(
            vec![Vertex::pose(0, 0.0, 0.0, 0.0), Vertex::pose(1, 0.0, 0.0, 0.0)],
            vec![
                Edge::pose_pose(0, 1, Vector3::zeros(), Matrix3::identity()),
                Edge::pose_pose(0, 1, Vector3::new(2e160, 0.0, 0.0), Matrix3::identity()),
            ],
        )?;
        let before = graph.state().clone();

        let result = GaussNewton::new().optimize(&mut graph)?;
        assert_eq!(result.status, OptimizationStatus::InvalidNumericalValues);
        assert_eq!(result.step_norms.len(), 1);
        assert!(result.step_norms[0].is_finite());
        assert!(result.costs.is_empty());
        assert_eq!(graph.state(), &before);
        Ok(())
    }

    #[test]
    fn test_missing_anchor_is_reported_before_solving() -> TestResult {
        let mut graph = Graph::load(
            vec![Vertex::pose(0, 0.0, 0.0, 0.0), Vertex::landmark(1, 1.0, 0.0)],
            vec![Edge::pose_landmark(0, 1, Vector2::new(1.0, 0.0), Matrix2::identity())],
        )?;
        let before = graph.state().clone();

        let result = GaussNewton::new().optimize(&mut graph);
        assert!(matches!(
            result,
            Err(SlamError::Optimizer(OptimizerError::MissingGaugeAnchor))
        ));
        assert_eq!(graph.state(), &before);
        Ok(())
    }

    #[test]
    fn test_empty_graph_is_rejected() -> TestResult {
        let mut graph = Graph::load(Vec::new(), Vec::new())?;
        assert!(matches!(
            GaussNewton::new().optimize(&mut graph),
            Err(SlamError::Optimizer(OptimizerError::EmptyProblem))
        ));
        Ok(())
    }

    #[test]
    fn test_iteration_budget() -> TestResult {
        let mut graph = loop_graph()?;
        let config = GaussNewtonConfig::new()
            .with_max_iterations(1)
            .with_step_norm_tolerance(0.0);
        let result = GaussNewton::with_config(config).optimize(&mut graph)?;

        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.step_norms.len(), 1);

        let mut untouched = loop_graph()?;
        let config = GaussNewtonConfig::new().with_max_iterations(0);
        let result = GaussNewton::with_config(config).optimize(&mut untouched)?;
        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert!(result.step_norms.is_empty());
        assert_eq!(untouched.state(), loop_graph()?.state());
        Ok(())
    }

    #[test]
    fn test_zero_timeout_stops_before_first_iteration() -> TestResult {
        let mut graph = toy_graph()?;
        let config = GaussNewtonConfig::new().with_timeout(time::Duration::from_secs(0));
        let result = GaussNewton::with_config(config).optimize(&mut graph)?;

        assert_eq!(result.status, OptimizationStatus::Timeout);
        assert_eq!(result.iterations, 0);
        Ok(())
    }

    #[test]
    fn test_explicit_anchor_policy() -> TestResult {
        let mut graph = toy_graph()?;
        let pose_1 = graph.pose(1)?;
        let config = GaussNewtonConfig::new().with_anchor_policy(AnchorPolicy::Node(1));
        GaussNewton::with_config(config).optimize(&mut graph)?;

        assert!((graph.pose(1)? - pose_1).norm() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_covariances_per_node() -> TestResult {
        let mut graph = loop_graph()?;
        let config = GaussNewtonConfig::new().with_compute_covariances(true);
        let result = GaussNewton::with_config(config).optimize(&mut graph)?;

        let covariances = result.covariances.ok_or("covariances were requested")?;
        assert_eq!(covariances.len(), graph.node_count());
        assert_eq!(covariances[&0].nrows(), 3);
        assert_eq!(covariances[&10].nrows(), 2);
        // The anchored pose is the most certain one
        assert!(covariances[&0][(0, 0)] < covariances[&2][(0, 0)]);
        Ok(())
    }

    #[test]
    fn test_observers_see_every_iteration() -> TestResult {
        let mut graph = loop_graph()?;
        let recorder = TrajectoryRecorder::new();
        recorder.record_initial(&graph)?;

        let mut solver = GaussNewton::new();
        solver.add_observer(recorder.clone());
        let result = solver.optimize(&mut graph)?;

        let frames = recorder.frames()?;
        assert_eq!(frames.len(), result.iterations + 1);
        assert_eq!(frames[1].step_norm, Some(result.step_norms[0]));
        assert_eq!(frames.last().map(|f| f.poses.clone()), Some(graph.poses()));
        Ok(())
    }

    #[test]
    fn test_invalid_tolerance_is_rejected() -> TestResult {
        let mut graph = toy_graph()?;
        let config = GaussNewtonConfig::new().with_step_norm_tolerance(f64::NAN);
        assert!(matches!(
            GaussNewton::with_config(config).optimize(&mut graph),
            Err(SlamError::Optimizer(OptimizerError::InvalidParameters(_)))
        ));
        Ok(())
    }
}
