//! # Pose Graph SLAM
//!
//! 2D graph-based SLAM in Rust: robot poses `(x, y, θ)` and point landmarks
//! `(x, y)` are estimated jointly from relative pose measurements and landmark
//! observations by Gauss-Newton on sparse normal equations.
//!
//! ## Features
//!
//! - **SE(2) geometry**: homogeneous transforms and angle wrapping
//! - **Analytic Jacobians** for pose-pose and pose-landmark constraints
//! - **Sparse assembly** of `H·dx = b` with an explicit gauge prior
//! - **Sparse Cholesky and QR backends** built on faer
//! - **g2o files**: `VERTEX_SE2`, `VERTEX_XY`, `EDGE_SE2`, `EDGE_SE2_XY`
//! - **Observers** for recording the estimate after every iteration
//!
//! ## Example
//!
//! ```no_run
//! use pose_graph_slam::io::{G2oLoader, GraphLoader};
//! use pose_graph_slam::{global_cost, optimize};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = G2oLoader::load("data/simulation.g2o")?;
//! println!("initial cost: {:.3}", global_cost(&graph)?);
//!
//! let step_norms = optimize(&mut graph, 20)?;
//! println!("{} iterations, final cost: {:.3}", step_norms.len(), global_cost(&graph)?);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod factors;
#[cfg(feature = "io")]
pub mod io;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod observers;
pub mod optimizer;

pub use crate::core::{AnchorPolicy, Edge, EdgeKind, Graph, Node, NodeKind, Vertex};
pub use error::{SlamError, SlamResult};

pub use factors::{BetweenFactor, Factor, LandmarkFactor};

#[cfg(feature = "io")]
pub use io::{G2oLoader, GraphLoader, load_graph};
pub use linalg::{LinearSolverType, SparseCholeskySolver, SparseLinearSolver, SparseQRSolver};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use observers::{OptObserver, OptObserverVec, TrajectoryRecorder};
pub use optimizer::{
    GaussNewton, GaussNewtonConfig, OptimizationStatus, SolverResult, global_cost, optimize,
};
