//! Core building blocks of the pose-graph problem
//!
//! This module contains:
//! - The graph model: nodes, edges, the id→offset lookup and the global state vector
//! - The linear system builder that turns the graph into sparse normal equations
//! - The gauge anchor policy used to remove the global translation/rotation freedom

pub mod graph;
pub mod linear_system;

pub use graph::{Edge, EdgeKind, Graph, Node, NodeKind, Vertex};
pub use linear_system::{AnchorPolicy, GaugePrior, LinearSystem};

use thiserror::Error;
use tracing::error;

/// Core module error types for graph construction and system assembly
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A node id was referenced that is not part of the graph
    #[error("Unknown node id: {id}")]
    UnknownNode { id: usize },

    /// Two vertices share the same id
    #[error("Duplicate node id: {id}")]
    DuplicateNode { id: usize },

    /// An edge or anchor refers to a node of the wrong kind
    #[error("Node {id} is a {found} node, expected a {expected} node")]
    NodeKindMismatch {
        id: usize,
        expected: NodeKind,
        found: NodeKind,
    },

    /// Dimension mismatch between a vector and the part of the state it targets
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Sparse structure construction failed
    #[error("Symbolic structure error: {0}")]
    SymbolicStructure(String),

    /// Invalid input value (non-finite measurement, information or state)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error of a third-party library
    ///
    /// # Arguments
    /// * `source_error` - The original error (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
