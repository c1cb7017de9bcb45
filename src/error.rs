//! Error types for the pose-graph-slam library
//!
//! # Error Hierarchy
//!
//! - **`SlamError`** is the top-level error exposed by public APIs
//! - **Module errors** (`CoreError`, `OptimizerError`, ...) are wrapped inside `SlamError`
//! - **Error sources** are preserved, so the full chain can be inspected
//!
//! Example error chain:
//! ```text
//! SlamError::Optimizer(
//!     OptimizerError::LinearSolveFailed {
//!         iteration: 0,
//!         source: LinAlgError::SingularMatrix,
//!     }
//! )
//! ```

#[cfg(feature = "io")]
use crate::io::IoError;
use crate::{
    core::CoreError, linalg::LinAlgError, observers::ObserverError, optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the library
pub type SlamResult<T> = Result<T, SlamError>;

/// Main error type for the library
///
/// ```rust,ignore
/// if let Err(e) = solver.optimize(&mut graph) {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum SlamError {
    /// Graph construction and system assembly errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization loop errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// I/O and file parsing errors
    #[cfg(feature = "io")]
    #[error(transparent)]
    Io(#[from] IoError),

    /// Observer errors
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

impl SlamError {
    /// Get the full error chain as a multi-line string.
    ///
    /// ```rust,ignore
    /// warn!("Error chain: {}", e.chain());
    /// // Linear system solve failed at iteration 0: Singular matrix detected ...
    /// //   → Singular matrix detected (matrix is not invertible)
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
