//! Constraint models for 2D pose-graph SLAM.
//!
//! Factors (also called constraints or error functions) turn a measurement between
//! two nodes into a residual vector and its Jacobians with respect to both nodes.
//!
//! # Factor Graph Formulation
//!
//! The optimization problem is
//!
//! ```text
//! minimize Σ_k e_kᵀ Ω_k e_k
//! ```
//!
//! where `e_k` is the residual of edge k evaluated at the current node states and
//! `Ω_k` its information matrix.
//!
//! # Factor Types
//!
//! - [`BetweenFactor`]: relative SE(2) pose measurement between two poses (3D residual)
//! - [`LandmarkFactor`]: landmark position observed in the frame of a pose (2D residual)
//!
//! # Linearization
//!
//! Each factor provides a `linearize` method that computes:
//! 1. **Residual** `e(x)` at the current node states
//! 2. **Jacobian** `A = ∂e/∂x_from` and `B = ∂e/∂x_to`
//!
//! The linear system builder combines these into the normal equations.

use nalgebra::{DMatrix, DVector, DVectorView};

pub mod between_factor;
pub mod landmark_factor;

pub use between_factor::BetweenFactor;
pub use landmark_factor::LandmarkFactor;

/// Residual and Jacobians of one edge at a linearization point
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    /// Residual `e`
    pub residual: DVector<f64>,
    /// `A = ∂e/∂x_from`
    pub jacobian_from: DMatrix<f64>,
    /// `B = ∂e/∂x_to`
    pub jacobian_to: DMatrix<f64>,
}

/// Trait for binary constraint implementations.
///
/// A factor connects a `from` node and a `to` node. Implementations must be
/// deterministic and side-effect free.
///
/// The views passed in must have the dimensions of the connected node kinds
/// (3 for a pose, 2 for a landmark). [`crate::core::Graph`] guarantees this for
/// every edge it holds.
///
/// # Example
///
/// ```
/// use pose_graph_slam::factors::{BetweenFactor, Factor};
/// use nalgebra::{DVector, Vector3};
///
/// let factor = BetweenFactor::new(Vector3::new(1.0, 0.0, 0.1));
/// let from = DVector::from_vec(vec![0.0, 0.0, 0.0]);
/// let to = DVector::from_vec(vec![1.0, 0.0, 0.1]);
///
/// let linearization = factor.linearize(from.as_view(), to.as_view());
/// assert!(linearization.residual.norm() < 1e-12);
/// assert_eq!(linearization.jacobian_from.shape(), (3, 3));
/// ```
pub trait Factor: Send + Sync {
    /// Residual at the given node states
    fn residual(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> DVector<f64>;

    /// Residual and both Jacobians at the given node states
    fn linearize(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> Linearization;

    /// Dimension of the residual vector
    ///
    /// - Between factor: 3 (dx, dy, dθ)
    /// - Landmark factor: 2 (dx, dy)
    fn get_dimension(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Central finite-difference Jacobians of `factor` at `(from, to)`
    pub fn numeric_jacobians<F: Factor>(
        factor: &F,
        from: &DVector<f64>,
        to: &DVector<f64>,
        step: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let rows = factor.get_dimension();
        let mut jacobian_from = DMatrix::zeros(rows, from.len());
        let mut jacobian_to = DMatrix::zeros(rows, to.len());

        for k in 0..from.len() {
            let mut plus = from.clone();
            let mut minus = from.clone();
            plus[k] += step;
            minus[k] -= step;
            let diff = factor.residual(plus.as_view(), to.as_view())
                - factor.residual(minus.as_view(), to.as_view());
            jacobian_from.set_column(k, &(diff / (2.0 * step)));
        }

        for k in 0..to.len() {
            let mut plus = to.clone();
            let mut minus = to.clone();
            plus[k] += step;
            minus[k] -= step;
            let diff = factor.residual(from.as_view(), plus.as_view())
                - factor.residual(from.as_view(), minus.as_view());
            jacobian_to.set_column(k, &(diff / (2.0 * step)));
        }

        (jacobian_from, jacobian_to)
    }
}
