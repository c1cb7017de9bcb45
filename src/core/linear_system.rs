//! Normal-equation assembly for the Gauss-Newton step.
//!
//! Every edge contributes four blocks to the information matrix `H` and two
//! segments to the right-hand side `b`:
//!
//! ```text
//! H_ff += AᵀΩA    H_ft += AᵀΩB    b_f += -(eᵀΩA)ᵀ
//! H_tf += BᵀΩA    H_tt += BᵀΩB    b_t += -(eᵀΩB)ᵀ
//! ```
//!
//! Blocks are accumulated in a map keyed by their (row offset, column offset) in
//! the state vector, then flattened once into triplets and compressed into a
//! column-major sparse matrix. No dense N×N matrix is ever allocated.
//!
//! The system is rank deficient by the three degrees of freedom of a global
//! rigid motion. A [`GaugePrior`] pins one pose by adding `weight·I₃` to its
//! diagonal block exactly once per build.

use crate::core::{CoreError, CoreResult, Graph, NodeKind};
use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use nalgebra::{DMatrix, DVector};
use std::{
    collections::BTreeMap,
    fmt,
    fmt::{Display, Formatter},
};
use tracing::{debug, warn};

/// How the pose that fixes the gauge freedom is chosen
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AnchorPolicy {
    /// Lowest-id pose among the endpoints of pose-pose edges
    #[default]
    LowestPoseId,
    /// `from` node of the first pose-pose edge in edge-list order
    FirstPosePoseEdge,
    /// An explicit pose node
    Node(usize),
}

impl Display for AnchorPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AnchorPolicy::LowestPoseId => write!(f, "lowest pose id"),
            AnchorPolicy::FirstPosePoseEdge => write!(f, "first pose-pose edge"),
            AnchorPolicy::Node(id) => write!(f, "node {id}"),
        }
    }
}

/// Resolved gauge-fixing decision for one optimization call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugePrior {
    /// Pose that receives the prior, `None` when the graph has no candidate
    pub anchor: Option<usize>,
    /// Diagonal weight of the prior block
    pub weight: f64,
}

impl GaugePrior {
    pub const DEFAULT_WEIGHT: f64 = 1000.0;

    /// A prior that leaves the system untouched
    pub fn none() -> Self {
        Self {
            anchor: None,
            weight: Self::DEFAULT_WEIGHT,
        }
    }

    /// Pick the anchor pose of `graph` according to `policy`.
    ///
    /// An explicit [`AnchorPolicy::Node`] must name a pose of the graph. The other
    /// policies yield `anchor: None` when the graph has no pose-pose edge.
    pub fn resolve(graph: &Graph, policy: AnchorPolicy, weight: f64) -> CoreResult<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(
                CoreError::InvalidInput(format!("gauge prior weight must be positive, got {weight}"))
                    .log(),
            );
        }

        let mut pose_pose = graph.edges().iter().filter(|edge| edge.is_pose_pose());
        let anchor = match policy {
            AnchorPolicy::LowestPoseId => pose_pose
                .flat_map(|edge| [edge.from, edge.to])
                .min(),
            AnchorPolicy::FirstPosePoseEdge => pose_pose.next().map(|edge| edge.from),
            AnchorPolicy::Node(id) => {
                let node = graph.node(id).map_err(CoreError::log)?;
                if node.kind != NodeKind::Pose {
                    return Err(CoreError::NodeKindMismatch {
                        id,
                        expected: NodeKind::Pose,
                        found: node.kind,
                    }
                    .log());
                }
                Some(id)
            }
        };

        match anchor {
            Some(id) => debug!("Gauge anchored at pose {} ({})", id, policy),
            None => warn!("No pose-pose edge found, gauge freedom is not fixed"),
        }

        Ok(Self { anchor, weight })
    }
}

/// Sparse normal equations `H·dx = b` at one linearization point
#[derive(Debug, Clone)]
pub struct LinearSystem {
    /// Information matrix `H` (symmetric, column-major sparse)
    pub hessian: SparseColMat<usize, f64>,
    /// Right-hand side `b` as an N×1 column
    pub rhs: Mat<f64>,
    /// Total cost `Σ eᵀΩe` at the linearization point
    pub cost: f64,
    /// Pose that received the gauge prior
    pub anchor: Option<usize>,
}

impl LinearSystem {
    /// Linearize every edge of `graph` and assemble the normal equations.
    pub fn build(graph: &Graph, gauge: &GaugePrior) -> CoreResult<Self> {
        let dimension = graph.dimension();
        let mut blocks: BTreeMap<(usize, usize), DMatrix<f64>> = BTreeMap::new();
        let mut rhs = DVector::<f64>::zeros(dimension);
        let mut cost = 0.0;

        for edge in graph.edges() {
            let from_offset = graph.offset(edge.from).map_err(CoreError::log)?;
            let to_offset = graph.offset(edge.to).map_err(CoreError::log)?;
            let linearization = edge.linearize(
                graph.node_state(edge.from)?,
                graph.node_state(edge.to)?,
            );
            let omega = edge.information();

            let e = &linearization.residual;
            let a = &linearization.jacobian_from;
            let b = &linearization.jacobian_to;
            let at_omega = a.transpose() * &omega;
            let bt_omega = b.transpose() * &omega;

            let h_ft = &at_omega * b;
            accumulate(&mut blocks, (from_offset, from_offset), &at_omega * a);
            accumulate(&mut blocks, (to_offset, to_offset), &bt_omega * b);
            accumulate(&mut blocks, (from_offset, to_offset), h_ft.clone());
            accumulate(&mut blocks, (to_offset, from_offset), h_ft.transpose());

            // -(eᵀΩA)ᵀ = -AᵀΩe since Ω is symmetric
            let mut b_from = rhs.rows_mut(from_offset, a.ncols());
            b_from -= &at_omega * e;
            let mut b_to = rhs.rows_mut(to_offset, b.ncols());
            b_to -= &bt_omega * e;

            cost += (e.transpose() * &omega * e)[(0, 0)];
        }

        if let Some(anchor) = gauge.anchor {
            let offset = graph.offset(anchor).map_err(CoreError::log)?;
            let dim = graph.node(anchor)?.dimension();
            accumulate(
                &mut blocks,
                (offset, offset),
                DMatrix::identity(dim, dim) * gauge.weight,
            );
        }

        let nnz = blocks.values().map(|block| block.len()).sum();
        let mut triplets = Vec::with_capacity(nnz);
        for (&(row_offset, col_offset), block) in &blocks {
            for col in 0..block.ncols() {
                for row in 0..block.nrows() {
                    triplets.push(Triplet::new(
                        row_offset + row,
                        col_offset + col,
                        block[(row, col)],
                    ));
                }
            }
        }

        let hessian = SparseColMat::try_new_from_triplets(dimension, dimension, &triplets)
            .map_err(|e| {
                CoreError::SymbolicStructure(
                    "Failed to build sparse information matrix from triplets".to_string(),
                )
                .log_with_source(e)
            })?;
        let rhs = Mat::from_fn(dimension, 1, |i, _| rhs[i]);

        Ok(Self {
            hessian,
            rhs,
            cost,
            anchor: gauge.anchor,
        })
    }

    /// Number of unknowns
    pub fn dimension(&self) -> usize {
        self.hessian.ncols()
    }

    /// Number of stored entries of `H`
    pub fn nnz(&self) -> usize {
        self.hessian.as_ref().val().len()
    }

    /// Value of `H[row, col]`, zero for entries outside the sparsity pattern
    pub fn hessian_entry(&self, row: usize, col: usize) -> f64 {
        let h = self.hessian.as_ref();
        let symbolic = h.symbolic();
        let start = symbolic.col_ptr()[col];
        let end = symbolic.col_ptr()[col + 1];
        symbolic.row_idx()[start..end]
            .iter()
            .position(|&r| r == row)
            .map_or(0.0, |k| h.val()[start + k])
    }
}

fn accumulate(
    blocks: &mut BTreeMap<(usize, usize), DMatrix<f64>>,
    key: (usize, usize),
    block: DMatrix<f64>,
) {
    blocks
        .entry(key)
        .and_modify(|existing| *existing += &block)
        .or_insert(block);
}

impl Display for LinearSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LinearSystem [ dimension: {}, nnz: {}, cost: {:.6e}, anchor: {:?} ]",
            self.dimension(),
            self.nnz(),
            self.cost,
            self.anchor
        )
    }
}
