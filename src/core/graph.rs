//! Graph model: typed nodes, typed edges and the flat state vector.
//!
//! The state vector is the concatenation of all node states in first-seen order:
//!
//! ```text
//! state = [ x₀ y₀ θ₀ | lx₁ ly₁ | x₂ y₂ θ₂ | ... ]
//!           pose 0     landmark 1  pose 2
//! ```
//!
//! Offsets partition the vector contiguously. All index arithmetic stays inside
//! [`Graph`]; callers address node states by id.

use crate::core::{CoreError, CoreResult};
use crate::factors::{BetweenFactor, Factor, LandmarkFactor, Linearization};
use nalgebra::{DMatrix, DVector, DVectorView, Matrix2, Matrix3, Vector2, Vector3};
use std::{
    collections::HashMap,
    fmt,
    fmt::{Display, Formatter},
};
use tracing::info;

/// Kind of unknown a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Robot pose `[x, y, θ]`
    Pose,
    /// Point landmark `[x, y]`
    Landmark,
}

impl NodeKind {
    /// Degrees of freedom of this node kind
    pub const fn dimension(self) -> usize {
        match self {
            NodeKind::Pose => 3,
            NodeKind::Landmark => 2,
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Pose => write!(f, "pose"),
            NodeKind::Landmark => write!(f, "landmark"),
        }
    }
}

/// A parsed vertex record with its initial estimate
#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    Pose { id: usize, pose: Vector3<f64> },
    Landmark { id: usize, position: Vector2<f64> },
}

impl Vertex {
    pub fn pose(id: usize, x: f64, y: f64, theta: f64) -> Self {
        Vertex::Pose {
            id,
            pose: Vector3::new(x, y, theta),
        }
    }

    pub fn landmark(id: usize, x: f64, y: f64) -> Self {
        Vertex::Landmark {
            id,
            position: Vector2::new(x, y),
        }
    }

    pub fn id(&self) -> usize {
        match self {
            Vertex::Pose { id, .. } | Vertex::Landmark { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Vertex::Pose { .. } => NodeKind::Pose,
            Vertex::Landmark { .. } => NodeKind::Landmark,
        }
    }

    fn values(&self) -> &[f64] {
        match self {
            Vertex::Pose { pose, .. } => pose.as_slice(),
            Vertex::Landmark { position, .. } => position.as_slice(),
        }
    }
}

impl Display for Vertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::Pose { id, pose } => write!(
                f,
                "Vertex [ id: {}, pose: ({:.4}, {:.4}, {:.4}) ]",
                id, pose.x, pose.y, pose.z
            ),
            Vertex::Landmark { id, position } => write!(
                f,
                "Vertex [ id: {}, landmark: ({:.4}, {:.4}) ]",
                id, position.x, position.y
            ),
        }
    }
}

/// A node of the loaded graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub id: usize,
    pub kind: NodeKind,
    /// Start of this node's slice in the state vector
    pub offset: usize,
}

impl Node {
    pub fn dimension(&self) -> usize {
        self.kind.dimension()
    }
}

/// Measurement carried by an edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    /// Relative pose `[dx, dy, dθ]` of `to` expressed in the frame of `from`
    PosePose {
        measurement: Vector3<f64>,
        information: Matrix3<f64>,
    },
    /// Landmark position `[dx, dy]` observed from the pose `from`
    PoseLandmark {
        measurement: Vector2<f64>,
        information: Matrix2<f64>,
    },
}

/// A constraint between two nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn pose_pose(
        from: usize,
        to: usize,
        measurement: Vector3<f64>,
        information: Matrix3<f64>,
    ) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::PosePose {
                measurement,
                information,
            },
        }
    }

    pub fn pose_landmark(
        from: usize,
        to: usize,
        measurement: Vector2<f64>,
        information: Matrix2<f64>,
    ) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::PoseLandmark {
                measurement,
                information,
            },
        }
    }

    pub fn is_pose_pose(&self) -> bool {
        matches!(self.kind, EdgeKind::PosePose { .. })
    }

    /// Node kind expected at the `to` end
    pub fn to_kind(&self) -> NodeKind {
        match self.kind {
            EdgeKind::PosePose { .. } => NodeKind::Pose,
            EdgeKind::PoseLandmark { .. } => NodeKind::Landmark,
        }
    }

    /// Information matrix as a dynamically sized matrix
    pub fn information(&self) -> DMatrix<f64> {
        match &self.kind {
            EdgeKind::PosePose { information, .. } => {
                DMatrix::from_column_slice(3, 3, information.as_slice())
            }
            EdgeKind::PoseLandmark { information, .. } => {
                DMatrix::from_column_slice(2, 2, information.as_slice())
            }
        }
    }

    /// Residual of this edge at the given endpoint states
    pub fn residual(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> DVector<f64> {
        match &self.kind {
            EdgeKind::PosePose { measurement, .. } => {
                BetweenFactor::new(*measurement).residual(from, to)
            }
            EdgeKind::PoseLandmark { measurement, .. } => {
                LandmarkFactor::new(*measurement).residual(from, to)
            }
        }
    }

    /// Residual and Jacobians of this edge at the given endpoint states
    pub fn linearize(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> Linearization {
        match &self.kind {
            EdgeKind::PosePose { measurement, .. } => {
                BetweenFactor::new(*measurement).linearize(from, to)
            }
            EdgeKind::PoseLandmark { measurement, .. } => {
                LandmarkFactor::new(*measurement).linearize(from, to)
            }
        }
    }

    /// Weighted squared error `eᵀΩe`
    pub fn chi2(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> f64 {
        let e = self.residual(from, to);
        (e.transpose() * self.information() * &e)[(0, 0)]
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let (measurement, information): (&[f64], &[f64]) = match &self.kind {
            EdgeKind::PosePose {
                measurement,
                information,
            } => (measurement.as_slice(), information.as_slice()),
            EdgeKind::PoseLandmark {
                measurement,
                information,
            } => (measurement.as_slice(), information.as_slice()),
        };
        measurement.iter().chain(information.iter()).copied()
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EdgeKind::PosePose { measurement, .. } => write!(
                f,
                "Edge [ {} -> {}, pose-pose: ({:.4}, {:.4}, {:.4}) ]",
                self.from, self.to, measurement.x, measurement.y, measurement.z
            ),
            EdgeKind::PoseLandmark { measurement, .. } => write!(
                f,
                "Edge [ {} -> {}, pose-landmark: ({:.4}, {:.4}) ]",
                self.from, self.to, measurement.x, measurement.y
            ),
        }
    }
}

/// Pose graph with its live state vector
///
/// Nodes, edges and the lookup table are fixed at construction. Only the state
/// vector changes afterwards, through [`Graph::apply_update`],
/// [`Graph::set_node_state`] and [`Graph::set_state`].
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// node id -> index into `nodes`
    lookup: HashMap<usize, usize>,
    state: DVector<f64>,
}

impl Graph {
    /// Build the state vector and lookup table from parsed records.
    ///
    /// Nodes keep the order in which they are given. Fails on duplicate ids,
    /// edges whose endpoints are missing or of the wrong kind, non-finite values,
    /// and information matrices that are not symmetric positive semi-definite.
    pub fn load(vertices: Vec<Vertex>, edges: Vec<Edge>) -> CoreResult<Self> {
        let mut nodes = Vec::with_capacity(vertices.len());
        let mut lookup = HashMap::with_capacity(vertices.len());
        let mut state = Vec::new();

        for vertex in &vertices {
            let id = vertex.id();
            if lookup.insert(id, nodes.len()).is_some() {
                return Err(CoreError::DuplicateNode { id }.log());
            }
            if vertex.values().iter().any(|v| !v.is_finite()) {
                return Err(
                    CoreError::InvalidInput(format!("non-finite initial state for node {id}"))
                        .log(),
                );
            }
            nodes.push(Node {
                id,
                kind: vertex.kind(),
                offset: state.len(),
            });
            state.extend_from_slice(vertex.values());
        }

        let graph = Self {
            nodes,
            edges,
            lookup,
            state: DVector::from_vec(state),
        };

        for edge in &graph.edges {
            graph.expect_kind(edge.from, NodeKind::Pose)?;
            graph.expect_kind(edge.to, edge.to_kind())?;
            if edge.values().any(|v| !v.is_finite()) {
                return Err(CoreError::InvalidInput(format!(
                    "non-finite measurement or information on edge {} -> {}",
                    edge.from, edge.to
                ))
                .log());
            }
            if !is_symmetric_psd(&edge.information()) {
                return Err(CoreError::InvalidInput(format!(
                    "information matrix on edge {} -> {} is not symmetric positive semi-definite",
                    edge.from, edge.to
                ))
                .log());
            }
        }

        info!(
            "Loaded graph with {} nodes and {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );

        Ok(graph)
    }

    fn expect_kind(&self, id: usize, expected: NodeKind) -> CoreResult<()> {
        let node = self.node(id)?;
        if node.kind != expected {
            return Err(CoreError::NodeKindMismatch {
                id,
                expected,
                found: node.kind,
            }
            .log());
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Length of the state vector (sum of all node dimensions)
    pub fn dimension(&self) -> usize {
        self.state.len()
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    pub fn node(&self, id: usize) -> CoreResult<&Node> {
        self.lookup
            .get(&id)
            .map(|&index| &self.nodes[index])
            .ok_or(CoreError::UnknownNode { id })
    }

    pub fn offset(&self, id: usize) -> CoreResult<usize> {
        self.node(id).map(|node| node.offset)
    }

    /// View into the state vector for one node
    pub fn node_state(&self, id: usize) -> CoreResult<DVectorView<'_, f64>> {
        let node = self.node(id)?;
        Ok(self.state.rows(node.offset, node.dimension()))
    }

    pub fn pose(&self, id: usize) -> CoreResult<Vector3<f64>> {
        let node = self.node(id)?;
        if node.kind != NodeKind::Pose {
            return Err(CoreError::NodeKindMismatch {
                id,
                expected: NodeKind::Pose,
                found: node.kind,
            });
        }
        Ok(self.state.fixed_rows::<3>(node.offset).into_owned())
    }

    pub fn landmark(&self, id: usize) -> CoreResult<Vector2<f64>> {
        let node = self.node(id)?;
        if node.kind != NodeKind::Landmark {
            return Err(CoreError::NodeKindMismatch {
                id,
                expected: NodeKind::Landmark,
                found: node.kind,
            });
        }
        Ok(self.state.fixed_rows::<2>(node.offset).into_owned())
    }

    /// All poses as `(id, [x, y, θ])`, in node order
    pub fn poses(&self) -> Vec<(usize, Vector3<f64>)> {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Pose)
            .map(|node| (node.id, self.state.fixed_rows::<3>(node.offset).into_owned()))
            .collect()
    }

    /// All landmarks as `(id, [x, y])`, in node order
    pub fn landmarks(&self) -> Vec<(usize, Vector2<f64>)> {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Landmark)
            .map(|node| (node.id, self.state.fixed_rows::<2>(node.offset).into_owned()))
            .collect()
    }

    /// Overwrite the state of a single node
    pub fn set_node_state(&mut self, id: usize, values: &[f64]) -> CoreResult<()> {
        let node = *self.node(id)?;
        if values.len() != node.dimension() {
            return Err(CoreError::DimensionMismatch {
                expected: node.dimension(),
                actual: values.len(),
            }
            .log());
        }
        self.state
            .rows_mut(node.offset, node.dimension())
            .copy_from_slice(values);
        Ok(())
    }

    /// Replace the whole state vector, e.g. to restore a saved estimate
    pub fn set_state(&mut self, state: DVector<f64>) -> CoreResult<()> {
        if state.len() != self.state.len() {
            return Err(CoreError::DimensionMismatch {
                expected: self.state.len(),
                actual: state.len(),
            }
            .log());
        }
        self.state = state;
        Ok(())
    }

    /// Additive update `state ← state + dx`
    pub fn apply_update(&mut self, dx: &DVector<f64>) -> CoreResult<()> {
        if dx.len() != self.state.len() {
            return Err(CoreError::DimensionMismatch {
                expected: self.state.len(),
                actual: dx.len(),
            }
            .log());
        }
        self.state += dx;
        Ok(())
    }

    /// Total weighted squared error `Σ eᵀΩe` over all edges
    pub fn global_cost(&self) -> CoreResult<f64> {
        self.edges.iter().try_fold(0.0, |cost, edge| {
            let from = self.node_state(edge.from)?;
            let to = self.node_state(edge.to)?;
            Ok(cost + edge.chi2(from, to))
        })
    }
}

/// Symmetric with no negative eigenvalue, up to round-off relative to the largest entry
fn is_symmetric_psd(information: &DMatrix<f64>) -> bool {
    let tolerance = 1e-9 * information.amax();
    if (information - information.transpose()).amax() > tolerance {
        return false;
    }
    information.clone().symmetric_eigen().eigenvalues.min() >= -tolerance
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let pose_count = self
            .nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Pose)
            .count();
        write!(
            f,
            "Graph [[ poses: {}, landmarks: {}, edges: {}, state dimension: {} ]]",
            pose_count,
            self.nodes.len() - pose_count,
            self.edges.len(),
            self.state.len()
        )
    }
}
