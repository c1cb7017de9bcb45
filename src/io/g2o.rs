use crate::core::{Edge, EdgeKind, Graph, NodeKind, Vertex};
use crate::io::{GraphLoader, IoError, IoResult};
use memmap2;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use rayon::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;
use std::{fs::File, io::BufWriter, io::Write, path::Path};
use tracing::{info, warn};

/// G2O file loader for 2D pose graphs with landmarks.
///
/// Supported records:
///
/// ```text
/// VERTEX_SE2  id x y θ
/// VERTEX_XY   id x y
/// EDGE_SE2    from to dx dy dθ i11 i12 i13 i22 i23 i33
/// EDGE_SE2_XY from to dx dy i11 i12 i22
/// ```
pub struct G2oLoader;

impl GraphLoader for G2oLoader {
    fn load<P: AsRef<Path>>(path: P) -> IoResult<Graph> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref).map_err(|e| {
            IoError::Io(e).log_with_source(format!("Failed to open G2O file: {:?}", path_ref))
        })?;
        // Empty files cannot be mapped on every platform
        if file.metadata().map(|m| m.len() == 0).unwrap_or(false) {
            return Self::parse_str("");
        }
        let mmap = unsafe {
            memmap2::Mmap::map(&file).map_err(|e| {
                IoError::Io(e)
                    .log_with_source(format!("Failed to memory-map G2O file: {:?}", path_ref))
            })?
        };
        let content = std::str::from_utf8(&mmap).map_err(|e| {
            IoError::Parse {
                line: 0,
                message: format!("Invalid UTF-8: {e}"),
            }
            .log()
        })?;

        Self::parse_str(content)
    }

    fn write<P: AsRef<Path>>(graph: &Graph, path: P) -> IoResult<()> {
        let path_ref = path.as_ref();
        let file = File::create(path_ref).map_err(|e| {
            IoError::FileCreationFailed {
                path: path_ref.display().to_string(),
                reason: e.to_string(),
            }
            .log()
        })?;
        let mut writer = BufWriter::new(file);

        Self::write_records(graph, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                IoError::Io(e).log_with_source(format!("Failed to write G2O file: {:?}", path_ref))
            })?;

        info!(
            "Wrote {} nodes and {} edges to {:?}",
            graph.node_count(),
            graph.edge_count(),
            path_ref
        );
        Ok(())
    }
}

/// One parsed record
enum ParsedItem {
    Vertex(Vertex),
    Edge(Edge),
}

impl G2oLoader {
    /// Parse G2O content held in memory
    pub fn parse_str(content: &str) -> IoResult<Graph> {
        let lines: Vec<&str> = content.lines().collect();
        let minimum_lines_for_parallel = 1000;

        let items = if lines.len() > minimum_lines_for_parallel {
            // Indexed parallel collect keeps file order
            lines
                .par_iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<IoResult<Vec<_>>>()?
        } else {
            lines
                .iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<IoResult<Vec<_>>>()?
        };

        let mut vertices = Vec::with_capacity(lines.len() / 4);
        let mut edges = Vec::with_capacity(lines.len());
        let mut seen = HashSet::new();

        for item in items.into_iter().flatten() {
            match item {
                ParsedItem::Vertex(vertex) => {
                    let id = vertex.id();
                    if !seen.insert(id) {
                        return Err(IoError::DuplicateVertex { id }.log());
                    }
                    vertices.push(vertex);
                }
                ParsedItem::Edge(edge) => edges.push(edge),
            }
        }

        Graph::load(vertices, edges).map_err(|e| IoError::InvalidGraph(e).log())
    }

    /// Parse a single line; comments, blank lines and unknown records yield `None`
    fn parse_line(line: &str, line_num: usize) -> IoResult<Option<ParsedItem>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let item = match parts[0] {
            "VERTEX_SE2" => Some(ParsedItem::Vertex(Self::parse_vertex_se2(
                &parts, line_num,
            )?)),
            "VERTEX_XY" => Some(ParsedItem::Vertex(Self::parse_vertex_xy(
                &parts, line_num,
            )?)),
            "EDGE_SE2" => Some(ParsedItem::Edge(Self::parse_edge_se2(&parts, line_num)?)),
            "EDGE_SE2_XY" => Some(ParsedItem::Edge(Self::parse_edge_se2_xy(
                &parts, line_num,
            )?)),
            other => {
                warn!("Skipping unsupported record '{}' at line {}", other, line_num);
                None
            }
        };

        Ok(item)
    }

    fn field<T: FromStr>(parts: &[&str], index: usize, line_num: usize) -> IoResult<T> {
        let value = parts
            .get(index)
            .ok_or(IoError::MissingFields { line: line_num })?;
        value.parse::<T>().map_err(|_| {
            IoError::InvalidNumber {
                line: line_num,
                value: value.to_string(),
            }
            .log()
        })
    }

    fn expect_fields(parts: &[&str], count: usize, line_num: usize) -> IoResult<()> {
        if parts.len() < count {
            return Err(IoError::MissingFields { line: line_num }.log());
        }
        Ok(())
    }

    /// Parse VERTEX_SE2 line
    pub fn parse_vertex_se2(parts: &[&str], line_num: usize) -> IoResult<Vertex> {
        Self::expect_fields(parts, 5, line_num)?;
        Ok(Vertex::pose(
            Self::field(parts, 1, line_num)?,
            Self::field(parts, 2, line_num)?,
            Self::field(parts, 3, line_num)?,
            Self::field(parts, 4, line_num)?,
        ))
    }

    /// Parse VERTEX_XY line
    pub fn parse_vertex_xy(parts: &[&str], line_num: usize) -> IoResult<Vertex> {
        Self::expect_fields(parts, 4, line_num)?;
        Ok(Vertex::landmark(
            Self::field(parts, 1, line_num)?,
            Self::field(parts, 2, line_num)?,
            Self::field(parts, 3, line_num)?,
        ))
    }

    /// Parse EDGE_SE2 line
    pub fn parse_edge_se2(parts: &[&str], line_num: usize) -> IoResult<Edge> {
        Self::expect_fields(parts, 12, line_num)?;
        let from = Self::field(parts, 1, line_num)?;
        let to = Self::field(parts, 2, line_num)?;

        let measurement = Vector3::new(
            Self::field(parts, 3, line_num)?,
            Self::field(parts, 4, line_num)?,
            Self::field(parts, 5, line_num)?,
        );

        // Upper triangle: i11, i12, i13, i22, i23, i33
        let info = (6..12)
            .map(|i| Self::field::<f64>(parts, i, line_num))
            .collect::<IoResult<Vec<_>>>()?;
        let information = Matrix3::new(
            info[0], info[1], info[2], //
            info[1], info[3], info[4], //
            info[2], info[4], info[5],
        );

        Ok(Edge::pose_pose(from, to, measurement, information))
    }

    /// Parse EDGE_SE2_XY line
    pub fn parse_edge_se2_xy(parts: &[&str], line_num: usize) -> IoResult<Edge> {
        Self::expect_fields(parts, 8, line_num)?;
        let from = Self::field(parts, 1, line_num)?;
        let to = Self::field(parts, 2, line_num)?;

        let measurement = Vector2::new(
            Self::field(parts, 3, line_num)?,
            Self::field(parts, 4, line_num)?,
        );

        // Upper triangle: i11, i12, i22
        let i11 = Self::field(parts, 5, line_num)?;
        let i12 = Self::field(parts, 6, line_num)?;
        let i22 = Self::field(parts, 7, line_num)?;
        let information = Matrix2::new(i11, i12, i12, i22);

        Ok(Edge::pose_landmark(from, to, measurement, information))
    }

    fn write_records<W: Write>(graph: &Graph, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "# G2O file written by pose-graph-slam")?;
        writeln!(
            out,
            "# Timestamp: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(
            out,
            "# Nodes: {}, edges: {}",
            graph.node_count(),
            graph.edge_count()
        )?;

        let state = graph.state();
        for node in graph.nodes() {
            let o = node.offset;
            match node.kind {
                NodeKind::Pose => writeln!(
                    out,
                    "VERTEX_SE2 {} {:.17e} {:.17e} {:.17e}",
                    node.id,
                    state[o],
                    state[o + 1],
                    state[o + 2]
                )?,
                NodeKind::Landmark => writeln!(
                    out,
                    "VERTEX_XY {} {:.17e} {:.17e}",
                    node.id,
                    state[o],
                    state[o + 1]
                )?,
            }
        }

        for edge in graph.edges() {
            match &edge.kind {
                EdgeKind::PosePose {
                    measurement: z,
                    information: info,
                } => writeln!(
                    out,
                    "EDGE_SE2 {} {} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e}",
                    edge.from,
                    edge.to,
                    z[0],
                    z[1],
                    z[2],
                    info[(0, 0)],
                    info[(0, 1)],
                    info[(0, 2)],
                    info[(1, 1)],
                    info[(1, 2)],
                    info[(2, 2)]
                )?,
                EdgeKind::PoseLandmark {
                    measurement: z,
                    information: info,
                } => writeln!(
                    out,
                    "EDGE_SE2_XY {} {} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e}",
                    edge.from,
                    edge.to,
                    z[0],
                    z[1],
                    info[(0, 0)],
                    info[(0, 1)],
                    info[(1, 1)]
                )?,
            }
        }

        Ok(())
    }
}
