//! Reading and writing pose graphs in the g2o text format.

use std::{io, path::Path};
use thiserror::Error;
use tracing::error;

use crate::core::{CoreError, Graph};

pub mod g2o;

pub use g2o::G2oLoader;

/// Errors that can occur during graph file parsing
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid number format at line {line}: {value}")]
    InvalidNumber { line: usize, value: String },

    #[error("Missing required fields at line {line}")]
    MissingFields { line: usize },

    #[error("Duplicate vertex ID: {id}")]
    DuplicateVertex { id: usize },

    /// Records parsed fine but do not form a valid graph (e.g. unknown endpoint)
    #[error("Invalid graph: {0}")]
    InvalidGraph(#[source] CoreError),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to create file '{path}': {reason}")]
    FileCreationFailed { path: String, reason: String },
}

impl IoError {
    /// Log the error using tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with source error information using tracing::error and return self for chaining
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for graph file operations
pub type IoResult<T> = Result<T, IoError>;

/// Trait for graph file loaders and writers
pub trait GraphLoader {
    /// Load a graph from a file
    fn load<P: AsRef<Path>>(path: P) -> IoResult<Graph>;

    /// Write the current state of a graph to a file
    fn write<P: AsRef<Path>>(graph: &Graph, path: P) -> IoResult<()>;
}

/// Load a graph, picking the loader from the file extension
pub fn load_graph<P: AsRef<Path>>(path: P) -> IoResult<Graph> {
    let path_ref = path.as_ref();
    let extension = path_ref
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("g2o") => G2oLoader::load(path_ref),
        _ => Err(IoError::UnsupportedFormat(format!(
            "{} (expected a .g2o file)",
            path_ref.display()
        ))
        .log()),
    }
}
