//! Error types shared by the grid, terrain and game grid generators.

use std::path::PathBuf;

use thiserror::Error;

use crate::coords::AxialCoord;

/// Errors that end a generator run.
///
/// Every variant is terminal for the generator that raised it: the workflow
/// moves to its `Error` state and stays there.
#[derive(Debug, Error)]
pub enum GridError {
    /// A file could not be created, opened, read or written.
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A persisted table is missing.
    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    /// The parameter header has the wrong number of fields.
    #[error("params line has {found} fields, expected {expected}")]
    ParamFieldCount {
        /// Number of fields the loader was configured for.
        expected: usize,
        /// Number of fields present.
        found: usize,
    },

    /// A table does not have one line per declared point.
    #[error("{file} has {found} lines, expected {expected}")]
    LineCount {
        /// Table name.
        file: String,
        /// Declared point count.
        expected: usize,
        /// Lines present.
        found: usize,
    },

    /// A line could not be parsed.
    #[error("parse error in {file} line {line}: {detail}")]
    Parse {
        /// Table name.
        file: String,
        /// Zero-based line number.
        line: usize,
        /// What went wrong.
        detail: String,
    },

    /// A coordinate lookup failed while building derived data.
    #[error("coordinate {0} is not part of the grid")]
    MissingCoordinate(AxialCoord),

    /// A required collaborator (dataset, terrain, tree table) is absent.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(String),

    /// Chunking produced no chunks where at least one is required.
    #[error("{0} is empty")]
    EmptyChunks(String),

    /// Path reconstruction found a node without predecessor.
    #[error("goal is not reachable from start")]
    UnreachableGoal,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON configuration could not be read.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A preview image could not be encoded or written.
    #[error("image export failed: {0}")]
    Image(#[from] image::ImageError),

    /// A workflow ended in its error state.
    #[error("{name} failed during {step}")]
    Workflow {
        /// Generator name.
        name: String,
        /// Workflow state that failed.
        step: String,
    },
}

impl GridError {
    /// Wrap an io error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GridError::Io { path: path.into(), source }
    }

    pub fn parse(file: &str, line: usize, detail: impl Into<String>) -> Self {
        GridError::Parse {
            file: file.to_string(),
            line,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
