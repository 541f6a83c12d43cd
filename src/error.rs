//! # Error Types
//!
//! Every stage of the pipeline reports failures through [`ProcessingError`].
//! The variant names the cause so that a failed row or group can be diagnosed
//! after the fact instead of collapsing into a generic marker.

use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while indexing, resolving, or aggregating archive files
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    #[error("Ambiguous metadata for {key}: {count} distinct {role} files")]
    AmbiguousMetadata {
        key: String,
        role: String,
        count: usize,
    },

    #[error("Dimension mismatch: data grid is {data:?} but weight grid is {weights:?}")]
    DimensionMismatch {
        data: (usize, usize),
        weights: (usize, usize),
    },

    #[error("External tool failed running '{operation}' ({status}): {stderr}")]
    ExternalToolFailure {
        operation: String,
        status: String,
        stderr: String,
    },

    #[error("Expected output file was not produced: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("Missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("Missing required variables: {0:?}")]
    MissingVariables(Vec<String>),

    #[error("Variable '{variable}' not found in {}", path.display())]
    VariableNotFound { path: PathBuf, variable: String },

    #[error("Invalid grid in {}: {reason}", path.display())]
    InvalidGrid { path: PathBuf, reason: String },

    #[error("Unsupported time units '{0}'")]
    TimeUnits(String),

    #[error("Unsupported calendar '{0}'")]
    Calendar(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcessingError {
    /// Short tag naming the failure variant, stored alongside failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::MissingMetadata(_) => "missing_metadata",
            ProcessingError::AmbiguousMetadata { .. } => "ambiguous_metadata",
            ProcessingError::DimensionMismatch { .. } => "dimension_mismatch",
            ProcessingError::ExternalToolFailure { .. } => "external_tool_failure",
            ProcessingError::MissingOutput(_) => "missing_output",
            ProcessingError::MissingColumns(_) => "missing_columns",
            ProcessingError::MissingVariables(_) => "missing_variables",
            ProcessingError::VariableNotFound { .. } => "variable_not_found",
            ProcessingError::InvalidGrid { .. } => "invalid_grid",
            ProcessingError::TimeUnits(_) => "time_units",
            ProcessingError::Calendar(_) => "calendar",
            ProcessingError::MissingInput(_) => "missing_input",
            ProcessingError::Cache(_) => "cache",
            ProcessingError::NetCdf(_) => "netcdf",
            ProcessingError::Polars(_) => "polars",
            ProcessingError::Io(_) => "io",
            ProcessingError::Json(_) => "json",
        }
    }

    /// `kind: message`, the form written into the `cause` column of marker rows.
    pub fn cause(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Result type for pipeline operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;
