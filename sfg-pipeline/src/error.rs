//! Error types for sfg-pipeline
//!
//! Stage-local failures (`ToolError`) are recovered by the orchestrator for
//! one-to-one stages. `PipelineError` is what surfaces to the caller of a run.

use crate::models::{AssetType, Scope};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestrator operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Run-level error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No candidate inputs for a requested stage
    #[error("{stage}: no {asset_type} inputs to process for {scope}")]
    NothingToDo {
        stage: &'static str,
        scope: Scope,
        asset_type: AssetType,
    },

    /// The scope has no materialized data at all
    #[error("No local data found for {0}")]
    NoLocalData(Scope),

    /// An N-to-1 stage failed; its products cannot be partially trusted
    #[error("{stage} failed for {scope}: {source}")]
    MergeFailed {
        stage: &'static str,
        scope: Scope,
        #[source]
        source: ToolError,
    },

    /// A stage ran but its completion could not be written to the catalog
    #[error("{stage} for {scope}: {message}")]
    Bookkeeping {
        stage: &'static str,
        scope: Scope,
        message: String,
    },

    /// Missing binary or upstream metadata; continuing would produce wrong results
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stage name given on the command line is not known
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Catalog or configuration error
    #[error("Common error: {0}")]
    Common(#[from] sfg_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True for conditions a multi-stage run logs and moves past
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, PipelineError::NothingToDo { .. })
    }
}

/// Failure of a single stage-function invocation
///
/// Always means "no artifact produced".
#[derive(Debug, Error)]
pub enum ToolError {
    /// The external program could not be started
    #[error("Failed to start {program}: {message}")]
    Spawn { program: PathBuf, message: String },

    /// The external program ran and reported failure
    #[error("{program} exited with {status}: {stderr}")]
    ExitStatus {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    /// Output could not be interpreted
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The tool succeeded but produced nothing usable
    #[error("No output produced from {0}")]
    NoOutput(String),

    /// Input asset is missing required information
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The blocking worker running the function did not complete
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ToolError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
