//! Error types for both ingestion pipelines.
//!
//! Only failures that abort a pass are represented here. A malformed
//! trackpoint is dropped and counted in [`crate::FileIngest`], and
//! out-of-window or out-of-region points are plain filtering decisions.

use std::path::PathBuf;

use thiserror::Error;

/// Field of a metric record that failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    StartDate,
    Value,
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordField::StartDate => f.write_str("startDate"),
            RecordField::Value => f.write_str("value"),
        }
    }
}

/// Failure of a metric extraction pass.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A record matched a metric marker but its date or value could not be parsed.
    #[error("Malformed metric record {record}: bad {field} field ({reason})")]
    MalformedRecord {
        /// 1-based index of the offending record
        record: usize,
        field: RecordField,
        reason: String,
    },

    #[error("IO error after record {record}: {source}")]
    Io {
        record: usize,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// 1-based record index at which the pass stopped.
    pub fn record(&self) -> usize {
        match self {
            ExtractError::MalformedRecord { record, .. } | ExtractError::Io { record, .. } => *record,
        }
    }
}

/// Failure to ingest a single route file.
#[derive(Error, Debug)]
pub enum RouteError {
    /// The file could not be opened or parsed, or carries no usable workout date.
    #[error("Unreadable route file {file}: {reason}")]
    Unreadable { file: String, reason: String },

    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RouteError {
    pub(crate) fn unreadable(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a full pipeline run. No partial output accompanies it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Route(#[from] RouteError),

    /// Strict runs refuse to produce an index when any route file failed.
    #[error("{} route file(s) failed: {}", .0.len(), .0.join(", "))]
    RouteFiles(Vec<String>),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
