use std::path::PathBuf;

use thiserror::Error;

/// Every failure mode the index surfaces to callers.
///
/// Policy (spec §7): I/O and malformed-input errors always propagate —
/// there is no silent recovery for them. `InvariantViolation` is reserved
/// for internal consistency checks that should never fail; treat one as a
/// bug report, not a recoverable condition.
#[derive(Error, Debug)]
pub enum IvfHnswError {
    #[error("malformed input at {context}: {detail}")]
    MalformedInput { context: String, detail: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("insufficient training data: need at least {required} samples, got {actual}")]
    InsufficientTrainingData { required: usize, actual: usize },

    #[error("index is not ready: {0}")]
    NotReady(&'static str),

    #[error("I/O error at {path:?} (offset {position:?}): {source}")]
    Io {
        path: PathBuf,
        position: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl IvfHnswError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IvfHnswError::Io {
            path: path.into(),
            position: None,
            source,
        }
    }

    pub fn io_at(path: impl Into<PathBuf>, position: u64, source: std::io::Error) -> Self {
        IvfHnswError::Io {
            path: path.into(),
            position: Some(position),
            source,
        }
    }

    pub fn malformed(context: impl Into<String>, detail: impl Into<String>) -> Self {
        IvfHnswError::MalformedInput {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IvfHnswError>;
