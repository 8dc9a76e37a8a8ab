use std::path::PathBuf;
use thiserror::Error;

pub mod connectivity;
pub mod gradients;
pub mod matrix_store;
pub mod npy;
pub mod pca;
pub mod pipeline;
pub mod report;

/// Error taxonomy for the connectivity PCA pipeline. Everything here is fatal:
/// errors are detected at the point of violation and propagated to the caller
/// without retry or partial output.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("no stored matrix for subject '{subject}', metric '{metric}' under {root:?}")]
    MissingMatrix {
        subject: String,
        metric: String,
        root: PathBuf,
    },

    #[error("shape mismatch: expected {expected:?}, found {found:?} ({context})")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
        context: String,
    },

    #[error(
        "common-connection masks disagree: {count_a} retained cells for metric '{metric_a}' \
         vs {count_b} for metric '{metric_b}', please validate input data"
    )]
    InconsistentMask {
        metric_a: String,
        count_a: usize,
        metric_b: String,
        count_b: usize,
    },

    #[error("malformed matrix file {path:?}: {reason}")]
    MatrixFormat { path: PathBuf, reason: String },

    #[error("bad gradient table: {0}")]
    GradientFormat(String),

    #[error("decomposition failed: {0}")]
    Decomposition(String),

    #[error("bad configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
