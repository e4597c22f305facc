use std::path::PathBuf;
use thiserror::Error;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Download, checksum or extraction of a model archive failed.
    #[error("failed to acquire {url}: {source:#}")]
    Acquisition {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("failed to open session for {}: {source:#}", path.display())]
    Session {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The engine rejected input `index` of the batch.
    #[error("inference failed on input {index}: {source:#}")]
    Inference {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid test data in {}: {reason}", path.display())]
    TestData { path: PathBuf, reason: String },

    #[error(
        "output mismatch in case {case}, output {output}, element {index}: expected {expected}, got {actual}"
    )]
    Mismatch {
        case: usize,
        output: usize,
        index: usize,
        expected: f64,
        actual: f64,
    },

    #[error("shape mismatch in case {case}, output {output}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        case: usize,
        output: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("case {case}: expected {expected} outputs, got {actual}")]
    OutputCount {
        case: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
