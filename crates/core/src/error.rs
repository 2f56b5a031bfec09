use thiserror::Error;

/// Errors that can occur while running a batched search.
#[derive(Error, Debug)]
pub enum EzError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("node {node} is already expanded")]
    AlreadyExpanded { node: usize },

    #[error("pool append at depth {actual}, expected depth {expected}")]
    PoolDepthMismatch { expected: usize, actual: usize },

    #[error("pool has no entry at depth {depth}, row {row}")]
    PoolIndexOutOfRange { depth: usize, row: usize },

    #[error("oracle returned a non-finite {field} at row {row}")]
    NonFiniteOutput { field: &'static str, row: usize },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid root: {0}")]
    InvalidRoot(String),

    #[error("inference oracle failed: {0}")]
    Oracle(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EzError {
    /// Wrap an error raised by an external model.
    pub fn oracle<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        EzError::Oracle(err.into())
    }
}

/// Convenience Result type for search operations
pub type Result<T> = std::result::Result<T, EzError>;
