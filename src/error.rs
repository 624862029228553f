//! Error types for ellcg

use thiserror::Error;

/// Result type alias using ellcg's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal conditions during matrix construction and I/O.
///
/// Non-convergence of the iterative solver is deliberately *not* an error;
/// it is reported as data in [`crate::solver::SolverStats`].
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported input
    #[error("format error: {0}")]
    Format(String),

    /// A required buffer could not be obtained
    #[error("allocation of {bytes} bytes for {what} failed")]
    Allocation {
        /// What the buffer was for
        what: &'static str,
        /// Requested size in bytes
        bytes: usize,
    },

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// GPU device setup failure (no adapter, missing f64 support, ...)
    #[cfg(feature = "gpu")]
    #[error("gpu error: {0}")]
    Gpu(String),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
