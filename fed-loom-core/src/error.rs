//! Error types for the aggregation core.
//!
//! The taxonomy separates structural errors, which indicate an architecture
//! mismatch between coordinator and clients and must terminate the
//! federation, from per-round conditions the coordinator recovers from by
//! skipping the round.

use thiserror::Error;

/// Result type for FedLoom core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for FedLoom core operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A layer's shape disagrees with the architecture contract. Fatal.
    #[error("layer {layer} shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Index of the offending layer
        layer: usize,
        /// Shape required by the architecture
        expected: Vec<usize>,
        /// Shape actually received
        found: Vec<usize>,
    },

    /// A parameter sequence has the wrong number of layers. Fatal.
    #[error("parameter length mismatch: expected {expected} layers, found {found}")]
    LengthMismatch {
        /// Layer count required by the architecture
        expected: usize,
        /// Layer count actually received
        found: usize,
    },

    /// Too few clients to run the round. The round is skipped and the
    /// federation continues with unchanged global parameters.
    #[error("insufficient clients: needed {needed}, available {available}")]
    InsufficientClients {
        /// Minimum required by the strategy configuration
        needed: usize,
        /// How many were actually available or responded
        available: usize,
    },

    /// An update declared a zero sample count and cannot be weighted.
    #[error("update {index} reported a zero sample count")]
    InvalidSampleCount {
        /// Position of the update in the round's collection order
        index: usize,
    },

    /// A configuration value failed validation at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A parameter layer was not in contiguous row-major layout.
    ///
    /// `ParameterSet` constructors normalize layout, so this only fires if
    /// that guarantee is bypassed.
    #[error("parameter layer {0} is not contiguous")]
    NonContiguousLayer(usize),

    /// Rebuilding an array from aggregated coordinates failed.
    #[error("array construction failed: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

impl Error {
    /// Whether this error must terminate the federation rather than skip a
    /// round.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ShapeMismatch { .. }
                | Error::LengthMismatch { .. }
                | Error::InvalidConfig(_)
                | Error::NonContiguousLayer(_)
                | Error::Shape(_)
        )
    }
}
