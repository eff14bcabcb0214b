//! # FedLoom Models
//!
//! Reference model and data plumbing for FedLoom.
//!
//! This crate provides everything a participant needs outside the
//! aggregation core:
//! - A small dense image classifier implementing the positional
//!   [`ParameterCodec`](fed_loom_core::codec::ParameterCodec) contract
//!   ([`dense::DenseClassifier`])
//! - An in-memory image dataset with even partitioning and a synthetic
//!   generator ([`dataset::ImageDataset`])
//! - The local SGD training loop ([`trainer::LocalTrainer`])
//! - Centralized evaluation with loss, accuracy, and macro-F1
//!   ([`eval::EvaluationHarness`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dataset;
pub mod dense;
pub mod eval;
pub mod trainer;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::dataset::ImageDataset;
    pub use crate::dense::DenseClassifier;
    pub use crate::eval::{Evaluation, EvaluationHarness};
    pub use crate::trainer::LocalTrainer;
    pub use crate::{ModelError, Result};
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type for model and dataset operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// A parameter-contract violation from the aggregation core.
    #[error(transparent)]
    Core(#[from] fed_loom_core::Error),

    /// The dataset holds no samples, so there is nothing to train or
    /// evaluate on.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Image and label counts disagree.
    #[error("sample count mismatch: {images} images, {labels} labels")]
    SampleCountMismatch {
        /// Number of images provided
        images: usize,
        /// Number of labels provided
        labels: usize,
    },

    /// A label falls outside the dataset's class range.
    #[error("label {label} out of range for {class_count} classes")]
    LabelOutOfRange {
        /// The offending label
        label: usize,
        /// Number of classes the dataset declares
        class_count: usize,
    },

    /// A batch's feature width disagrees with the model's input layer.
    #[error("batch has {found} features, model expects {expected}")]
    FeatureMismatch {
        /// Input width the model was built with
        expected: usize,
        /// Feature width actually received
        found: usize,
    },

    /// A classifier needs at least two classes.
    #[error("class count must be at least 2, got {0}")]
    TooFewClasses(usize),
}
