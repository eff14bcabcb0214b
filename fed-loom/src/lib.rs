//! # FedLoom
//!
//! **Round-based federated learning without centralizing raw data.**
//!
//! FedLoom coordinates training of an image classifier across data-holding
//! clients: each round the coordinator dispatches the global parameters to
//! a sampled client set, collects locally trained updates, combines them
//! with a pluggable aggregation rule (sample-weighted mean or
//! coordinate-wise median), and redistributes the result.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fed_loom::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> fed_loom::Result<()> {
//!     let config = FederationConfig::builder()
//!         .aggregation(AggregationRule::CoordinateMedian)
//!         .num_rounds(5)
//!         .build()?;
//!
//!     let mut coordinator = RoundCoordinator::new(config, pool)?
//!         .with_initial_parameters(initial);
//!     coordinator.run().await?;
//!     println!("{}", coordinator.report().to_json()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Crate structure
//!
//! - [`fed_loom_core`]: aggregation rules and parameter primitives
//! - [`fed_loom_net`]: wire contract and client transport
//! - [`fed_loom_models`]: reference classifier, dataset, trainer, harness

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Re-export sub-crates
pub use fed_loom_core as core;
pub use fed_loom_models as models;
pub use fed_loom_net as net;

pub mod client;
pub mod config;
pub mod coordinator;
pub mod history;

pub use client::TrainingClient;
pub use config::{EnvOverrides, FederationConfig, FederationConfigBuilder};
pub use coordinator::{RoundCoordinator, RoundPhase};
pub use history::{FederationReport, RoundRecord, RoundStatus};

// Re-export commonly used items at the top level
pub use fed_loom_core::aggregation::AggregationRule;
pub use fed_loom_core::{ClientFailure, ClientId, ClientUpdate, ParameterSet, RoundId};

/// Result type for federation operations
pub type Result<T> = std::result::Result<T, FederationError>;

/// Top-level federation errors.
///
/// Per-client failures never appear here; they are collected per round and
/// only surface through the round history. What does appear is fatal:
/// structural parameter mismatches and configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// A structural or configuration error from the aggregation core.
    #[error(transparent)]
    Core(#[from] fed_loom_core::Error),

    /// The coordinator was started with no connected clients.
    #[error("no clients connected to the coordinator")]
    NoClients,

    /// No initial global parameters and no client could supply them.
    #[error("could not obtain initial parameters: {0}")]
    InitialParameters(String),

    /// An environment override carried an unparseable value.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// The environment variable name
        name: String,
        /// The rejected value
        value: String,
    },
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EnvOverrides, FederationConfig};
    pub use crate::coordinator::{RoundCoordinator, RoundPhase};
    pub use crate::history::{FederationReport, RoundRecord, RoundStatus};
    pub use crate::{FederationError, Result, TrainingClient};

    pub use fed_loom_core::aggregation::{AggregationRule, UpdateAggregator};
    pub use fed_loom_core::codec::ParameterCodec;
    pub use fed_loom_core::config::StrategyConfig;
    pub use fed_loom_core::metrics::Metrics;
    pub use fed_loom_core::{ClientFailure, ClientId, ClientUpdate, ParameterSet, RoundId};
    pub use fed_loom_models::dataset::ImageDataset;
    pub use fed_loom_models::eval::EvaluationHarness;
    pub use fed_loom_models::trainer::LocalTrainer;
    pub use fed_loom_net::channel::spawn_channel_client;
    pub use fed_loom_net::traits::{ClientPool, ClientProxy};
}
