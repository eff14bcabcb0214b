//! # FedLoom Core
//!
//! Aggregation algorithms and parameter primitives for FedLoom.
//!
//! This crate provides the building blocks of the round-based federation
//! protocol:
//! - Ordered, shape-checked parameter containers ([`params::ParameterSet`])
//! - The positional model codec contract ([`codec::ParameterCodec`])
//! - Sample-weighted mean and coordinate-median aggregation ([`aggregation`])
//! - Metric reduction across client updates ([`metrics`])
//! - Federation strategy configuration ([`config::StrategyConfig`])
//!
//! Everything here is transport-agnostic: the coordinator and the wire layer
//! live in their own crates and feed this one plain `ClientUpdate` values.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregation;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod params;
pub mod update;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregation::{AggregationRule, UpdateAggregator};
    pub use crate::codec::ParameterCodec;
    pub use crate::config::{StrategyConfig, StrategyConfigBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{MetricReducer, Metrics, MetricsPolicy};
    pub use crate::params::ParameterSet;
    pub use crate::update::{ClientFailure, ClientId, ClientUpdate, RoundId, RoundOutcome};
}

pub use error::{Error, Result};
pub use params::ParameterSet;
pub use update::{ClientFailure, ClientId, ClientUpdate, RoundId, RoundOutcome};
