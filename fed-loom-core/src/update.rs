//! Round and client primitives shared across the workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::params::ParameterSet;

/// Client identifier, assigned by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Create a new client id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Round identifier, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundId(pub u64);

impl RoundId {
    /// The first round of a federation.
    pub const FIRST: RoundId = RoundId(1);

    /// The next round id.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {}", self.0)
    }
}

/// One client's contribution to a round: locally trained parameters, the
/// number of samples used, and training metrics.
///
/// `sample_count` must be positive; an update with zero samples cannot be
/// weighted and is excluded from aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientUpdate {
    /// Locally trained parameters.
    pub parameters: ParameterSet,
    /// Number of local samples trained on.
    pub sample_count: u64,
    /// Training metrics reported by the client.
    pub metrics: Metrics,
}

impl ClientUpdate {
    /// Create an update with empty metrics.
    pub fn new(parameters: ParameterSet, sample_count: u64) -> Self {
        Self {
            parameters,
            sample_count,
            metrics: Metrics::new(),
        }
    }

    /// Attach a metric value.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Whether the update can participate in aggregation.
    pub fn is_valid(&self) -> bool {
        self.sample_count > 0
    }
}

/// A client that failed to produce an update for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFailure {
    /// Which client failed.
    pub client: ClientId,
    /// The round it failed in.
    pub round: RoundId,
    /// Human-readable cause, for logs and history.
    pub reason: String,
}

impl ClientFailure {
    /// Record a failure.
    pub fn new(client: ClientId, round: RoundId, reason: impl Into<String>) -> Self {
        Self {
            client,
            round,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ClientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed in {}: {}", self.client, self.round, self.reason)
    }
}

/// The product of one aggregation pass.
///
/// `parameters` is `None` when the round produced no global update (no
/// usable results, or failures present under a strict failure policy); the
/// coordinator then keeps the previous global parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundOutcome {
    /// Aggregated parameters, or `None` for a degraded round.
    pub parameters: Option<ParameterSet>,
    /// Aggregated metrics across the round's updates.
    pub metrics: Metrics,
}

impl RoundOutcome {
    /// An outcome carrying no parameters and no metrics.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the round failed to produce new global parameters.
    pub fn is_degraded(&self) -> bool {
        self.parameters.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    #[test]
    fn update_builder_attaches_metrics() {
        let params = ParameterSet::new(vec![ArrayD::zeros(IxDyn(&[2]))]);
        let update = ClientUpdate::new(params, 10).with_metric("train_loss", 0.5);
        assert!(update.is_valid());
        assert_eq!(update.metrics.get("train_loss"), Some(&0.5));
    }

    #[test]
    fn zero_sample_updates_are_invalid() {
        let params = ParameterSet::empty();
        assert!(!ClientUpdate::new(params, 0).is_valid());
    }

    #[test]
    fn empty_outcome_is_degraded() {
        let outcome = RoundOutcome::empty();
        assert!(outcome.is_degraded());
        assert!(outcome.metrics.is_empty());
    }

    #[test]
    fn ids_render_for_logs() {
        assert_eq!(ClientId::new(7).to_string(), "client-7");
        assert_eq!(RoundId::FIRST.next().to_string(), "round 2");
    }
}
