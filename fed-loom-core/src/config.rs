//! Federation strategy configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client participation policy for a federation, fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fraction of available clients sampled for training each round.
    pub fraction_fit: f64,
    /// Fraction of available clients sampled for distributed evaluation.
    /// Zero disables the distributed evaluation phase.
    pub fraction_evaluate: f64,
    /// Minimum successful training responses for a round to aggregate.
    pub min_fit_clients: usize,
    /// Minimum successful evaluation responses for a distributed
    /// evaluation to be recorded.
    pub min_evaluate_clients: usize,
    /// Minimum clients that must be connected before a round starts.
    pub min_available_clients: usize,
    /// Whether rounds with client failures may still aggregate.
    pub accept_failures: bool,
    /// Total number of training rounds to run.
    pub num_rounds: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fraction_fit: 1.0,
            fraction_evaluate: 0.0,
            min_fit_clients: 3,
            min_evaluate_clients: 3,
            min_available_clients: 3,
            accept_failures: true,
            num_rounds: 10,
        }
    }
}

impl StrategyConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> StrategyConfigBuilder {
        StrategyConfigBuilder::default()
    }

    /// How many clients to sample for training out of `available`.
    ///
    /// `ceil(fraction_fit * available)`, raised to `min_fit_clients` and
    /// capped at `available`.
    pub fn fit_sample_size(&self, available: usize) -> usize {
        let by_fraction = (self.fraction_fit * available as f64).ceil() as usize;
        by_fraction.max(self.min_fit_clients).min(available)
    }

    /// How many clients to sample for distributed evaluation.
    pub fn evaluate_sample_size(&self, available: usize) -> usize {
        let by_fraction = (self.fraction_evaluate * available as f64).ceil() as usize;
        by_fraction.max(self.min_evaluate_clients).min(available)
    }

    /// Validate the cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.min_fit_clients == 0 {
            return Err(Error::InvalidConfig(
                "min_fit_clients must be at least 1".into(),
            ));
        }
        if self.min_fit_clients > self.min_available_clients {
            return Err(Error::InvalidConfig(format!(
                "min_fit_clients ({}) exceeds min_available_clients ({})",
                self.min_fit_clients, self.min_available_clients
            )));
        }
        if !(0.0..=1.0).contains(&self.fraction_fit) {
            return Err(Error::InvalidConfig(format!(
                "fraction_fit must be within [0, 1], got {}",
                self.fraction_fit
            )));
        }
        if !(0.0..=1.0).contains(&self.fraction_evaluate) {
            return Err(Error::InvalidConfig(format!(
                "fraction_evaluate must be within [0, 1], got {}",
                self.fraction_evaluate
            )));
        }
        if self.num_rounds == 0 {
            return Err(Error::InvalidConfig("num_rounds must be at least 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`StrategyConfig`].
#[derive(Debug, Clone, Default)]
pub struct StrategyConfigBuilder {
    config: StrategyConfig,
}

impl StrategyConfigBuilder {
    /// Fraction of available clients sampled for training.
    pub fn fraction_fit(mut self, fraction: f64) -> Self {
        self.config.fraction_fit = fraction;
        self
    }

    /// Fraction of available clients sampled for distributed evaluation.
    pub fn fraction_evaluate(mut self, fraction: f64) -> Self {
        self.config.fraction_evaluate = fraction;
        self
    }

    /// Minimum successful training responses per round.
    pub fn min_fit_clients(mut self, min: usize) -> Self {
        self.config.min_fit_clients = min;
        self
    }

    /// Minimum successful evaluation responses per round.
    pub fn min_evaluate_clients(mut self, min: usize) -> Self {
        self.config.min_evaluate_clients = min;
        self
    }

    /// Minimum connected clients before a round starts.
    pub fn min_available_clients(mut self, min: usize) -> Self {
        self.config.min_available_clients = min;
        self
    }

    /// Whether rounds with failures may still aggregate.
    pub fn accept_failures(mut self, accept: bool) -> Self {
        self.config.accept_failures = accept;
        self
    }

    /// Total number of training rounds.
    pub fn num_rounds(mut self, rounds: u64) -> Self {
        self.config.num_rounds = rounds;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<StrategyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
