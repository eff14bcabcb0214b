//! Federation configuration and environment overrides.

use std::time::Duration;

use fed_loom_core::aggregation::AggregationRule;
use fed_loom_core::config::StrategyConfig;

use crate::{FederationError, Result};

/// Everything fixed at federation start: the participation policy, the
/// aggregation rule, and the per-round dispatch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FederationConfig {
    /// Client participation policy.
    pub strategy: StrategyConfig,
    /// Parameter aggregation rule, fixed for the whole federation.
    pub aggregation: AggregationRule,
    /// Local training epochs per round.
    pub local_epochs: u32,
    /// Per-client deadline for fit/evaluate calls.
    pub round_timeout: Duration,
    /// Seed for client sampling; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            aggregation: AggregationRule::WeightedMean,
            local_epochs: 2,
            round_timeout: Duration::from_secs(30),
            seed: None,
        }
    }
}

impl FederationConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> FederationConfigBuilder {
        FederationConfigBuilder::default()
    }

    /// Validate the configuration's cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        Ok(())
    }
}

/// Builder for [`FederationConfig`].
#[derive(Debug, Clone, Default)]
pub struct FederationConfigBuilder {
    config: FederationConfig,
}

impl FederationConfigBuilder {
    /// Parameter aggregation rule.
    pub fn aggregation(mut self, rule: AggregationRule) -> Self {
        self.config.aggregation = rule;
        self
    }

    /// Total number of training rounds.
    pub fn num_rounds(mut self, rounds: u64) -> Self {
        self.config.strategy.num_rounds = rounds;
        self
    }

    /// Fraction of available clients sampled for training.
    pub fn fraction_fit(mut self, fraction: f64) -> Self {
        self.config.strategy.fraction_fit = fraction;
        self
    }

    /// Fraction of available clients sampled for distributed evaluation.
    pub fn fraction_evaluate(mut self, fraction: f64) -> Self {
        self.config.strategy.fraction_evaluate = fraction;
        self
    }

    /// Minimum successful training responses per round.
    pub fn min_fit_clients(mut self, min: usize) -> Self {
        self.config.strategy.min_fit_clients = min;
        self
    }

    /// Minimum successful evaluation responses per round.
    pub fn min_evaluate_clients(mut self, min: usize) -> Self {
        self.config.strategy.min_evaluate_clients = min;
        self
    }

    /// Minimum connected clients before a round starts.
    pub fn min_available_clients(mut self, min: usize) -> Self {
        self.config.strategy.min_available_clients = min;
        self
    }

    /// Whether rounds with client failures may still aggregate.
    pub fn accept_failures(mut self, accept: bool) -> Self {
        self.config.strategy.accept_failures = accept;
        self
    }

    /// Local training epochs per round.
    pub fn local_epochs(mut self, epochs: u32) -> Self {
        self.config.local_epochs = epochs;
        self
    }

    /// Per-client deadline for fit/evaluate calls.
    pub fn round_timeout(mut self, timeout: Duration) -> Self {
        self.config.round_timeout = timeout;
        self
    }

    /// Seed for client sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<FederationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration values read from `FED_LOOM_*` environment variables.
///
/// The simulator takes its whole configuration from the environment.
/// Unset variables leave the builder value untouched.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    rounds: Option<u64>,
    aggregation: Option<AggregationRule>,
    min_fit: Option<usize>,
    min_evaluate: Option<usize>,
    min_available: Option<usize>,
    fraction_fit: Option<f64>,
    local_epochs: Option<u32>,
    seed: Option<u64>,
}

impl EnvOverrides {
    /// Read the `FED_LOOM_*` variables, rejecting unparseable values.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rounds: parse_var("FED_LOOM_ROUNDS")?,
            aggregation: parse_var("FED_LOOM_AGGREGATION")?,
            min_fit: parse_var("FED_LOOM_MIN_FIT")?,
            min_evaluate: parse_var("FED_LOOM_MIN_EVALUATE")?,
            min_available: parse_var("FED_LOOM_MIN_AVAILABLE")?,
            fraction_fit: parse_var("FED_LOOM_FRACTION_FIT")?,
            local_epochs: parse_var("FED_LOOM_LOCAL_EPOCHS")?,
            seed: parse_var("FED_LOOM_SEED")?,
        })
    }

    /// Layer the overrides onto `config` and re-validate.
    pub fn apply(self, mut config: FederationConfig) -> Result<FederationConfig> {
        if let Some(rounds) = self.rounds {
            config.strategy.num_rounds = rounds;
        }
        if let Some(rule) = self.aggregation {
            config.aggregation = rule;
        }
        if let Some(min) = self.min_fit {
            config.strategy.min_fit_clients = min;
        }
        if let Some(min) = self.min_evaluate {
            config.strategy.min_evaluate_clients = min;
        }
        if let Some(min) = self.min_available {
            config.strategy.min_available_clients = min;
        }
        if let Some(fraction) = self.fraction_fit {
            config.strategy.fraction_fit = fraction;
        }
        if let Some(epochs) = self.local_epochs {
            config.local_epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| FederationError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
