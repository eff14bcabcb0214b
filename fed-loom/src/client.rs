//! Glue between the reference trainer and the wire contract.

use fed_loom_core::metrics::Metrics;
use fed_loom_core::ParameterSet;
use fed_loom_models::trainer::LocalTrainer;
use fed_loom_models::ModelError;
use fed_loom_net::channel::{ClientApp, FitOutput};
use fed_loom_net::protocol::EvaluateResult;
use fed_loom_net::traits::{EvaluateConfig, FitConfig};

/// A participant: a [`LocalTrainer`] served over the channel transport.
///
/// Fit requests run the real local training loop. Evaluate requests answer
/// with a placeholder since evaluation is centralized on the coordinator.
pub struct TrainingClient {
    trainer: LocalTrainer,
}

impl TrainingClient {
    /// Wrap a trainer for serving.
    pub fn new(trainer: LocalTrainer) -> Self {
        Self { trainer }
    }

    /// The trainer's freshly initialized parameters.
    pub fn initial_parameters(&self) -> ParameterSet {
        self.trainer.initial_parameters()
    }
}

impl ClientApp for TrainingClient {
    type Error = ModelError;

    fn parameters(&self) -> Result<ParameterSet, ModelError> {
        Ok(self.trainer.initial_parameters())
    }

    fn fit(
        &mut self,
        parameters: ParameterSet,
        config: &FitConfig,
    ) -> Result<FitOutput, ModelError> {
        let (parameters, sample_count, metrics) =
            self.trainer.fit(&parameters, config.local_epochs)?;
        Ok(FitOutput {
            parameters,
            sample_count,
            metrics,
        })
    }

    fn evaluate(
        &mut self,
        _parameters: ParameterSet,
        _config: &EvaluateConfig,
    ) -> Result<EvaluateResult, ModelError> {
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), 0.0);
        Ok(EvaluateResult {
            loss: 0.0,
            sample_count: self.trainer.sample_count(),
            metrics,
        })
    }
}
