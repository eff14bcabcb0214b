//! Scriptable client for testing coordinator behavior without transport or
//! training.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fed_loom_core::metrics::Metrics;
use fed_loom_core::{ClientId, ClientUpdate, ParameterSet};

use crate::protocol::EvaluateResult;
use crate::traits::{ClientProxy, EvaluateConfig, FitConfig};
use crate::{Error, Result};

/// A client whose responses are scripted up front.
///
/// By default it echoes back whatever parameters it is asked to train,
/// reporting ten samples. Builders switch it to fixed parameters, failures,
/// or artificial latency.
#[derive(Debug, Clone)]
pub struct MockClient {
    id: ClientId,
    sample_count: u64,
    fit_parameters: Option<ParameterSet>,
    fail_reason: Option<String>,
    delay: Option<Duration>,
    metrics: Metrics,
    eval_loss: f64,
    fit_calls: Arc<AtomicUsize>,
}

impl MockClient {
    /// A healthy client that echoes incoming parameters, ten samples each
    /// round.
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            sample_count: 10,
            fit_parameters: None,
            fail_reason: None,
            delay: None,
            metrics: Metrics::new(),
            eval_loss: 0.5,
            fit_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report this many samples per round.
    pub fn with_sample_count(mut self, samples: u64) -> Self {
        self.sample_count = samples;
        self
    }

    /// Always return these parameters from `fit` and `get_parameters`.
    pub fn with_fit_parameters(mut self, parameters: ParameterSet) -> Self {
        self.fit_parameters = Some(parameters);
        self
    }

    /// Fail every request with this reason.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_reason = Some(reason.into());
        self
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach a metric to every fit result.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Report this loss from every evaluate call.
    pub fn with_eval_loss(mut self, loss: f64) -> Self {
        self.eval_loss = loss;
        self
    }

    /// How many fit requests this client has served.
    pub fn fit_calls(&self) -> usize {
        self.fit_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_reason {
            return Err(Error::Rejected(reason.clone()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClientProxy for MockClient {
    fn id(&self) -> ClientId {
        self.id
    }

    async fn get_parameters(&self) -> Result<ParameterSet> {
        self.gate().await?;
        self.fit_parameters
            .clone()
            .ok_or_else(|| Error::Rejected("no parameters scripted".into()))
    }

    async fn fit(&self, parameters: &ParameterSet, _config: &FitConfig) -> Result<ClientUpdate> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let parameters = self
            .fit_parameters
            .clone()
            .unwrap_or_else(|| parameters.clone());
        Ok(ClientUpdate {
            parameters,
            sample_count: self.sample_count,
            metrics: self.metrics.clone(),
        })
    }

    async fn evaluate(
        &self,
        _parameters: &ParameterSet,
        _config: &EvaluateConfig,
    ) -> Result<EvaluateResult> {
        self.gate().await?;
        Ok(EvaluateResult {
            loss: self.eval_loss,
            sample_count: self.sample_count,
            metrics: Metrics::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_loom_core::RoundId;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    fn params(value: f32) -> ParameterSet {
        ParameterSet::new(vec![ArrayD::from_elem(IxDyn(&[2]), value)])
    }

    #[tokio::test]
    async fn echoes_parameters_by_default() {
        let client = MockClient::new(ClientId::new(1)).with_sample_count(7);
        let update = client
            .fit(&params(3.0), &FitConfig::new(RoundId::FIRST, 1))
            .await
            .unwrap();
        assert_eq!(update.parameters, params(3.0));
        assert_eq!(update.sample_count, 7);
        assert_eq!(client.fit_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_rejects_every_request() {
        let client = MockClient::new(ClientId::new(2)).failing("offline");
        let err = client
            .fit(&params(0.0), &FitConfig::new(RoundId::FIRST, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(reason) if reason == "offline"));
    }

    #[tokio::test]
    async fn fixed_parameters_override_the_echo() {
        let client = MockClient::new(ClientId::new(3)).with_fit_parameters(params(9.0));
        let update = client
            .fit(&params(1.0), &FitConfig::new(RoundId::FIRST, 1))
            .await
            .unwrap();
        assert_eq!(update.parameters, params(9.0));
    }
}
