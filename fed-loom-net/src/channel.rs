//! In-process channel transport.
//!
//! Connects a coordinator-side [`ChannelClient`] to a client-side
//! [`ClientApp`] over tokio channels, pushing every request through the
//! real wire format. Tests and simulations get the full protocol path
//! without sockets.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use fed_loom_core::metrics::Metrics;
use fed_loom_core::{ClientId, ClientUpdate, ParameterSet, RoundId};

use crate::protocol::{
    EncodedParameters, ErrorReply, EvaluateInstruction, EvaluateResult, FitInstruction,
    FitResult, MessageEnvelope, MessageType, ParametersReply, COORDINATOR_ID,
};
use crate::traits::{ClientProxy, EvaluateConfig, FitConfig};
use crate::{Error, Result};

/// Default per-request deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request queue depth per client.
const REQUEST_BUFFER: usize = 8;

/// What a participant runs locally: the client side of the wire contract.
///
/// Implementations own their model and data; the transport hands them
/// decoded parameters and passes their results back. Errors only need to
/// render a reason, which travels to the coordinator as a rejection.
pub trait ClientApp: Send + 'static {
    /// Error type surfaced to the coordinator as a rejection reason.
    type Error: std::fmt::Display + Send;

    /// The participant's current local parameters.
    fn parameters(&self) -> std::result::Result<ParameterSet, Self::Error>;

    /// Train locally starting from `parameters`.
    fn fit(
        &mut self,
        parameters: ParameterSet,
        config: &FitConfig,
    ) -> std::result::Result<FitOutput, Self::Error>;

    /// Evaluate `parameters` on local evaluation data.
    fn evaluate(
        &mut self,
        parameters: ParameterSet,
        config: &EvaluateConfig,
    ) -> std::result::Result<EvaluateResult, Self::Error>;
}

/// A completed local training pass.
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// Locally trained parameters
    pub parameters: ParameterSet,
    /// Number of local samples trained on
    pub sample_count: u64,
    /// Training metrics
    pub metrics: Metrics,
}

struct ChannelRequest {
    bytes: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

/// Coordinator-side handle to a client served over an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    id: ClientId,
    tx: mpsc::Sender<ChannelRequest>,
    timeout: Duration,
}

impl ChannelClient {
    /// Replace the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, envelope: MessageEnvelope) -> Result<MessageEnvelope> {
        let bytes = envelope.serialize()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ChannelRequest {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        let reply = tokio::time::timeout(self.timeout, reply_rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::ChannelClosed)?;
        MessageEnvelope::deserialize(&reply)
    }
}

#[async_trait::async_trait]
impl ClientProxy for ChannelClient {
    fn id(&self) -> ClientId {
        self.id
    }

    async fn get_parameters(&self) -> Result<ParameterSet> {
        let request = MessageEnvelope::new(COORDINATOR_ID, MessageType::GetParameters, Vec::new());
        let reply = self.request(request).await?;
        let parameters: ParametersReply = reply.expect(MessageType::Parameters)?;
        parameters.parameters.decode()
    }

    async fn fit(&self, parameters: &ParameterSet, config: &FitConfig) -> Result<ClientUpdate> {
        let payload = postcard::to_allocvec(&FitInstruction {
            round: config.round.0,
            local_epochs: config.local_epochs,
            config: config.extras.clone(),
            parameters: EncodedParameters::from_params(parameters)?,
        })?;
        let request = MessageEnvelope::new(COORDINATOR_ID, MessageType::FitInstruction, payload)
            .with_round(config.round);
        let reply = self.request(request).await?;
        let result: FitResult = reply.expect(MessageType::FitResult)?;
        Ok(ClientUpdate {
            parameters: result.parameters.decode()?,
            sample_count: result.sample_count,
            metrics: result.metrics,
        })
    }

    async fn evaluate(
        &self,
        parameters: &ParameterSet,
        config: &EvaluateConfig,
    ) -> Result<EvaluateResult> {
        let payload = postcard::to_allocvec(&EvaluateInstruction {
            round: config.round.0,
            config: config.extras.clone(),
            parameters: EncodedParameters::from_params(parameters)?,
        })?;
        let request =
            MessageEnvelope::new(COORDINATOR_ID, MessageType::EvaluateInstruction, payload)
                .with_round(config.round);
        let reply = self.request(request).await?;
        reply.expect(MessageType::EvaluateResult)
    }
}

/// Spawn a worker task serving `app` and return the coordinator-side handle.
///
/// The worker exits when every `ChannelClient` clone is dropped.
pub fn spawn_channel_client<A: ClientApp>(
    id: ClientId,
    app: A,
) -> (ChannelClient, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ChannelRequest>(REQUEST_BUFFER);
    let handle = tokio::spawn(async move {
        let mut app = app;
        while let Some(request) = rx.recv().await {
            let reply = serve_request(id, &mut app, &request.bytes);
            // A dropped receiver means the coordinator abandoned the round;
            // the result is simply discarded.
            let _ = request.reply.send(reply);
        }
        tracing::debug!(client = %id, "channel client worker stopped");
    });
    (
        ChannelClient {
            id,
            tx,
            timeout: DEFAULT_TIMEOUT,
        },
        handle,
    )
}

fn serve_request<A: ClientApp>(id: ClientId, app: &mut A, bytes: &[u8]) -> Vec<u8> {
    let reply = match process_request(id, app, bytes) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(client = %id, error = %err, "request failed");
            error_reply(id, &err.to_string())
        }
    };
    reply.serialize().unwrap_or_default()
}

fn process_request<A: ClientApp>(
    id: ClientId,
    app: &mut A,
    bytes: &[u8],
) -> Result<MessageEnvelope> {
    let request = MessageEnvelope::deserialize(bytes)?;
    let round = RoundId(request.round);

    match request.message_type {
        MessageType::GetParameters => {
            let params = app
                .parameters()
                .map_err(|e| Error::Rejected(e.to_string()))?;
            let payload = postcard::to_allocvec(&ParametersReply {
                parameters: EncodedParameters::from_params(&params)?,
            })?;
            Ok(MessageEnvelope::new(id, MessageType::Parameters, payload).with_round(round))
        }
        MessageType::FitInstruction => {
            let instruction: FitInstruction = postcard::from_bytes(&request.payload)?;
            let parameters = instruction.parameters.decode()?;
            let config = FitConfig {
                round: RoundId(instruction.round),
                local_epochs: instruction.local_epochs,
                extras: instruction.config,
            };
            let output = app
                .fit(parameters, &config)
                .map_err(|e| Error::Rejected(e.to_string()))?;
            let payload = postcard::to_allocvec(&FitResult {
                parameters: EncodedParameters::from_params(&output.parameters)?,
                sample_count: output.sample_count,
                metrics: output.metrics,
            })?;
            Ok(MessageEnvelope::new(id, MessageType::FitResult, payload).with_round(round))
        }
        MessageType::EvaluateInstruction => {
            let instruction: EvaluateInstruction = postcard::from_bytes(&request.payload)?;
            let parameters = instruction.parameters.decode()?;
            let config = EvaluateConfig {
                round: RoundId(instruction.round),
                extras: instruction.config,
            };
            let result = app
                .evaluate(parameters, &config)
                .map_err(|e| Error::Rejected(e.to_string()))?;
            let payload = postcard::to_allocvec(&result)?;
            Ok(MessageEnvelope::new(id, MessageType::EvaluateResult, payload).with_round(round))
        }
        other => Err(Error::UnexpectedMessage(other)),
    }
}

fn error_reply(id: ClientId, message: &str) -> MessageEnvelope {
    let payload = postcard::to_allocvec(&ErrorReply {
        message: message.to_string(),
    })
    .unwrap_or_default();
    MessageEnvelope::new(id, MessageType::Error, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    /// Adds one to every coordinate and reports a fixed sample count.
    struct PlusOne {
        samples: u64,
    }

    impl ClientApp for PlusOne {
        type Error = String;

        fn parameters(&self) -> std::result::Result<ParameterSet, String> {
            Ok(ParameterSet::new(vec![ArrayD::zeros(IxDyn(&[3]))]))
        }

        fn fit(
            &mut self,
            parameters: ParameterSet,
            _config: &FitConfig,
        ) -> std::result::Result<FitOutput, String> {
            let layers = parameters
                .into_layers()
                .into_iter()
                .map(|l| l.mapv(|v| v + 1.0))
                .collect();
            Ok(FitOutput {
                parameters: ParameterSet::new(layers),
                sample_count: self.samples,
                metrics: Metrics::new(),
            })
        }

        fn evaluate(
            &mut self,
            _parameters: ParameterSet,
            _config: &EvaluateConfig,
        ) -> std::result::Result<EvaluateResult, String> {
            Ok(EvaluateResult {
                loss: 0.25,
                sample_count: self.samples,
                metrics: Metrics::new(),
            })
        }
    }

    /// Refuses all work.
    struct Broken;

    impl ClientApp for Broken {
        type Error = String;

        fn parameters(&self) -> std::result::Result<ParameterSet, String> {
            Err("no local model".into())
        }

        fn fit(
            &mut self,
            _parameters: ParameterSet,
            _config: &FitConfig,
        ) -> std::result::Result<FitOutput, String> {
            Err("training data missing".into())
        }

        fn evaluate(
            &mut self,
            _parameters: ParameterSet,
            _config: &EvaluateConfig,
        ) -> std::result::Result<EvaluateResult, String> {
            Err("no evaluation data".into())
        }
    }

    fn unit_params(value: f32) -> ParameterSet {
        ParameterSet::new(vec![ArrayD::from_elem(IxDyn(&[3]), value)])
    }

    #[tokio::test]
    async fn fit_round_trips_through_the_wire_format() {
        let (client, _worker) = spawn_channel_client(ClientId::new(1), PlusOne { samples: 12 });
        let update = client
            .fit(&unit_params(1.0), &FitConfig::new(RoundId::FIRST, 2))
            .await
            .unwrap();
        assert_eq!(update.sample_count, 12);
        assert_eq!(update.parameters, unit_params(2.0));
    }

    #[tokio::test]
    async fn evaluate_returns_the_client_report() {
        let (client, _worker) = spawn_channel_client(ClientId::new(1), PlusOne { samples: 5 });
        let result = client
            .evaluate(&unit_params(0.0), &EvaluateConfig::new(RoundId::FIRST))
            .await
            .unwrap();
        assert_eq!(result.loss, 0.25);
        assert_eq!(result.sample_count, 5);
    }

    #[tokio::test]
    async fn app_failures_surface_as_rejections() {
        let (client, _worker) = spawn_channel_client(ClientId::new(2), Broken);
        let err = client
            .fit(&unit_params(0.0), &FitConfig::new(RoundId::FIRST, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(msg) if msg.contains("training data missing")));
    }

    #[tokio::test]
    async fn dropped_worker_reports_channel_closed() {
        let (client, worker) = spawn_channel_client(ClientId::new(3), PlusOne { samples: 1 });
        worker.abort();
        let _ = worker.await;
        let err = client.get_parameters().await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed | Error::Timeout));
    }
}
