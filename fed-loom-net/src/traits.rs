//! Client transport traits and the coordinator-side client registry.

use std::sync::Arc;

use fed_loom_core::metrics::Metrics;
use fed_loom_core::{ClientId, ClientUpdate, ParameterSet, RoundId};

use crate::protocol::EvaluateResult;
use crate::Result;

/// Per-round training instruction, as seen by a client.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Round being trained
    pub round: RoundId,
    /// Number of local epochs to run
    pub local_epochs: u32,
    /// Free-form per-round configuration values
    pub extras: Metrics,
}

impl FitConfig {
    /// Instruction for one round with the given local epoch count.
    pub fn new(round: RoundId, local_epochs: u32) -> Self {
        Self {
            round,
            local_epochs,
            extras: Metrics::new(),
        }
    }
}

/// Per-round evaluation instruction, as seen by a client.
#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    /// Round being evaluated
    pub round: RoundId,
    /// Free-form per-round configuration values
    pub extras: Metrics,
}

impl EvaluateConfig {
    /// Instruction for one round.
    pub fn new(round: RoundId) -> Self {
        Self {
            round,
            extras: Metrics::new(),
        }
    }
}

/// The coordinator's handle to one federation participant.
///
/// Implementations own delivery and framing; the coordinator only sees
/// decoded results. Every method is cancel-safe from the coordinator's
/// side: dropping the future abandons the request and the client's work is
/// simply discarded.
#[async_trait::async_trait]
pub trait ClientProxy: Send + Sync {
    /// The participant's id.
    fn id(&self) -> ClientId;

    /// Fetch the client's current local parameters.
    ///
    /// Used to seed the global parameters when the coordinator starts
    /// without an initial set.
    async fn get_parameters(&self) -> Result<ParameterSet>;

    /// Train on local data starting from `parameters`.
    async fn fit(&self, parameters: &ParameterSet, config: &FitConfig) -> Result<ClientUpdate>;

    /// Evaluate `parameters` on the client's local evaluation data.
    async fn evaluate(
        &self,
        parameters: &ParameterSet,
        config: &EvaluateConfig,
    ) -> Result<EvaluateResult>;
}

/// The set of connected participants, as the coordinator sees it.
#[derive(Clone, Default)]
pub struct ClientPool {
    clients: Vec<Arc<dyn ClientProxy>>,
}

impl ClientPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant.
    pub fn register(&mut self, client: Arc<dyn ClientProxy>) {
        tracing::debug!(client = %client.id(), "client registered");
        self.clients.push(client);
    }

    /// Number of connected participants.
    pub fn available(&self) -> usize {
        self.clients.len()
    }

    /// Whether no participants are connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All participants, in registration order.
    pub fn clients(&self) -> &[Arc<dyn ClientProxy>] {
        &self.clients
    }

    /// Look up a participant by id.
    pub fn get(&self, id: ClientId) -> Option<&Arc<dyn ClientProxy>> {
        self.clients.iter().find(|c| c.id() == id)
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("available", &self.available())
            .field(
                "clients",
                &self.clients.iter().map(|c| c.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
