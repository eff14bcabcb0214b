//! The round lifecycle state machine.
//!
//! One coordinator drives rounds strictly in sequence:
//! `Idle → Selecting → Fitting → Aggregating → Evaluating → (Idle | Terminated)`.
//! Within a round, dispatch to the selected clients is concurrent, but the
//! collection phase is a barrier: aggregation never starts until every
//! selected client has returned an update or definitively failed. The
//! global `ParameterSet` is owned exclusively by the coordinator and
//! replaced atomically after a successful aggregation; a skipped or
//! degraded round leaves it untouched. Abandoned client work is not
//! interrupted, its results are simply discarded.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;

use fed_loom_core::aggregation::UpdateAggregator;
use fed_loom_core::metrics::{MetricReducer, Metrics};
use fed_loom_core::{ClientFailure, ClientUpdate, Error as CoreError, ParameterSet, RoundId};
use fed_loom_net::protocol::EvaluateResult;
use fed_loom_net::traits::{ClientPool, ClientProxy, EvaluateConfig, FitConfig};

use crate::config::FederationConfig;
use crate::history::{EvaluationRecord, FederationReport, RoundRecord, RoundStatus};
use crate::{FederationError, Result};

/// Centralized evaluation callback: given the round and the freshly
/// aggregated parameters, return a loss and metrics, or `None` when
/// evaluation is unavailable.
pub type EvaluateFn = Box<dyn Fn(RoundId, &ParameterSet) -> Option<(f64, Metrics)> + Send + Sync>;

/// Where the coordinator currently is in the round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Between rounds.
    Idle,
    /// Sampling clients from the available pool.
    Selecting,
    /// Waiting for every selected client to train or fail.
    Fitting,
    /// Combining the collected updates.
    Aggregating,
    /// Scoring the new global parameters.
    Evaluating,
    /// All rounds finished.
    Terminated,
}

/// Drives the federation: client selection, dispatch, aggregation, and
/// evaluation, round after round.
pub struct RoundCoordinator {
    config: FederationConfig,
    pool: ClientPool,
    aggregator: UpdateAggregator,
    rng: StdRng,
    phase: RoundPhase,
    global: Option<ParameterSet>,
    history: Vec<RoundRecord>,
    evaluate_fn: Option<EvaluateFn>,
}

impl RoundCoordinator {
    /// Create a coordinator over a client pool.
    pub fn new(config: FederationConfig, pool: ClientPool) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let aggregator = UpdateAggregator::new(config.aggregation)
            .with_accept_failures(config.strategy.accept_failures);
        Ok(Self {
            config,
            pool,
            aggregator,
            rng,
            phase: RoundPhase::Idle,
            global: None,
            history: Vec::new(),
            evaluate_fn: None,
        })
    }

    /// Start from these global parameters instead of asking a client.
    pub fn with_initial_parameters(mut self, parameters: ParameterSet) -> Self {
        self.global = Some(parameters);
        self
    }

    /// Install the centralized evaluation callback.
    pub fn with_evaluate_fn(mut self, evaluate: EvaluateFn) -> Self {
        self.evaluate_fn = Some(evaluate);
        self
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// The current global parameters, once initialized.
    pub fn global_parameters(&self) -> Option<&ParameterSet> {
        self.global.as_ref()
    }

    /// One record per executed round, in order.
    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Snapshot the history as a report.
    pub fn report(&self) -> FederationReport {
        FederationReport {
            aggregation: self.config.aggregation.name().to_string(),
            num_rounds: self.config.strategy.num_rounds,
            rounds: self.history.clone(),
        }
    }

    /// Run the configured number of rounds to completion.
    ///
    /// Per-round problems (too few clients, client failures, degraded
    /// aggregation) are recorded in the history and the federation
    /// continues. Structural parameter mismatches are fatal and abort.
    pub async fn run(&mut self) -> Result<()> {
        if self.pool.is_empty() {
            return Err(FederationError::NoClients);
        }
        self.ensure_initialized().await?;

        for round in 1..=self.config.strategy.num_rounds {
            let id = RoundId(round);
            tracing::info!(round, "round starting");
            self.run_round(id).await?;
            self.phase = RoundPhase::Idle;
        }

        self.phase = RoundPhase::Terminated;
        tracing::info!(
            rounds = self.history.len(),
            completed = self
                .history
                .iter()
                .filter(|r| r.status == RoundStatus::Completed)
                .count(),
            "federation finished"
        );
        Ok(())
    }

    /// Seed the global parameters from the first client that can supply
    /// them when none were given up front.
    async fn ensure_initialized(&mut self) -> Result<()> {
        if self.global.is_some() {
            return Ok(());
        }
        let mut last_error = String::from("no clients answered");
        for client in self.pool.clients() {
            match client.get_parameters().await {
                Ok(parameters) => {
                    tracing::info!(client = %client.id(), "seeded global parameters");
                    self.global = Some(parameters);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(client = %client.id(), error = %err, "initial parameters unavailable");
                    last_error = err.to_string();
                }
            }
        }
        Err(FederationError::InitialParameters(last_error))
    }

    async fn run_round(&mut self, round: RoundId) -> Result<()> {
        self.phase = RoundPhase::Selecting;
        let strategy = self.config.strategy.clone();
        let available = self.pool.available();
        if available < strategy.min_available_clients {
            tracing::warn!(
                round = round.0,
                available,
                needed = strategy.min_available_clients,
                "not enough clients connected, skipping round"
            );
            let reason = CoreError::InsufficientClients {
                needed: strategy.min_available_clients,
                available,
            };
            self.history
                .push(RoundRecord::skipped(round.0, reason.to_string()));
            return Ok(());
        }

        let sample_size = strategy.fit_sample_size(available);
        if sample_size < strategy.min_fit_clients {
            let reason = CoreError::InsufficientClients {
                needed: strategy.min_fit_clients,
                available,
            };
            self.history
                .push(RoundRecord::skipped(round.0, reason.to_string()));
            return Ok(());
        }
        let selected = self.select_clients(sample_size);
        tracing::debug!(round = round.0, selected = selected.len(), available, "clients selected");

        self.phase = RoundPhase::Fitting;
        let global = self
            .global
            .clone()
            .ok_or_else(|| FederationError::InitialParameters("not initialized".into()))?;
        let (updates, failures) = dispatch_fit(
            &selected,
            global,
            round,
            self.config.local_epochs,
            self.config.round_timeout,
        )
        .await;

        if updates.len() < strategy.min_fit_clients {
            tracing::warn!(
                round = round.0,
                responded = updates.len(),
                needed = strategy.min_fit_clients,
                "too few successful updates, skipping round"
            );
            self.history.push(RoundRecord {
                round: round.0,
                status: RoundStatus::Skipped,
                selected: selected.len(),
                responded: updates.len(),
                failures: failures.len(),
                fit_metrics: Metrics::new(),
                evaluation: None,
                reason: Some(
                    CoreError::InsufficientClients {
                        needed: strategy.min_fit_clients,
                        available: updates.len(),
                    }
                    .to_string(),
                ),
            });
            return Ok(());
        }

        self.phase = RoundPhase::Aggregating;
        // Structural mismatches abort the federation here.
        let outcome = self.aggregator.aggregate(round, &updates, &failures)?;
        let fit_metrics = outcome.metrics.clone();
        let status = match outcome.parameters {
            Some(new_global) => {
                self.global = Some(new_global);
                RoundStatus::Completed
            }
            None => {
                tracing::warn!(round = round.0, "aggregation produced no update, round degraded");
                RoundStatus::Degraded
            }
        };

        self.phase = RoundPhase::Evaluating;
        let evaluation = if status == RoundStatus::Completed {
            self.evaluate_round(round).await
        } else {
            None
        };

        tracing::info!(
            round = round.0,
            status = %status,
            responded = updates.len(),
            failures = failures.len(),
            loss = evaluation.as_ref().map(|e| e.loss),
            "round finished"
        );
        self.history.push(RoundRecord {
            round: round.0,
            status,
            selected: selected.len(),
            responded: updates.len(),
            failures: failures.len(),
            fit_metrics,
            evaluation,
            reason: None,
        });
        Ok(())
    }

    fn select_clients(&mut self, count: usize) -> Vec<Arc<dyn ClientProxy>> {
        let clients = self.pool.clients();
        rand::seq::index::sample(&mut self.rng, clients.len(), count.min(clients.len()))
            .iter()
            .map(|i| clients[i].clone())
            .collect()
    }

    async fn evaluate_round(&mut self, round: RoundId) -> Option<EvaluationRecord> {
        let global = self.global.clone()?;

        let mut record = None;
        if let Some(evaluate) = &self.evaluate_fn {
            if let Some((loss, metrics)) = evaluate(round, &global) {
                record = Some(EvaluationRecord { loss, metrics });
            }
        }

        // Distributed evaluation, off by default (the reference clients
        // answer with placeholders; evaluation is centralized).
        let strategy = &self.config.strategy;
        if strategy.fraction_evaluate > 0.0 {
            let available = self.pool.available();
            let sample_size = strategy.evaluate_sample_size(available);
            if sample_size < strategy.min_evaluate_clients {
                tracing::warn!(round = round.0, available, "too few clients for distributed evaluation");
                return record;
            }
            let min_evaluate = strategy.min_evaluate_clients;
            let selected = self.select_clients(sample_size);
            let results =
                dispatch_evaluate(&selected, global, round, self.config.round_timeout).await;
            if results.len() < min_evaluate {
                tracing::warn!(
                    round = round.0,
                    responded = results.len(),
                    needed = min_evaluate,
                    "distributed evaluation below quorum, discarding"
                );
                return record;
            }
            let pairs: Vec<(u64, f64)> = results.iter().map(|r| (r.sample_count, r.loss)).collect();
            if let Some(loss) = MetricReducer::WeightedMean.reduce(&pairs) {
                let record = record.get_or_insert(EvaluationRecord {
                    loss,
                    metrics: Metrics::new(),
                });
                record.metrics.insert("distributed_loss".into(), loss);
                record
                    .metrics
                    .insert("evaluate_clients".into(), results.len() as f64);
            }
        }

        record
    }
}

/// Dispatch a fit instruction to every selected client and wait for the
/// full set to respond or fail. This is the round's synchronization
/// barrier.
async fn dispatch_fit(
    clients: &[Arc<dyn ClientProxy>],
    global: ParameterSet,
    round: RoundId,
    local_epochs: u32,
    timeout: Duration,
) -> (Vec<ClientUpdate>, Vec<ClientFailure>) {
    let mut tasks = JoinSet::new();
    for client in clients {
        let client = client.clone();
        let parameters = global.clone();
        let config = FitConfig::new(round, local_epochs);
        tasks.spawn(async move {
            let id = client.id();
            let outcome = match tokio::time::timeout(timeout, client.fit(&parameters, &config)).await
            {
                Ok(Ok(update)) => Ok(update),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err("fit timed out".to_string()),
            };
            (id, outcome)
        });
    }

    let mut updates = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(update))) => {
                if update.is_valid() {
                    updates.push(update);
                } else {
                    tracing::warn!(client = %id, "update with zero sample count excluded");
                    failures.push(ClientFailure::new(id, round, "zero sample count"));
                }
            }
            Ok((id, Err(reason))) => {
                tracing::warn!(client = %id, %reason, "client failed to fit");
                failures.push(ClientFailure::new(id, round, reason));
            }
            Err(join_error) => {
                // The task itself died, so the client id is lost.
                failures.push(ClientFailure::new(
                    fed_loom_net::protocol::COORDINATOR_ID,
                    round,
                    format!("dispatch task failed: {join_error}"),
                ));
            }
        }
    }
    (updates, failures)
}

/// Dispatch an evaluate instruction to the selected clients; failures are
/// logged and dropped, only successful reports are returned.
async fn dispatch_evaluate(
    clients: &[Arc<dyn ClientProxy>],
    global: ParameterSet,
    round: RoundId,
    timeout: Duration,
) -> Vec<EvaluateResult> {
    let mut tasks = JoinSet::new();
    for client in clients {
        let client = client.clone();
        let parameters = global.clone();
        let config = EvaluateConfig::new(round);
        tasks.spawn(async move {
            let id = client.id();
            let outcome =
                match tokio::time::timeout(timeout, client.evaluate(&parameters, &config)).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err("evaluate timed out".to_string()),
                };
            (id, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(result))) => results.push(result),
            Ok((id, Err(reason))) => {
                tracing::warn!(client = %id, %reason, "client failed to evaluate");
            }
            Err(join_error) => {
                tracing::warn!(error = %join_error, "evaluate dispatch task failed");
            }
        }
    }
    results
}
