//! In-process federation simulator.
//!
//! Builds a synthetic image dataset, partitions it across N channel-served
//! clients, runs the configured number of rounds, prints a per-round
//! table, and optionally writes the history as JSON.
//!
//! Configuration comes from `FED_LOOM_*` environment variables (rounds,
//! aggregation rule, participation minimums); additionally:
//! `FED_LOOM_CLIENTS` sets the client count and `FED_LOOM_HISTORY_OUT`
//! writes the report JSON to a file.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fed_loom::prelude::*;
use fed_loom::{EnvOverrides, FederationConfig, RoundCoordinator};

const HIDDEN_DIM: usize = 16;
const IMAGE_SHAPE: (usize, usize, usize) = (1, 4, 4);
const CLASS_COUNT: usize = 2;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EnvOverrides::from_env()?.apply(FederationConfig::default())?;
    let client_count: usize = std::env::var("FED_LOOM_CLIENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    let seed = config.seed.unwrap_or(42);

    tracing::info!(
        clients = client_count,
        rounds = config.strategy.num_rounds,
        rule = config.aggregation.name(),
        "simulator starting"
    );

    // Private training shards, one per client, plus a held-out test set.
    let training = ImageDataset::synthetic(CLASS_COUNT, client_count * 24, IMAGE_SHAPE, seed)?;
    let test_set = ImageDataset::synthetic(CLASS_COUNT, 16, IMAGE_SHAPE, seed + 1)?;
    let harness = EvaluationHarness::new(test_set, HIDDEN_DIM)?;

    let mut pool = ClientPool::new();
    let mut workers = Vec::new();
    for (i, shard) in training.partition_even(client_count).into_iter().enumerate() {
        let trainer = LocalTrainer::new(shard)?
            .with_hidden_dim(HIDDEN_DIM)
            .with_seed(seed);
        let (client, worker) =
            spawn_channel_client(ClientId::new(i as u64 + 1), TrainingClient::new(trainer));
        pool.register(Arc::new(client));
        workers.push(worker);
    }

    let mut coordinator = RoundCoordinator::new(config, pool)?.with_evaluate_fn(Box::new(
        move |round, parameters| match harness.evaluate(parameters) {
            Ok(evaluation) => {
                let mut metrics = Metrics::new();
                metrics.insert("accuracy".into(), evaluation.accuracy);
                metrics.insert("macro_f1".into(), evaluation.macro_f1);
                Some((evaluation.loss, metrics))
            }
            Err(err) => {
                tracing::warn!(round = round.0, error = %err, "centralized evaluation failed");
                None
            }
        },
    ));
    coordinator.run().await?;

    let report = coordinator.report();
    print_report(&report);

    if let Ok(path) = std::env::var("FED_LOOM_HISTORY_OUT") {
        std::fs::write(&path, report.to_json()?)?;
        println!("history written to {path}");
    }

    Ok(())
}

fn print_report(report: &FederationReport) {
    println!();
    println!("federation report (rule: {})", report.aggregation);
    println!("{:>5}  {:>9}  {:>7}/{:<3}  {:>10}  {:>9}  {:>9}", "round", "status", "ok", "sel", "loss", "accuracy", "macro_f1");
    for record in &report.rounds {
        let (loss, accuracy, macro_f1) = match &record.evaluation {
            Some(eval) => (
                format!("{:.4}", eval.loss),
                eval.metrics
                    .get("accuracy")
                    .map_or_else(|| "-".into(), |v| format!("{v:.4}")),
                eval.metrics
                    .get("macro_f1")
                    .map_or_else(|| "-".into(), |v| format!("{v:.4}")),
            ),
            None => ("-".into(), "-".into(), "-".into()),
        };
        println!(
            "{:>5}  {:>9}  {:>7}/{:<3}  {:>10}  {:>9}  {:>9}",
            record.round, record.status, record.responded, record.selected, loss, accuracy, macro_f1
        );
    }
    println!(
        "completed {}/{} rounds",
        report.completed_rounds(),
        report.rounds.len()
    );
}
