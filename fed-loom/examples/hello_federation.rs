//! Hello Federation Example
//!
//! Three in-process clients train a shared classifier for three rounds.

use std::sync::Arc;

use fed_loom::prelude::*;
use fed_loom::{FederationConfig, RoundCoordinator};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("FedLoom Hello Federation Example");
    println!("================================");

    // Synthetic data: three private shards plus a held-out test set.
    let training = ImageDataset::synthetic(2, 36, (1, 4, 4), 42)?;
    let test_set = ImageDataset::synthetic(2, 12, (1, 4, 4), 43)?;
    let harness = EvaluationHarness::new(test_set, 16)?;

    let mut pool = ClientPool::new();
    let mut workers = Vec::new();
    for (i, shard) in training.partition_even(3).into_iter().enumerate() {
        let trainer = LocalTrainer::new(shard)?.with_hidden_dim(16).with_seed(42);
        let (client, worker) =
            spawn_channel_client(ClientId::new(i as u64 + 1), TrainingClient::new(trainer));
        pool.register(Arc::new(client));
        workers.push(worker);
    }

    let config = FederationConfig::builder()
        .aggregation(AggregationRule::WeightedMean)
        .num_rounds(3)
        .seed(42)
        .build()?;

    let mut coordinator = RoundCoordinator::new(config, pool)?.with_evaluate_fn(Box::new(
        move |_, parameters| {
            let evaluation = harness.evaluate(parameters).ok()?;
            let mut metrics = Metrics::new();
            metrics.insert("accuracy".into(), evaluation.accuracy);
            Some((evaluation.loss, metrics))
        },
    ));
    coordinator.run().await?;

    for record in coordinator.history() {
        let accuracy = record
            .evaluation
            .as_ref()
            .and_then(|e| e.metrics.get("accuracy"))
            .copied()
            .unwrap_or(f64::NAN);
        println!(
            "round {}: {}, accuracy {accuracy:.3}",
            record.round, record.status
        );
    }

    println!("\nFederation finished!");
    Ok(())
}
