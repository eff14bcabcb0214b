//! Full-stack federation scenarios: real trainers behind the channel
//! transport, driven by the coordinator through the wire format.

use std::sync::Arc;

use fed_loom::prelude::*;
use fed_loom::{FederationConfig, RoundCoordinator, RoundStatus};

const HIDDEN_DIM: usize = 8;
const IMAGE_SHAPE: (usize, usize, usize) = (1, 2, 2);

fn training_pool(clients: usize, seed: u64) -> (ClientPool, Vec<tokio::task::JoinHandle<()>>) {
    let dataset = ImageDataset::synthetic(2, clients * 12, IMAGE_SHAPE, seed).unwrap();
    let mut pool = ClientPool::new();
    let mut workers = Vec::new();
    for (i, shard) in dataset.partition_even(clients).into_iter().enumerate() {
        let trainer = LocalTrainer::new(shard)
            .unwrap()
            .with_hidden_dim(HIDDEN_DIM)
            .with_learning_rate(0.1)
            .with_seed(seed);
        let (client, worker) =
            spawn_channel_client(ClientId::new(i as u64 + 1), TrainingClient::new(trainer));
        pool.register(Arc::new(client));
        workers.push(worker);
    }
    (pool, workers)
}

fn harness(seed: u64) -> EvaluationHarness {
    let test_set = ImageDataset::synthetic(2, 10, IMAGE_SHAPE, seed).unwrap();
    EvaluationHarness::new(test_set, HIDDEN_DIM).unwrap()
}

fn evaluate_fn(harness: EvaluationHarness) -> fed_loom::coordinator::EvaluateFn {
    Box::new(move |_, parameters| {
        let evaluation = harness.evaluate(parameters).ok()?;
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".into(), evaluation.accuracy);
        metrics.insert("macro_f1".into(), evaluation.macro_f1);
        Some((evaluation.loss, metrics))
    })
}

#[tokio::test]
async fn three_clients_complete_every_round_and_learn() {
    let (pool, _workers) = training_pool(3, 7);
    let config = FederationConfig::builder()
        .num_rounds(5)
        .local_epochs(3)
        .seed(7)
        .build()
        .unwrap();

    let mut coordinator = RoundCoordinator::new(config, pool)
        .unwrap()
        .with_evaluate_fn(evaluate_fn(harness(8)));
    coordinator.run().await.unwrap();

    let history = coordinator.history();
    assert_eq!(history.len(), 5);
    assert!(history.iter().all(|r| r.status == RoundStatus::Completed));
    assert!(history.iter().all(|r| r.responded == 3 && r.failures == 0));

    // Loss over the held-out set should improve across the federation.
    let first = history[0].evaluation.as_ref().unwrap().loss;
    let last = history[4].evaluation.as_ref().unwrap().loss;
    assert!(last < first, "no learning progress: {first} -> {last}");

    let accuracy = history[4].evaluation.as_ref().unwrap().metrics["accuracy"];
    assert!(accuracy >= 0.5, "final accuracy below chance: {accuracy}");
}

#[tokio::test]
async fn median_federation_completes_with_identical_shapes() {
    let (pool, _workers) = training_pool(3, 21);
    let config = FederationConfig::builder()
        .aggregation(AggregationRule::CoordinateMedian)
        .num_rounds(2)
        .seed(21)
        .build()
        .unwrap();

    let mut coordinator = RoundCoordinator::new(config, pool).unwrap();
    coordinator.run().await.unwrap();

    // Every aggregated set obeys the architecture contract of the trainers.
    let shapes = coordinator.global_parameters().unwrap().shapes();
    let input_dim = IMAGE_SHAPE.0 * IMAGE_SHAPE.1 * IMAGE_SHAPE.2;
    assert_eq!(
        shapes,
        vec![
            vec![HIDDEN_DIM, input_dim],
            vec![HIDDEN_DIM],
            vec![2, HIDDEN_DIM],
            vec![2]
        ]
    );
    assert_eq!(coordinator.report().completed_rounds(), 2);
}

#[tokio::test]
async fn identical_updates_leave_the_global_parameters_fixed() {
    use fed_loom_net::MockClient;
    use ndarray::{ArrayD, IxDyn};

    let shared = ParameterSet::new(vec![ArrayD::from_elem(IxDyn(&[3]), 2.5)]);
    let mut pool = ClientPool::new();
    for id in 1..=3 {
        pool.register(Arc::new(
            MockClient::new(ClientId::new(id)).with_fit_parameters(shared.clone()),
        ));
    }

    for rule in [AggregationRule::WeightedMean, AggregationRule::CoordinateMedian] {
        let config = FederationConfig::builder()
            .aggregation(rule)
            .num_rounds(2)
            .seed(1)
            .build()
            .unwrap();
        let mut coordinator = RoundCoordinator::new(config, pool.clone())
            .unwrap()
            .with_initial_parameters(shared.clone());
        coordinator.run().await.unwrap();
        assert_eq!(
            coordinator.global_parameters(),
            Some(&shared),
            "rule {}",
            rule.name()
        );
    }
}

#[tokio::test]
async fn one_dead_client_under_strict_quorum_never_mutates_the_model() {
    use fed_loom_net::MockClient;
    use ndarray::{ArrayD, IxDyn};

    let initial = ParameterSet::new(vec![ArrayD::from_elem(IxDyn(&[2]), 1.0)]);
    let moved = ParameterSet::new(vec![ArrayD::from_elem(IxDyn(&[2]), 5.0)]);

    let mut pool = ClientPool::new();
    pool.register(Arc::new(
        MockClient::new(ClientId::new(1)).with_fit_parameters(moved.clone()),
    ));
    pool.register(Arc::new(
        MockClient::new(ClientId::new(2)).with_fit_parameters(moved),
    ));
    pool.register(Arc::new(MockClient::new(ClientId::new(3)).failing("gone")));

    let config = FederationConfig::builder()
        .num_rounds(3)
        .min_fit_clients(3)
        .min_available_clients(3)
        .accept_failures(false)
        .seed(5)
        .build()
        .unwrap();
    let mut coordinator = RoundCoordinator::new(config, pool)
        .unwrap()
        .with_initial_parameters(initial.clone());
    coordinator.run().await.unwrap();

    assert!(coordinator
        .history()
        .iter()
        .all(|r| r.status == RoundStatus::Skipped));
    assert_eq!(coordinator.global_parameters(), Some(&initial));
}

#[tokio::test]
async fn report_round_trips_through_json() {
    let (pool, _workers) = training_pool(3, 33);
    let config = FederationConfig::builder()
        .num_rounds(1)
        .seed(33)
        .build()
        .unwrap();
    let mut coordinator = RoundCoordinator::new(config, pool)
        .unwrap()
        .with_evaluate_fn(evaluate_fn(harness(34)));
    coordinator.run().await.unwrap();

    let json = coordinator.report().to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["aggregation"], "weighted_mean");
    assert_eq!(parsed["rounds"][0]["status"], "completed");
    assert!(parsed["rounds"][0]["evaluation"]["loss"].is_f64());
}
