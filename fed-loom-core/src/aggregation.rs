//! Round aggregation: sample-weighted mean and coordinate-wise median.
//!
//! Both rules combine a round's [`ClientUpdate`]s into one global
//! [`ParameterSet`]. The weighted mean reflects each client's contribution
//! proportionally to its local dataset size; the coordinate median ignores
//! sample counts and instead tolerates a minority of arbitrarily corrupted
//! updates, at the cost of a per-coordinate sort.
//!
//! The rule is fixed once at federation startup; there is no per-call
//! dispatch.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::MetricsPolicy;
use crate::params::ParameterSet;
use crate::update::{ClientFailure, ClientUpdate, RoundId, RoundOutcome};

/// Parameter aggregation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRule {
    /// Sample-count-weighted elementwise mean (no Byzantine protection).
    #[default]
    WeightedMean,
    /// Elementwise median across updates, ignoring sample counts.
    CoordinateMedian,
}

impl AggregationRule {
    /// Short name for logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            AggregationRule::WeightedMean => "weighted_mean",
            AggregationRule::CoordinateMedian => "coordinate_median",
        }
    }

}

impl std::str::FromStr for AggregationRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" | "weighted_mean" | "fedavg" => Ok(AggregationRule::WeightedMean),
            "median" | "coordinate_median" | "fedmedian" => Ok(AggregationRule::CoordinateMedian),
            other => Err(Error::InvalidConfig(format!(
                "unknown aggregation rule: {other}"
            ))),
        }
    }
}

/// Aggregates a round's updates under a fixed rule and failure policy.
#[derive(Debug, Clone, Default)]
pub struct UpdateAggregator {
    rule: AggregationRule,
    accept_failures: bool,
    metrics: MetricsPolicy,
}

impl UpdateAggregator {
    /// Create an aggregator with the given rule, accepting failures and
    /// reducing metrics by sample-count-weighted mean.
    pub fn new(rule: AggregationRule) -> Self {
        Self {
            rule,
            accept_failures: true,
            metrics: MetricsPolicy::default(),
        }
    }

    /// Set whether rounds with recorded client failures may still aggregate.
    pub fn with_accept_failures(mut self, accept: bool) -> Self {
        self.accept_failures = accept;
        self
    }

    /// Replace the metric reduction policy.
    ///
    /// Metric reduction is independent of the parameter rule: the
    /// coordinate median still reduces metrics by weighted mean unless this
    /// policy says otherwise.
    pub fn with_metrics_policy(mut self, policy: MetricsPolicy) -> Self {
        self.metrics = policy;
        self
    }

    /// The configured rule.
    pub fn rule(&self) -> AggregationRule {
        self.rule
    }

    /// Whether rounds with failures may still aggregate.
    pub fn accepts_failures(&self) -> bool {
        self.accept_failures
    }

    /// Combine a round's updates into new global parameters and metrics.
    ///
    /// Returns an outcome with `parameters: None` when the round produced
    /// nothing to install: no updates at all, or failures present while the
    /// policy rejects them. Callers must then keep the previous global
    /// parameters.
    ///
    /// A layer-count or shape disagreement between updates is an
    /// architecture mismatch and fails fatally instead of being dropped.
    pub fn aggregate(
        &self,
        round: RoundId,
        updates: &[ClientUpdate],
        failures: &[ClientFailure],
    ) -> Result<RoundOutcome> {
        if updates.is_empty() {
            tracing::warn!(round = round.0, "no updates to aggregate");
            return Ok(RoundOutcome::empty());
        }
        if !self.accept_failures && !failures.is_empty() {
            tracing::warn!(
                round = round.0,
                failures = failures.len(),
                "failures present under strict policy, discarding round"
            );
            return Ok(RoundOutcome::empty());
        }

        validate_updates(updates)?;

        let parameters = match self.rule {
            AggregationRule::WeightedMean => weighted_mean(updates)?,
            AggregationRule::CoordinateMedian => coordinate_median(updates)?,
        };
        let metrics = self.metrics.reduce(updates);

        tracing::debug!(
            round = round.0,
            rule = self.rule.name(),
            clients = updates.len(),
            layers = parameters.layer_count(),
            "aggregated round"
        );

        Ok(RoundOutcome {
            parameters: Some(parameters),
            metrics,
        })
    }
}

/// Check that every update is weightable and structurally identical to the
/// first one.
fn validate_updates(updates: &[ClientUpdate]) -> Result<()> {
    let expected = updates[0].parameters.shapes();
    for (index, update) in updates.iter().enumerate() {
        if update.sample_count == 0 {
            return Err(Error::InvalidSampleCount { index });
        }
        update.parameters.validate_matches(&expected)?;
    }
    Ok(())
}

/// Sample-count-weighted elementwise mean across updates.
///
/// Accumulates in `f64` and rounds to `f32` once per coordinate, which
/// keeps long weighted sums from drifting.
fn weighted_mean(updates: &[ClientUpdate]) -> Result<ParameterSet> {
    let total: f64 = updates.iter().map(|u| u.sample_count as f64).sum();
    let weights: Vec<f64> = updates
        .iter()
        .map(|u| u.sample_count as f64 / total)
        .collect();

    let per_update: Vec<Vec<&[f32]>> = updates
        .iter()
        .map(|u| u.parameters.layer_slices())
        .collect::<Result<_>>()?;
    let shapes = updates[0].parameters.shapes();

    let mut layers = Vec::with_capacity(shapes.len());
    for (layer, shape) in shapes.iter().enumerate() {
        let mut acc = vec![0.0_f64; per_update[0][layer].len()];
        for (slices, weight) in per_update.iter().zip(&weights) {
            for (sum, &value) in acc.iter_mut().zip(slices[layer]) {
                *sum += weight * f64::from(value);
            }
        }
        let data: Vec<f32> = acc.into_iter().map(|v| v as f32).collect();
        layers.push(ndarray::ArrayD::from_shape_vec(
            ndarray::IxDyn(shape),
            data,
        )?);
    }
    Ok(ParameterSet::new(layers))
}

/// Elementwise median across updates, layer by layer.
///
/// Conceptually stacks each layer along a new leading axis and takes the
/// median down that axis; implemented as a parallel per-coordinate sort.
/// With an even update count the median is the midpoint of the two central
/// values.
fn coordinate_median(updates: &[ClientUpdate]) -> Result<ParameterSet> {
    let n = updates.len();
    let per_update: Vec<Vec<&[f32]>> = updates
        .iter()
        .map(|u| u.parameters.layer_slices())
        .collect::<Result<_>>()?;
    let shapes = updates[0].parameters.shapes();

    let mut layers = Vec::with_capacity(shapes.len());
    for (layer, shape) in shapes.iter().enumerate() {
        let columns: Vec<&[f32]> = per_update.iter().map(|slices| slices[layer]).collect();
        let mut data = vec![0.0_f32; columns[0].len()];
        data.par_iter_mut().enumerate().for_each(|(i, out)| {
            let mut values: Vec<f32> = columns.iter().map(|c| c[i]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            *out = if n % 2 == 0 {
                (values[n / 2 - 1] + values[n / 2]) / 2.0
            } else {
                values[n / 2]
            };
        });
        layers.push(ndarray::ArrayD::from_shape_vec(
            ndarray::IxDyn(shape),
            data,
        )?);
    }
    Ok(ParameterSet::new(layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(values: &[f32]) -> ParameterSet {
        ParameterSet::new(vec![ndarray::ArrayD::from_shape_vec(
            ndarray::IxDyn(&[values.len()]),
            values.to_vec(),
        )
        .unwrap()])
    }

    fn update(values: &[f32], samples: u64) -> ClientUpdate {
        ClientUpdate::new(params(values), samples)
    }

    fn values(outcome: &RoundOutcome) -> Vec<f32> {
        outcome
            .parameters
            .as_ref()
            .unwrap()
            .layer_slices()
            .unwrap()[0]
            .to_vec()
    }

    #[test]
    fn mean_weights_by_sample_count() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[update(&[0.0, 0.0], 1), update(&[1.0, 1.0], 3)],
                &[],
            )
            .unwrap();
        assert_eq!(values(&outcome), vec![0.75, 0.75]);
    }

    #[test]
    fn equal_sample_counts_reduce_to_unweighted_mean() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[
                    update(&[1.0], 10),
                    update(&[2.0], 10),
                    update(&[3.0], 10),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(values(&outcome), vec![2.0]);
    }

    #[test]
    fn single_update_passes_through_unchanged() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let original = update(&[0.1, -2.5, 7.25], 4);
        let outcome = aggregator
            .aggregate(RoundId::FIRST, std::slice::from_ref(&original), &[])
            .unwrap();
        assert_eq!(outcome.parameters.unwrap(), original.parameters);
    }

    #[test]
    fn median_resists_an_outlier() {
        let aggregator = UpdateAggregator::new(AggregationRule::CoordinateMedian);
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[
                    update(&[1.0, 1.0, 1.0], 10),
                    update(&[1.0, 1.0, 9.0], 10),
                    update(&[1.0, 1.0, 100.0], 10),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(values(&outcome), vec![1.0, 1.0, 9.0]);
    }

    #[test]
    fn median_midpoints_an_even_count() {
        let aggregator = UpdateAggregator::new(AggregationRule::CoordinateMedian);
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[
                    update(&[1.0], 1),
                    update(&[2.0], 1),
                    update(&[10.0], 1),
                    update(&[11.0], 1),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(values(&outcome), vec![6.0]);
    }

    #[test]
    fn identical_updates_return_the_same_parameters() {
        let shared = params(&[0.3, -1.7, 42.0]);
        let updates: Vec<ClientUpdate> = (0..3)
            .map(|_| ClientUpdate::new(shared.clone(), 10))
            .collect();

        for rule in [AggregationRule::WeightedMean, AggregationRule::CoordinateMedian] {
            let outcome = UpdateAggregator::new(rule)
                .aggregate(RoundId::FIRST, &updates, &[])
                .unwrap();
            assert_eq!(outcome.parameters.unwrap(), shared, "rule {}", rule.name());
        }
    }

    #[test]
    fn output_preserves_layer_count_and_shapes() {
        let multi = ParameterSet::new(vec![
            array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn(),
            array![5.0_f32, 6.0].into_dyn(),
        ]);
        let updates = vec![
            ClientUpdate::new(multi.clone(), 2),
            ClientUpdate::new(multi.clone(), 5),
        ];

        for rule in [AggregationRule::WeightedMean, AggregationRule::CoordinateMedian] {
            let outcome = UpdateAggregator::new(rule)
                .aggregate(RoundId::FIRST, &updates, &[])
                .unwrap();
            let aggregated = outcome.parameters.unwrap();
            assert_eq!(aggregated.shapes(), multi.shapes(), "rule {}", rule.name());
        }
    }

    #[test]
    fn empty_round_produces_no_parameters() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let outcome = aggregator.aggregate(RoundId::FIRST, &[], &[]).unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.metrics.is_empty());
    }

    #[test]
    fn strict_policy_discards_rounds_with_failures() {
        use crate::update::{ClientFailure, ClientId};

        let aggregator =
            UpdateAggregator::new(AggregationRule::CoordinateMedian).with_accept_failures(false);
        let failure = ClientFailure::new(ClientId::new(2), RoundId::FIRST, "timeout");
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[update(&[1.0], 10), update(&[2.0], 10)],
                &[failure],
            )
            .unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.metrics.is_empty());
    }

    #[test]
    fn lenient_policy_aggregates_despite_failures() {
        use crate::update::{ClientFailure, ClientId};

        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let failure = ClientFailure::new(ClientId::new(9), RoundId::FIRST, "connection reset");
        let outcome = aggregator
            .aggregate(
                RoundId::FIRST,
                &[update(&[2.0], 1), update(&[4.0], 1)],
                &[failure],
            )
            .unwrap();
        assert_eq!(values(&outcome), vec![3.0]);
    }

    #[test]
    fn layer_count_mismatch_is_fatal() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let two_layers = ClientUpdate::new(
            ParameterSet::new(vec![
                array![1.0_f32].into_dyn(),
                array![2.0_f32].into_dyn(),
            ]),
            1,
        );
        let err = aggregator
            .aggregate(RoundId::FIRST, &[update(&[1.0], 1), two_layers], &[])
            .unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let aggregator = UpdateAggregator::new(AggregationRule::CoordinateMedian);
        let err = aggregator
            .aggregate(
                RoundId::FIRST,
                &[update(&[1.0, 2.0], 1), update(&[1.0], 1)],
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_sample_count_is_rejected() {
        let aggregator = UpdateAggregator::new(AggregationRule::WeightedMean);
        let err = aggregator
            .aggregate(
                RoundId::FIRST,
                &[update(&[1.0], 3), update(&[2.0], 0)],
                &[],
            )
            .unwrap_err();
        assert_eq!(err, Error::InvalidSampleCount { index: 1 });
    }

    #[test]
    fn metrics_stay_weighted_mean_under_the_median_rule() {
        let aggregator = UpdateAggregator::new(AggregationRule::CoordinateMedian);
        let updates = [
            update(&[1.0], 1).with_metric("train_loss", 0.0),
            update(&[2.0], 3).with_metric("train_loss", 1.0),
        ];
        let outcome = aggregator.aggregate(RoundId::FIRST, &updates, &[]).unwrap();
        assert_eq!(outcome.metrics.get("train_loss"), Some(&0.75));
    }

    #[test]
    fn rule_parses_from_config_strings() {
        assert_eq!(
            "median".parse::<AggregationRule>().unwrap(),
            AggregationRule::CoordinateMedian
        );
        assert_eq!(
            "fedavg".parse::<AggregationRule>().unwrap(),
            AggregationRule::WeightedMean
        );
        assert!("krum".parse::<AggregationRule>().is_err());
    }
}
