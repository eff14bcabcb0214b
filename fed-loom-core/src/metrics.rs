//! Metric maps and their reduction across client updates.
//!
//! Metric reduction is independent of the parameter aggregation rule: a
//! federation using the coordinate median for parameters still reduces
//! metrics with the sample-count-weighted mean unless configured otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::update::ClientUpdate;

/// Named scalar metrics. A `BTreeMap` keeps iteration deterministic for
/// logs and tests.
pub type Metrics = BTreeMap<String, f64>;

/// How to reduce one metric's per-client values into a round value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricReducer {
    /// Mean weighted by each client's sample count.
    #[default]
    WeightedMean,
    /// Unweighted mean.
    Mean,
    /// Sum across clients.
    Sum,
    /// Smallest reported value.
    Min,
    /// Largest reported value.
    Max,
}

impl MetricReducer {
    /// Reduce `(sample_count, value)` pairs into a single value.
    ///
    /// Returns `None` when no client reported the metric.
    pub fn reduce(&self, samples: &[(u64, f64)]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let value = match self {
            MetricReducer::WeightedMean => {
                let total: f64 = samples.iter().map(|(n, _)| *n as f64).sum();
                if total == 0.0 {
                    return None;
                }
                samples.iter().map(|(n, v)| (*n as f64) * v).sum::<f64>() / total
            }
            MetricReducer::Mean => {
                samples.iter().map(|(_, v)| v).sum::<f64>() / samples.len() as f64
            }
            MetricReducer::Sum => samples.iter().map(|(_, v)| v).sum(),
            MetricReducer::Min => samples.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min),
            MetricReducer::Max => samples
                .iter()
                .map(|(_, v)| *v)
                .fold(f64::NEG_INFINITY, f64::max),
        };
        Some(value)
    }
}

/// Per-metric reduction policy applied after every round.
#[derive(Debug, Clone, Default)]
pub struct MetricsPolicy {
    default: MetricReducer,
    overrides: BTreeMap<String, MetricReducer>,
}

impl MetricsPolicy {
    /// Policy reducing every metric with the given reducer.
    pub fn uniform(default: MetricReducer) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Override the reducer for one metric name.
    pub fn with_override(mut self, metric: impl Into<String>, reducer: MetricReducer) -> Self {
        self.overrides.insert(metric.into(), reducer);
        self
    }

    /// The reducer that applies to `metric`.
    pub fn reducer_for(&self, metric: &str) -> MetricReducer {
        self.overrides.get(metric).copied().unwrap_or(self.default)
    }

    /// Reduce the metrics of a round's updates into one map.
    ///
    /// The output contains every metric name reported by at least one
    /// update; clients that did not report a metric simply do not
    /// contribute to it.
    pub fn reduce(&self, updates: &[ClientUpdate]) -> Metrics {
        let mut names: Vec<&str> = updates
            .iter()
            .flat_map(|u| u.metrics.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut reduced = Metrics::new();
        for name in names {
            let samples: Vec<(u64, f64)> = updates
                .iter()
                .filter_map(|u| u.metrics.get(name).map(|v| (u.sample_count, *v)))
                .collect();
            if let Some(value) = self.reducer_for(name).reduce(&samples) {
                reduced.insert(name.to_string(), value);
            }
        }
        reduced
    }
}
