//! Per-round history and the final federation report.
//!
//! The coordinator only needs the current global parameters to run, but it
//! keeps one record per round so every round can report an explicit
//! completed, skipped, or degraded status; a silent round is never
//! allowed. The report serializes to JSON for the simulator's export.

use std::fmt;

use serde::Serialize;

use fed_loom_core::metrics::Metrics;

/// What a round produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// New global parameters were installed.
    Completed,
    /// The round never reached aggregation; parameters unchanged.
    Skipped,
    /// Aggregation ran but produced no update; parameters unchanged.
    Degraded,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStatus::Completed => "completed",
            RoundStatus::Skipped => "skipped",
            RoundStatus::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Evaluation results recorded for one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    /// Loss of the aggregated parameters (centralized when available,
    /// otherwise the weighted distributed loss).
    pub loss: f64,
    /// Additional evaluation metrics (accuracy, macro F1, ...).
    pub metrics: Metrics,
}

/// One round's outcome, as kept in the coordinator's history.
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    /// Round number, 1-based.
    pub round: u64,
    /// What the round produced.
    pub status: RoundStatus,
    /// Clients selected for training.
    pub selected: usize,
    /// Clients that returned a usable update.
    pub responded: usize,
    /// Clients that failed or timed out.
    pub failures: usize,
    /// Aggregated training metrics.
    pub fit_metrics: Metrics,
    /// Evaluation of the new global parameters, when one ran.
    pub evaluation: Option<EvaluationRecord>,
    /// Why the round was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RoundRecord {
    /// A record for a round that never reached aggregation.
    pub fn skipped(round: u64, reason: impl Into<String>) -> Self {
        Self {
            round,
            status: RoundStatus::Skipped,
            selected: 0,
            responded: 0,
            failures: 0,
            fit_metrics: Metrics::new(),
            evaluation: None,
            reason: Some(reason.into()),
        }
    }
}

/// The full per-round history plus the federation's fixed settings.
#[derive(Debug, Clone, Serialize)]
pub struct FederationReport {
    /// Name of the aggregation rule used.
    pub aggregation: String,
    /// Configured round count.
    pub num_rounds: u64,
    /// One record per executed round, in order.
    pub rounds: Vec<RoundRecord>,
}

impl FederationReport {
    /// Rounds that installed new global parameters.
    pub fn completed_rounds(&self) -> usize {
        self.rounds
            .iter()
            .filter(|r| r.status == RoundStatus::Completed)
            .count()
    }

    /// The last recorded evaluation, if any round evaluated.
    pub fn final_evaluation(&self) -> Option<&EvaluationRecord> {
        self.rounds.iter().rev().find_map(|r| r.evaluation.as_ref())
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(round: u64, loss: f64) -> RoundRecord {
        RoundRecord {
            round,
            status: RoundStatus::Completed,
            selected: 3,
            responded: 3,
            failures: 0,
            fit_metrics: Metrics::new(),
            evaluation: Some(EvaluationRecord {
                loss,
                metrics: Metrics::new(),
            }),
            reason: None,
        }
    }

    #[test]
    fn report_summarizes_round_statuses() {
        let report = FederationReport {
            aggregation: "weighted_mean".into(),
            num_rounds: 3,
            rounds: vec![
                completed(1, 0.9),
                RoundRecord::skipped(2, "insufficient clients"),
                completed(3, 0.4),
            ],
        };
        assert_eq!(report.completed_rounds(), 2);
        assert_eq!(report.final_evaluation().map(|e| e.loss), Some(0.4));
    }

    #[test]
    fn json_export_keeps_round_order_and_drops_empty_reasons() {
        let report = FederationReport {
            aggregation: "coordinate_median".into(),
            num_rounds: 2,
            rounds: vec![completed(1, 0.5), RoundRecord::skipped(2, "no quorum")],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"coordinate_median\""));
        assert!(json.contains("\"skipped\""));
        assert!(json.contains("no quorum"));
        // Completed rounds carry no reason field at all.
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["rounds"][0].get("reason").is_none());
    }
}
