//! Centralized evaluation of aggregated parameters.
//!
//! The coordinator hands the harness a freshly aggregated `ParameterSet`;
//! the harness decodes it into a new model instance (the input is never
//! mutated), runs a forward pass over every test batch, and reports mean
//! loss, raw accuracy, and macro-averaged F1.

use fed_loom_core::codec::ParameterCodec;
use fed_loom_core::params::ParameterSet;

use crate::dataset::ImageDataset;
use crate::dense::DenseClassifier;
use crate::{ModelError, Result};

/// Scores from one evaluation pass over the held-out test set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Mean cross-entropy loss per sample.
    pub loss: f64,
    /// Fraction of correctly predicted samples.
    pub accuracy: f64,
    /// F1 averaged uniformly over all classes the harness knows.
    pub macro_f1: f64,
    /// Number of samples evaluated.
    pub sample_count: u64,
}

/// Evaluates parameter sets against a fixed held-out test set.
#[derive(Debug, Clone)]
pub struct EvaluationHarness {
    test_set: ImageDataset,
    hidden_dim: usize,
    batch_size: usize,
}

impl EvaluationHarness {
    /// Create a harness over a non-empty test set.
    ///
    /// `hidden_dim` must match the federation's model architecture; a
    /// mismatch surfaces as a shape error on the first evaluation.
    pub fn new(test_set: ImageDataset, hidden_dim: usize) -> Result<Self> {
        if test_set.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        Ok(Self {
            test_set,
            hidden_dim,
            batch_size: 4,
        })
    }

    /// Replace the evaluation batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Number of classes in the test set.
    pub fn class_count(&self) -> usize {
        self.test_set.class_count()
    }

    /// Score `parameters` over the full test set.
    pub fn evaluate(&self, parameters: &ParameterSet) -> Result<Evaluation> {
        let mut model = DenseClassifier::new(
            self.test_set.input_dim(),
            self.hidden_dim,
            self.test_set.class_count(),
            0,
        );
        model.import_parameters(parameters)?;

        let mut loss_sum = 0.0_f64;
        let mut predictions = Vec::with_capacity(self.test_set.len());
        let mut truth = Vec::with_capacity(self.test_set.len());
        for (features, labels) in self.test_set.batches(self.batch_size) {
            loss_sum += model.batch_loss(&features, labels)? * labels.len() as f64;
            predictions.extend(model.predict(&features)?);
            truth.extend_from_slice(labels);
        }

        let total = truth.len();
        let evaluation = Evaluation {
            loss: loss_sum / total as f64,
            accuracy: accuracy(&predictions, &truth),
            macro_f1: macro_f1(&predictions, &truth, self.test_set.class_count()),
            sample_count: total as u64,
        };
        tracing::debug!(
            loss = evaluation.loss,
            accuracy = evaluation.accuracy,
            macro_f1 = evaluation.macro_f1,
            samples = total,
            "evaluated global parameters"
        );
        Ok(evaluation)
    }
}

/// Fraction of positions where prediction and label agree.
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count();
    correct as f64 / labels.len() as f64
}

/// Macro-averaged F1 over `class_count` classes.
///
/// Per class: precision and recall with zero-guarded divisions, F1 = 0 when
/// both are zero. The average runs over every class the harness knows, so a
/// class absent from both predictions and labels contributes 0, matching
/// scikit-learn with an explicit label set.
pub fn macro_f1(predictions: &[usize], labels: &[usize], class_count: usize) -> f64 {
    if class_count == 0 {
        return 0.0;
    }
    let mut f1_sum = 0.0_f64;
    for class in 0..class_count {
        let tp = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| **p == class && **l == class)
            .count() as f64;
        let fp = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| **p == class && **l != class)
            .count() as f64;
        let fn_ = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| **p != class && **l == class)
            .count() as f64;

        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        if precision + recall > 0.0 {
            f1_sum += 2.0 * precision * recall / (precision + recall);
        }
    }
    f1_sum / class_count as f64
}
