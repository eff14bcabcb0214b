//! The local training loop run by each participant.

use fed_loom_core::codec::ParameterCodec;
use fed_loom_core::metrics::Metrics;
use fed_loom_core::params::ParameterSet;

use crate::dataset::ImageDataset;
use crate::dense::DenseClassifier;
use crate::{ModelError, Result};

/// Default hidden layer width of the locally trained classifier.
const DEFAULT_HIDDEN_DIM: usize = 32;

/// Plain SGD defaults.
const DEFAULT_LEARNING_RATE: f32 = 0.01;
const DEFAULT_BATCH_SIZE: usize = 4;

/// Trains a local model copy on a participant's private dataset.
///
/// `fit` decodes incoming global parameters into a fresh model, runs the
/// requested epochs of mini-batch SGD, and re-encodes. The caller's
/// parameters are never touched; everything happens on the local copy.
#[derive(Debug, Clone)]
pub struct LocalTrainer {
    dataset: ImageDataset,
    hidden_dim: usize,
    learning_rate: f32,
    batch_size: usize,
    seed: u64,
}

impl LocalTrainer {
    /// Create a trainer over a non-empty local dataset.
    pub fn new(dataset: ImageDataset) -> Result<Self> {
        if dataset.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        Ok(Self {
            dataset,
            hidden_dim: DEFAULT_HIDDEN_DIM,
            learning_rate: DEFAULT_LEARNING_RATE,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: 7,
        })
    }

    /// Replace the hidden layer width.
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Replace the SGD learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Replace the mini-batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Replace the model initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The local dataset.
    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    /// Number of local samples, reported alongside every update.
    pub fn sample_count(&self) -> u64 {
        self.dataset.len() as u64
    }

    /// Parameters of a freshly initialized local model.
    ///
    /// Used to seed the federation's first global parameters.
    pub fn initial_parameters(&self) -> ParameterSet {
        self.fresh_model().export_parameters()
    }

    /// Train for `epochs` epochs starting from `parameters`.
    ///
    /// Returns the locally trained parameters, the sample count, and
    /// training metrics (`train_loss`: mean batch loss across all epochs).
    pub fn fit(
        &self,
        parameters: &ParameterSet,
        epochs: u32,
    ) -> Result<(ParameterSet, u64, Metrics)> {
        let mut model = self.fresh_model();
        model.import_parameters(parameters)?;

        let mut loss_sum = 0.0_f64;
        let mut batch_count = 0_u64;
        for epoch in 0..epochs {
            let mut epoch_loss = 0.0_f64;
            let mut epoch_batches = 0_u64;
            for (features, labels) in self.dataset.batches(self.batch_size) {
                epoch_loss += model.train_batch(&features, labels, self.learning_rate)?;
                epoch_batches += 1;
            }
            loss_sum += epoch_loss;
            batch_count += epoch_batches;
            tracing::debug!(
                epoch,
                loss = epoch_loss / epoch_batches.max(1) as f64,
                samples = self.dataset.len(),
                "local epoch finished"
            );
        }

        let mut metrics = Metrics::new();
        metrics.insert(
            "train_loss".to_string(),
            loss_sum / batch_count.max(1) as f64,
        );
        Ok((model.export_parameters(), self.sample_count(), metrics))
    }

    fn fresh_model(&self) -> DenseClassifier {
        DenseClassifier::new(
            self.dataset.input_dim(),
            self.hidden_dim,
            self.dataset.class_count(),
            self.seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer() -> LocalTrainer {
        let dataset = ImageDataset::synthetic(2, 12, (1, 2, 2), 9).unwrap();
        LocalTrainer::new(dataset)
            .unwrap()
            .with_hidden_dim(8)
            .with_seed(3)
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let empty = ImageDataset::synthetic(2, 0, (1, 2, 2), 0).unwrap();
        assert_eq!(LocalTrainer::new(empty).unwrap_err(), ModelError::EmptyDataset);
    }

    #[test]
    fn fit_reports_sample_count_and_train_loss() {
        let trainer = trainer();
        let initial = trainer.initial_parameters();
        let (trained, samples, metrics) = trainer.fit(&initial, 2).unwrap();

        assert_eq!(samples, 24);
        assert!(metrics.contains_key("train_loss"));
        assert_eq!(trained.shapes(), initial.shapes());
    }

    #[test]
    fn fit_leaves_the_callers_parameters_untouched() {
        let trainer = trainer();
        let initial = trainer.initial_parameters();
        let before = initial.clone();
        let _ = trainer.fit(&initial, 1).unwrap();
        assert_eq!(initial, before);
    }

    #[test]
    fn longer_training_lowers_the_loss_on_separable_data() {
        let trainer = trainer().with_learning_rate(0.5);
        let initial = trainer.initial_parameters();
        let (_, _, short) = trainer.fit(&initial, 1).unwrap();
        let (trained, _, _) = trainer.fit(&initial, 20).unwrap();
        let (_, _, resumed) = trainer.fit(&trained, 1).unwrap();
        assert!(
            resumed["train_loss"] < short["train_loss"],
            "training made no progress"
        );
    }

    #[test]
    fn wrong_architecture_fails_fatally() {
        let trainer = trainer();
        let other = trainer.clone().with_hidden_dim(4).initial_parameters();
        let err = trainer.fit(&other, 1).unwrap_err();
        assert!(matches!(err, ModelError::Core(_)));
    }
}
