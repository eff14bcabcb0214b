//! The reference dense image classifier.
//!
//! Flatten → hidden dense (ReLU) → output dense, trained with softmax
//! cross-entropy. Forward and backward passes are written directly in
//! `ndarray`; a numerical gradient check in the tests pins the backward
//! pass. The classifier implements [`ParameterCodec`] with the positional
//! layer order `[w1, b1, w2, b2]`: each weight before its bias, layers in
//! declaration order.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fed_loom_core::codec::ParameterCodec;
use fed_loom_core::params::ParameterSet;

use crate::{ModelError, Result};

/// A two-layer dense classifier over flattened images.
#[derive(Debug, Clone)]
pub struct DenseClassifier {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

/// Parameter gradients from one backward pass, same layout as the model.
#[derive(Debug, Clone)]
pub struct Gradients {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl DenseClassifier {
    /// Build a classifier with Xavier-uniform weights and zero biases,
    /// deterministic for a given seed.
    pub fn new(input_dim: usize, hidden_dim: usize, class_count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            w1: xavier(&mut rng, hidden_dim, input_dim),
            b1: Array1::zeros(hidden_dim),
            w2: xavier(&mut rng, class_count, hidden_dim),
            b2: Array1::zeros(class_count),
        }
    }

    /// Flattened input width.
    pub fn input_dim(&self) -> usize {
        self.w1.ncols()
    }

    /// Number of output classes.
    pub fn class_count(&self) -> usize {
        self.w2.nrows()
    }

    /// Class probabilities for a batch, shape `(batch, class_count)`.
    pub fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_features(features)?;
        let hidden = self.hidden(features);
        Ok(softmax_rows(hidden.dot(&self.w2.t()) + &self.b2))
    }

    /// Predicted class per sample (argmax over the output layer).
    pub fn predict(&self, features: &Array2<f32>) -> Result<Vec<usize>> {
        let probs = self.forward(features)?;
        Ok(probs
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    /// Mean cross-entropy loss over a batch, no gradients.
    pub fn batch_loss(&self, features: &Array2<f32>, labels: &[usize]) -> Result<f64> {
        self.check_batch(features, labels)?;
        let probs = self.forward(features)?;
        Ok(cross_entropy(&probs, labels))
    }

    /// Mean loss and parameter gradients for one batch.
    pub fn loss_and_gradients(
        &self,
        features: &Array2<f32>,
        labels: &[usize],
    ) -> Result<(f64, Gradients)> {
        self.check_batch(features, labels)?;
        let batch = features.nrows();

        let pre1 = features.dot(&self.w1.t()) + &self.b1;
        let hidden = pre1.mapv(|v| v.max(0.0));
        let probs = softmax_rows(hidden.dot(&self.w2.t()) + &self.b2);
        let loss = cross_entropy(&probs, labels);

        // dL/dlogits for softmax cross-entropy: (p - onehot) / batch.
        let mut dlogits = probs;
        for (i, &label) in labels.iter().enumerate() {
            dlogits[[i, label]] -= 1.0;
        }
        dlogits *= 1.0 / batch as f32;

        let dw2 = dlogits.t().dot(&hidden);
        let db2 = dlogits.sum_axis(Axis(0));

        let mut dhidden = dlogits.dot(&self.w2);
        dhidden.zip_mut_with(&pre1, |d, &p| {
            if p <= 0.0 {
                *d = 0.0;
            }
        });
        let dw1 = dhidden.t().dot(features);
        let db1 = dhidden.sum_axis(Axis(0));

        Ok((
            loss,
            Gradients {
                w1: dw1,
                b1: db1,
                w2: dw2,
                b2: db2,
            },
        ))
    }

    /// One SGD step on a batch; returns the pre-step mean loss.
    pub fn train_batch(
        &mut self,
        features: &Array2<f32>,
        labels: &[usize],
        learning_rate: f32,
    ) -> Result<f64> {
        let (loss, gradients) = self.loss_and_gradients(features, labels)?;
        self.apply_gradients(&gradients, learning_rate);
        Ok(loss)
    }

    /// Descend along `gradients` scaled by `learning_rate`.
    pub fn apply_gradients(&mut self, gradients: &Gradients, learning_rate: f32) {
        self.w1.scaled_add(-learning_rate, &gradients.w1);
        self.b1.scaled_add(-learning_rate, &gradients.b1);
        self.w2.scaled_add(-learning_rate, &gradients.w2);
        self.b2.scaled_add(-learning_rate, &gradients.b2);
    }

    fn hidden(&self, features: &Array2<f32>) -> Array2<f32> {
        (features.dot(&self.w1.t()) + &self.b1).mapv(|v| v.max(0.0))
    }

    fn check_features(&self, features: &Array2<f32>) -> Result<()> {
        if features.ncols() != self.input_dim() {
            return Err(ModelError::FeatureMismatch {
                expected: self.input_dim(),
                found: features.ncols(),
            });
        }
        Ok(())
    }

    fn check_batch(&self, features: &Array2<f32>, labels: &[usize]) -> Result<()> {
        self.check_features(features)?;
        if features.nrows() != labels.len() {
            return Err(ModelError::SampleCountMismatch {
                images: features.nrows(),
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= self.class_count()) {
            return Err(ModelError::LabelOutOfRange {
                label,
                class_count: self.class_count(),
            });
        }
        Ok(())
    }
}

impl ParameterCodec for DenseClassifier {
    fn layer_shapes(&self) -> Vec<Vec<usize>> {
        vec![
            self.w1.shape().to_vec(),
            self.b1.shape().to_vec(),
            self.w2.shape().to_vec(),
            self.b2.shape().to_vec(),
        ]
    }

    fn export_parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![
            self.w1.clone().into_dyn(),
            self.b1.clone().into_dyn(),
            self.w2.clone().into_dyn(),
            self.b2.clone().into_dyn(),
        ])
    }

    fn import_parameters(&mut self, params: &ParameterSet) -> fed_loom_core::Result<()> {
        self.check_compatible(params)?;
        let layers = params.layers();
        self.w1 = layers[0].clone().into_dimensionality()?;
        self.b1 = layers[1].clone().into_dimensionality()?;
        self.w2 = layers[2].clone().into_dimensionality()?;
        self.b2 = layers[3].clone().into_dimensionality()?;
        Ok(())
    }
}

fn xavier(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

fn softmax_rows(logits: Array2<f32>) -> Array2<f32> {
    let mut probs = logits;
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

fn cross_entropy(probs: &Array2<f32>, labels: &[usize]) -> f64 {
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| -f64::from(probs[[i, label]].max(1e-12)).ln())
        .sum();
    total / labels.len().max(1) as f64
}
