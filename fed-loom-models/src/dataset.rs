//! In-memory image dataset with even partitioning.
//!
//! The federation core only ever sees fixed-shape numeric batches; this
//! module is the collaborator that produces them. A dataset owns its images
//! as a `(N, C, H, W)` tensor plus one label per image, knows its class
//! count, and can split itself evenly across clients (equal shares,
//! remainder to the first shards).

use ndarray::{Array2, Array4, Axis, Slice};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::{ModelError, Result};

/// Labeled images held in memory.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Array4<f32>,
    labels: Vec<usize>,
    class_count: usize,
}

impl ImageDataset {
    /// Create a dataset, validating that images and labels line up and
    /// every label falls inside the class range.
    pub fn new(images: Array4<f32>, labels: Vec<usize>, class_count: usize) -> Result<Self> {
        if class_count < 2 {
            return Err(ModelError::TooFewClasses(class_count));
        }
        if images.dim().0 != labels.len() {
            return Err(ModelError::SampleCountMismatch {
                images: images.dim().0,
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= class_count) {
            return Err(ModelError::LabelOutOfRange { label, class_count });
        }
        Ok(Self {
            images,
            labels,
            class_count,
        })
    }

    /// Generate a seeded synthetic dataset with one cluster per class.
    ///
    /// Every pixel of a class-`k` image sits near `k / class_count` with
    /// uniform jitter, which makes the classes linearly separable: enough
    /// signal for the reference classifier to visibly learn in tests and
    /// the simulator. Sample order is shuffled so contiguous partitions
    /// still contain every class.
    pub fn synthetic(
        class_count: usize,
        per_class: usize,
        shape: (usize, usize, usize),
        seed: u64,
    ) -> Result<Self> {
        if class_count < 2 {
            return Err(ModelError::TooFewClasses(class_count));
        }
        let (channels, height, width) = shape;
        let total = class_count * per_class;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut labels: Vec<usize> = (0..total).map(|i| i / per_class.max(1)).collect();
        labels.shuffle(&mut rng);

        let mut images = Array4::zeros((total, channels, height, width));
        for (i, &label) in labels.iter().enumerate() {
            let center = label as f32 / class_count as f32;
            for value in images.index_axis_mut(Axis(0), i).iter_mut() {
                *value = center + rng.gen_range(-0.1..0.1);
            }
        }

        Self::new(images, labels, class_count)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of classes. Sizes the classifier's output layer.
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Per-image shape as `(channels, height, width)`.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.images.dim();
        (c, h, w)
    }

    /// Flattened feature width of one image.
    pub fn input_dim(&self) -> usize {
        let (c, h, w) = self.image_shape();
        c * h * w
    }

    /// The labels, in sample order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Iterate the dataset in flattened mini-batches.
    ///
    /// Each item is `(features, labels)` with `features` of shape
    /// `(batch, C*H*W)`. The final batch may be short.
    pub fn batches(&self, batch_size: usize) -> Batches<'_> {
        Batches {
            dataset: self,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }

    /// Split into `parts` contiguous shards of near-equal size.
    ///
    /// The remainder is spread one sample at a time over the first shards.
    /// Shards share the parent's class count.
    pub fn partition_even(&self, parts: usize) -> Vec<ImageDataset> {
        if parts == 0 {
            return Vec::new();
        }
        let base = self.len() / parts;
        let extra = self.len() % parts;

        let mut shards = Vec::with_capacity(parts);
        let mut start = 0;
        for i in 0..parts {
            let end = start + base + usize::from(i < extra);
            shards.push(ImageDataset {
                images: self
                    .images
                    .slice_axis(Axis(0), Slice::from(start..end))
                    .to_owned(),
                labels: self.labels[start..end].to_vec(),
                class_count: self.class_count,
            });
            start = end;
        }
        shards
    }
}

/// Mini-batch iterator over an [`ImageDataset`].
#[derive(Debug)]
pub struct Batches<'a> {
    dataset: &'a ImageDataset,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = (Array2<f32>, &'a [usize]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.dataset.len() {
            return None;
        }
        let start = self.cursor;
        let end = (start + self.batch_size).min(self.dataset.len());
        self.cursor = end;

        let (_, h, w) = {
            let (_, c, h, w) = self.dataset.images.dim();
            (c, h, w)
        };
        let dim = self.dataset.input_dim();
        let features = Array2::from_shape_fn((end - start, dim), |(i, j)| {
            let c = j / (h * w);
            let row = (j / w) % h;
            let col = j % w;
            self.dataset.images[[start + i, c, row, col]]
        });
        Some((features, &self.dataset.labels[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(n: usize) -> ImageDataset {
        let images = Array4::from_shape_fn((n, 1, 2, 2), |(i, _, h, w)| {
            i as f32 * 10.0 + h as f32 * 2.0 + w as f32
        });
        let labels = (0..n).map(|i| i % 2).collect();
        ImageDataset::new(images, labels, 2).unwrap()
    }

    #[test]
    fn construction_validates_counts_and_labels() {
        let images = Array4::<f32>::zeros((2, 1, 2, 2));
        assert_eq!(
            ImageDataset::new(images.clone(), vec![0], 2).unwrap_err(),
            ModelError::SampleCountMismatch { images: 2, labels: 1 }
        );
        assert_eq!(
            ImageDataset::new(images.clone(), vec![0, 5], 2).unwrap_err(),
            ModelError::LabelOutOfRange {
                label: 5,
                class_count: 2
            }
        );
        assert_eq!(
            ImageDataset::new(images, vec![0, 0], 1).unwrap_err(),
            ModelError::TooFewClasses(1)
        );
    }

    #[test]
    fn batches_flatten_row_major_and_keep_order() {
        let dataset = tiny(3);
        let mut batches = dataset.batches(2);

        let (features, labels) = batches.next().unwrap();
        assert_eq!(features.dim(), (2, 4));
        // Sample 0 pixels in (h, w) row-major order.
        assert_eq!(
            features.row(0).to_vec(),
            vec![0.0, 1.0, 2.0, 3.0]
        );
        assert_eq!(labels, &[0, 1]);

        // Final short batch.
        let (features, labels) = batches.next().unwrap();
        assert_eq!(features.dim(), (1, 4));
        assert_eq!(labels, &[0]);
        assert!(batches.next().is_none());
    }

    #[test]
    fn partition_spreads_the_remainder_forward() {
        let dataset = tiny(10);
        let shards = dataset.partition_even(3);
        let sizes: Vec<usize> = shards.iter().map(ImageDataset::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert!(shards.iter().all(|s| s.class_count() == 2));

        // Shards are contiguous slices of the parent.
        let rejoined: Vec<usize> = shards.iter().flat_map(|s| s.labels().to_vec()).collect();
        assert_eq!(rejoined, dataset.labels());

        // Image data follows the labels: shard 1 starts at parent sample 4.
        let (features, _) = shards[1].batches(1).next().unwrap();
        assert_eq!(features.row(0).to_vec(), vec![40.0, 41.0, 42.0, 43.0]);
    }

    #[test]
    fn partition_by_zero_yields_nothing() {
        assert!(tiny(4).partition_even(0).is_empty());
    }

    #[test]
    fn synthetic_is_seed_deterministic() {
        let a = ImageDataset::synthetic(2, 8, (1, 2, 2), 42).unwrap();
        let b = ImageDataset::synthetic(2, 8, (1, 2, 2), 42).unwrap();
        assert_eq!(a.labels(), b.labels());
        assert_eq!(a.len(), 16);
        assert_eq!(a.input_dim(), 4);

        // Both classes present.
        assert!(a.labels().contains(&0));
        assert!(a.labels().contains(&1));
    }
}
