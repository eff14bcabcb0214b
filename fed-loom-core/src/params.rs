//! Ordered parameter containers exchanged between coordinator and clients.
//!
//! A [`ParameterSet`] is the unit of exchange in the federation: one numeric
//! array per learnable layer, in a fixed architecture-defined order. Every
//! set exchanged within one federation instance must have the same layer
//! count and per-layer shapes; [`ParameterSet::validate_matches`] enforces
//! that contract at the boundaries. Mutation always constructs a new
//! instance, so a set handed to the network layer never changes underneath
//! it.

use ndarray::ArrayD;
use ndarray::IxDyn;

use crate::error::{Error, Result};

/// An ordered sequence of layer tensors, one per learnable layer.
///
/// Layers are stored in standard row-major layout so aggregation can read
/// each one as a contiguous `&[f32]` without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    layers: Vec<ArrayD<f32>>,
}

impl ParameterSet {
    /// Create a parameter set from layer tensors, normalizing each layer to
    /// standard layout.
    pub fn new(layers: Vec<ArrayD<f32>>) -> Self {
        let layers = layers
            .into_iter()
            .map(|layer| {
                if layer.is_standard_layout() {
                    layer
                } else {
                    layer.as_standard_layout().into_owned()
                }
            })
            .collect();
        Self { layers }
    }

    /// Create an empty parameter set (zero layers).
    pub fn empty() -> Self {
        Self { layers: Vec::new() }
    }

    /// Rebuild a parameter set from per-layer shapes and flat row-major data.
    ///
    /// This is the decoding half of the wire format: each `data[i]` must
    /// contain exactly the number of elements `shapes[i]` describes.
    pub fn from_flat_layers(shapes: &[Vec<usize>], data: Vec<Vec<f32>>) -> Result<Self> {
        if shapes.len() != data.len() {
            return Err(Error::LengthMismatch {
                expected: shapes.len(),
                found: data.len(),
            });
        }
        let mut layers = Vec::with_capacity(shapes.len());
        for (shape, values) in shapes.iter().zip(data) {
            let layer = ArrayD::from_shape_vec(IxDyn(shape), values)?;
            layers.push(layer);
        }
        Ok(Self { layers })
    }

    /// Number of layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Whether the set contains no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layer tensors, in architecture order.
    pub fn layers(&self) -> &[ArrayD<f32>] {
        &self.layers
    }

    /// Per-layer shapes, in architecture order.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.layers.iter().map(|l| l.shape().to_vec()).collect()
    }

    /// Total number of scalar parameters across all layers.
    pub fn element_count(&self) -> usize {
        self.layers.iter().map(ArrayD::len).sum()
    }

    /// Every layer as a contiguous row-major slice.
    pub fn layer_slices(&self) -> Result<Vec<&[f32]>> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| layer.as_slice().ok_or(Error::NonContiguousLayer(i)))
            .collect()
    }

    /// Check that this set has exactly the given layer shapes.
    ///
    /// Returns [`Error::LengthMismatch`] when the layer count differs and
    /// [`Error::ShapeMismatch`] for the first layer whose shape disagrees.
    pub fn validate_matches(&self, expected: &[Vec<usize>]) -> Result<()> {
        if self.layers.len() != expected.len() {
            return Err(Error::LengthMismatch {
                expected: expected.len(),
                found: self.layers.len(),
            });
        }
        for (i, (layer, want)) in self.layers.iter().zip(expected).enumerate() {
            if layer.shape() != want.as_slice() {
                return Err(Error::ShapeMismatch {
                    layer: i,
                    expected: want.clone(),
                    found: layer.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Whether two sets agree on layer count and per-layer shapes.
    pub fn shape_compatible(&self, other: &Self) -> bool {
        self.validate_matches(&other.shapes()).is_ok()
    }

    /// Consume the set, yielding the layer tensors.
    pub fn into_layers(self) -> Vec<ArrayD<f32>> {
        self.layers
    }
}

impl From<Vec<ArrayD<f32>>> for ParameterSet {
    fn from(layers: Vec<ArrayD<f32>>) -> Self {
        Self::new(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn two_layer_set() -> ParameterSet {
        ParameterSet::new(vec![
            array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn(),
            array![0.5_f32, -0.5].into_dyn(),
        ])
    }

    #[test]
    fn shapes_and_counts_reflect_layers() {
        let params = two_layer_set();
        assert_eq!(params.layer_count(), 2);
        assert_eq!(params.shapes(), vec![vec![2, 2], vec![2]]);
        assert_eq!(params.element_count(), 6);
    }

    #[test]
    fn validate_rejects_wrong_layer_count() {
        let params = two_layer_set();
        let err = params.validate_matches(&[vec![2, 2]]).unwrap_err();
        assert_eq!(
            err,
            Error::LengthMismatch {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let params = two_layer_set();
        let err = params
            .validate_matches(&[vec![2, 2], vec![3]])
            .unwrap_err();
        assert_eq!(
            err,
            Error::ShapeMismatch {
                layer: 1,
                expected: vec![3],
                found: vec![2]
            }
        );
    }

    #[test]
    fn non_standard_input_is_normalized() {
        let transposed = Array2::from_shape_vec((2, 3), vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .reversed_axes();
        let params = ParameterSet::new(vec![transposed.into_dyn()]);
        let slices = params.layer_slices().unwrap();
        // Row-major order of the 3x2 transposed view.
        assert_eq!(slices[0], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn flat_round_trip_preserves_values() {
        let params = two_layer_set();
        let shapes = params.shapes();
        let data: Vec<Vec<f32>> = params
            .layer_slices()
            .unwrap()
            .into_iter()
            .map(<[f32]>::to_vec)
            .collect();
        let rebuilt = ParameterSet::from_flat_layers(&shapes, data).unwrap();
        assert_eq!(rebuilt, params);
    }

    #[test]
    fn flat_decode_rejects_bad_element_count() {
        let err = ParameterSet::from_flat_layers(&[vec![2, 2]], vec![vec![1.0, 2.0, 3.0]]);
        assert!(matches!(err, Err(Error::Shape(_))));
    }
}
