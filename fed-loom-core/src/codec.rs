//! The positional model codec contract.
//!
//! A model participates in the federation by exporting its learnable state
//! as a [`ParameterSet`] and importing an aggregated one back. Ordering is
//! positional and fixed by the architecture (each layer's weight tensor
//! before its bias, layers in declaration order), which is what lets the
//! aggregators operate on positional arrays without named keys.

use crate::error::Result;
use crate::params::ParameterSet;

/// Bidirectional conversion between a model's learnable state and a
/// [`ParameterSet`].
pub trait ParameterCodec {
    /// The expected layer shapes, in export order.
    fn layer_shapes(&self) -> Vec<Vec<usize>>;

    /// Snapshot the model's learnable state as an ordered parameter set.
    ///
    /// The returned set is a copy; mutating the model afterwards does not
    /// affect it.
    fn export_parameters(&self) -> ParameterSet;

    /// Replace the model's learnable state from an ordered parameter set.
    ///
    /// Fails with [`crate::Error::LengthMismatch`] when the set's layer
    /// count differs from [`Self::layer_shapes`] and with
    /// [`crate::Error::ShapeMismatch`] when any layer's shape disagrees.
    /// Implementations must validate before installing anything, so a
    /// failed import leaves the model unchanged.
    fn import_parameters(&mut self, params: &ParameterSet) -> Result<()>;

    /// Validate a parameter set against this model's architecture without
    /// installing it.
    fn check_compatible(&self, params: &ParameterSet) -> Result<()> {
        params.validate_matches(&self.layer_shapes())
    }
}
