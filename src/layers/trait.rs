//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that every layer kind implements:
//! a forward transform, its manually derived backward transform, a training
//! flag, and (for parameterized layers) access to the owned parameters.

use crate::error::Result;
use crate::layers::param::Parameter;
use crate::tensor::Tensor;

/// Core trait for neural network layers.
///
/// Layers are either *leaves* (FullyConnected, Conv2d, ReLU, ...) or
/// *composites* ([`crate::layers::Sequential`]). Only composites report
/// children; a leaf never recurses into itself.
///
/// # Forward/backward contract
///
/// `forward` takes a batch-major tensor and caches whatever it needs for the
/// gradient. `backward` takes a tensor shaped like the last forward output
/// and returns one shaped like the last forward input, overwriting the
/// gradient of every owned parameter along the way. Calling `backward`
/// without a preceding `forward`, or with an incongruent shape, returns
/// [`crate::NnError::ShapeMismatch`].
///
/// # Example
///
/// ```ignore
/// let output = layer.forward(&input)?;
/// let grad_input = layer.backward(&grad_output)?;
/// ```
pub trait Layer: std::fmt::Debug {
    /// Short layer-kind name used in error messages and logs.
    fn name(&self) -> &'static str;

    /// Forward propagation through the layer.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Backward propagation through the layer.
    ///
    /// Returns the gradient with respect to the input of the paired forward
    /// call and stores gradients for owned parameters.
    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor>;

    /// Switch between training and evaluation behaviour.
    ///
    /// Composites propagate the flag to every child.
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// True for leaves that own learnable parameters.
    fn is_trainable(&self) -> bool {
        false
    }

    /// Sub-layers of a composite. Leaves have none.
    fn children(&self) -> &[Box<dyn Layer>] {
        &[]
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut []
    }

    /// Owned parameters, in a fixed order. Composites concatenate their
    /// children's parameters in layer order.
    fn parameters(&self) -> Vec<&Parameter> {
        self.children()
            .iter()
            .flat_map(|child| child.parameters())
            .collect()
    }

    /// Mutable handles to the same parameters, in the same order as
    /// [`Layer::parameters`].
    ///
    /// Optimizers update parameters through these handles; the layer keeps
    /// ownership and sees the new values on its next forward call.
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.children_mut()
            .iter_mut()
            .flat_map(|child| child.parameters_mut())
            .collect()
    }

    /// Total count of learnable scalars.
    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }
}

impl dyn Layer + '_ {
    /// Flattened list of trainable leaves in layer order.
    ///
    /// A composite contributes the concatenation of its children's lists;
    /// a trainable leaf contributes itself.
    pub fn trainable_layers(&self) -> Vec<&dyn Layer> {
        let children = self.children();
        if children.is_empty() {
            if self.is_trainable() {
                vec![self]
            } else {
                Vec::new()
            }
        } else {
            children
                .iter()
                .flat_map(|child| child.as_ref().trainable_layers())
                .collect()
        }
    }
}
