//! Sequential container: a linear stack of layers
//!
//! Forward pipes the input through the layers in order; backward pipes the
//! gradient through them in reverse. The container is the only composite
//! layer kind, so it is the only one that recurses into children.

use log::debug;

use crate::error::Result;
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Ordered stack of layers behaving as one layer.
///
/// # Example
///
/// ```ignore
/// let mut ctx = ModelContext::new(42);
/// let mut model = Sequential::new(vec![
///     Box::new(FullyConnected::new(4, 3, &mut ctx)),
///     Box::new(ReLU::new()),
///     Box::new(FullyConnected::new(3, 2, &mut ctx)),
/// ]);
/// let logits = model.forward(&batch)?;
/// ```
#[derive(Debug)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    training: bool,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        let model = Self {
            layers,
            training: true,
        };
        debug!(
            "Sequential assembled: {} layers, {} trainable, {} parameters",
            model.layers.len(),
            (&model as &dyn Layer).trainable_layers().len(),
            model.parameter_count()
        );
        model
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Trainable leaves in layer order, flattening nested containers.
    pub fn trainable_layers(&self) -> Vec<&dyn Layer> {
        (self as &dyn Layer).trainable_layers()
    }
}

impl Layer for Sequential {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for layer in self.layers.iter_mut() {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let mut g = output_gradient.clone();
        for layer in self.layers.iter_mut().rev() {
            g = layer.backward(&g)?;
        }
        Ok(g)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for layer in self.layers.iter_mut() {
            layer.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn children(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }
}
