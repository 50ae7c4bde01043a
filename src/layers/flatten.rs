//! Flatten layer: `(batch, ...) -> (batch, rest)`

use crate::error::{NnError, Result};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Collapses every axis after the batch axis into one.
#[derive(Debug)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
    training: bool,
}

impl Flatten {
    pub fn new() -> Self {
        Self {
            input_shape: None,
            training: true,
        }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Flatten {
    fn name(&self) -> &'static str {
        "Flatten"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() < 1 || input.shape()[0] == 0 {
            return Err(NnError::shape(self.name(), "(batch, ...)", input.shape()));
        }
        self.input_shape = Some(input.shape().to_vec());
        Ok(input.reshape_infer(&[input.shape()[0] as isize, -1]))
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        match &self.input_shape {
            Some(shape)
                if output_gradient.ndim() == 2
                    && output_gradient.shape()[0] == shape[0]
                    && output_gradient.len() == shape.iter().product::<usize>() =>
            {
                Ok(output_gradient.reshape(shape))
            }
            Some(shape) => Err(NnError::shape(
                self.name(),
                format!("({}, {})", shape[0], shape[1..].iter().product::<usize>()),
                output_gradient.shape(),
            )),
            None => Err(NnError::shape(
                self.name(),
                "a preceding forward call",
                output_gradient.shape(),
            )),
        }
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
