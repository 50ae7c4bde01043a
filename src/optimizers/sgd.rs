//! Stochastic Gradient Descent (SGD) optimizer implementation
//!
//! This module provides a vanilla SGD optimizer that performs the basic
//! gradient descent update: `parameter = parameter - learning_rate * gradient`

use log::trace;

use crate::error::Result;
use crate::layers::Parameter;
use crate::optimizers::{ensure_gradients, gradient_of, Optimizer};

/// Stochastic Gradient Descent optimizer.
///
/// `w = w - η * ∇L/∂w`
///
/// Stateless: any parameter may be passed, whenever it was created.
///
/// # Example
///
/// ```ignore
/// use manual_backprop::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.01);
/// optimizer.step(&mut model)?;
/// ```
#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f64,
}

impl SGD {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for SGD {
    fn update(&mut self, parameters: &mut [&mut Parameter]) -> Result<()> {
        ensure_gradients(parameters, "SGD")?;
        let lr = self.learning_rate;
        for parameter in parameters.iter_mut() {
            let step = gradient_of(parameter, "SGD")?.mul_scalar(lr);
            parameter.value = parameter.value.sub(&step);
        }
        trace!("SGD step over {} parameters, lr={}", parameters.len(), lr);
        Ok(())
    }

    fn reset(&mut self) {}

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
