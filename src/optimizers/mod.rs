//! Optimizer abstractions for neural network parameter updates
//!
//! This module provides the Optimizer trait and implementations for different
//! optimization algorithms used to update parameters after a backward pass.
//!
//! # Overview
//!
//! Optimizers define how to use gradients to update model parameters. The basic
//! gradient descent update is `weight = weight - learning_rate * gradient`, while
//! Adam keeps per-parameter moment estimates keyed by [`ParamId`].
//!
//! # Aliasing contract
//!
//! Layers own their parameters. An optimizer never copies them: it receives
//! `&mut Parameter` handles from [`Layer::parameters_mut`] and writes the new
//! values through those handles, so the owning layer sees them on its next
//! forward call.
//!
//! # Available Optimizers
//!
//! - SGD: Vanilla stochastic gradient descent
//! - Adam: Adaptive moment estimation with bias correction
//!
//! # Example
//!
//! ```ignore
//! use manual_backprop::optimizers::{Adam, Optimizer};
//!
//! let mut optimizer = Adam::with_defaults(&model, 0.001)?;
//! let logits = model.forward(&x)?;
//! loss.forward(&logits, &y)?;
//! model.backward(&loss.backward()?)?;
//! optimizer.step(&mut model)?;
//! ```

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::SGD;

use std::collections::HashSet;

use crate::error::{NnError, Result};
use crate::layers::{Layer, ParamId, Parameter};
use crate::tensor::Tensor;

/// Core trait for optimizers.
pub trait Optimizer {
    /// Update every parameter in place using its current gradient.
    ///
    /// Fails with [`NnError::UninitializedGradient`] if any parameter has no
    /// gradient yet, and with [`NnError::ShapeMismatch`] if a gradient is not
    /// shaped like its parameter. No parameter is modified in either case.
    fn update(&mut self, parameters: &mut [&mut Parameter]) -> Result<()>;

    /// One optimisation step over all parameters of `model`, in layer order.
    fn step(&mut self, model: &mut dyn Layer) -> Result<()> {
        let mut parameters = model.parameters_mut();
        self.update(&mut parameters)
    }

    /// Reset optimizer state (moments, step counter).
    ///
    /// For stateless optimizers like vanilla SGD, this is a no-op.
    fn reset(&mut self);

    fn learning_rate(&self) -> f64;

    /// Updates the base learning rate, e.g. for a decay schedule driven by
    /// the training loop.
    fn set_learning_rate(&mut self, lr: f64);
}

/// Gradient of `parameter`, or [`NnError::UninitializedGradient`].
///
/// The gradient must have exactly the parameter's shape; `optimizer` names
/// the caller in the resulting [`NnError::ShapeMismatch`].
pub(crate) fn gradient_of<'a>(
    parameter: &'a Parameter,
    optimizer: &'static str,
) -> Result<&'a Tensor> {
    let grad = parameter
        .grad
        .as_ref()
        .ok_or_else(|| NnError::UninitializedGradient {
            id: parameter.id().to_string(),
        })?;
    if grad.shape() != parameter.shape() {
        return Err(NnError::shape(
            optimizer,
            format!("gradient of {} shaped {:?}", parameter.id(), parameter.shape()),
            grad.shape(),
        ));
    }
    Ok(grad)
}

/// Check every parameter has a usable gradient before anything is mutated.
pub(crate) fn ensure_gradients(
    parameters: &[&mut Parameter],
    optimizer: &'static str,
) -> Result<()> {
    parameters
        .iter()
        .try_for_each(|p| gradient_of(p, optimizer).map(|_| ()))
}

/// First identity that occurs more than once, if any.
pub(crate) fn first_duplicate(ids: impl IntoIterator<Item = ParamId>) -> Option<ParamId> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

/// Identities of all parameters of `model`, in order.
pub fn parameter_ids(model: &dyn Layer) -> Vec<ParamId> {
    model.parameters().iter().map(|p| p.id()).collect()
}
