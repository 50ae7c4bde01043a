//! Fully connected layer implementation
//!
//! This module provides a FullyConnected layer that performs the
//! transformation: output = input × weights + bias

use log::debug;

use crate::error::{NnError, Result};
use crate::layers::param::{LayerId, ModelContext, ParamId, ParamRole, Parameter};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Fully connected layer with weights and an optional bias.
///
/// Performs the linear transformation: y = xW + b
/// where x is the input (batch_size × in_features),
/// W is the weight matrix (in_features × out_features),
/// and b is the bias row (1 × out_features), broadcast over the batch.
///
/// # Example
///
/// ```ignore
/// use manual_backprop::layers::{FullyConnected, ModelContext};
///
/// let mut ctx = ModelContext::new(42);
/// let layer = FullyConnected::new(784, 512, &mut ctx);
/// assert_eq!(layer.in_features(), 784);
/// assert_eq!(layer.out_features(), 512);
/// ```
#[derive(Debug)]
pub struct FullyConnected {
    id: LayerId,
    in_features: usize,
    out_features: usize,
    weights: Parameter,
    bias: Option<Parameter>,
    input: Option<Tensor>,
    training: bool,
}

impl FullyConnected {
    /// Create a layer with weights and bias drawn from `N(0, 1) * init_scale`.
    pub fn new(in_features: usize, out_features: usize, ctx: &mut ModelContext) -> Self {
        Self::with_bias(in_features, out_features, true, ctx)
    }

    /// Like [`FullyConnected::new`], optionally without a bias parameter.
    pub fn with_bias(
        in_features: usize,
        out_features: usize,
        bias: bool,
        ctx: &mut ModelContext,
    ) -> Self {
        let id = ctx.next_layer_id();
        let weights = ctx.random_tensor(&[in_features, out_features]);
        let bias = bias.then(|| ctx.random_tensor(&[1, out_features]));
        debug!(
            "FullyConnected {} created: {} -> {}, bias={}",
            id.0,
            in_features,
            out_features,
            bias.is_some()
        );
        Self::assemble(id, weights, bias)
    }

    /// Build a layer around explicit parameter values.
    ///
    /// `weights` must be `(in_features, out_features)` and `bias`, if given,
    /// `(1, out_features)`.
    pub fn from_weights(id: LayerId, weights: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weights.ndim() != 2 {
            return Err(NnError::shape(
                "FullyConnected",
                "weights (in_features, out_features)",
                weights.shape(),
            ));
        }
        if let Some(b) = &bias {
            if b.shape() != [1, weights.shape()[1]] {
                return Err(NnError::shape(
                    "FullyConnected",
                    format!("bias (1, {})", weights.shape()[1]),
                    b.shape(),
                ));
            }
        }
        Ok(Self::assemble(id, weights, bias))
    }

    fn assemble(id: LayerId, weights: Tensor, bias: Option<Tensor>) -> Self {
        let (in_features, out_features) = (weights.shape()[0], weights.shape()[1]);
        Self {
            id,
            in_features,
            out_features,
            weights: Parameter::new(ParamId::new(id, ParamRole::Weights), weights),
            bias: bias.map(|b| Parameter::new(ParamId::new(id, ParamRole::Bias), b)),
            input: None,
            training: true,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weights(&self) -> &Parameter {
        &self.weights
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }
}

impl Layer for FullyConnected {
    fn name(&self) -> &'static str {
        "FullyConnected"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 2 || input.shape()[1] != self.in_features {
            return Err(NnError::shape(
                self.name(),
                format!("(batch, {})", self.in_features),
                input.shape(),
            ));
        }
        let mut output = input.matmul(&self.weights.value);
        if let Some(bias) = &self.bias {
            output = output.add(&bias.value);
        }
        self.input = Some(input.clone());
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let input = match &self.input {
            Some(input) if output_gradient.shape() == [input.shape()[0], self.out_features] => {
                input
            }
            Some(input) => {
                return Err(NnError::shape(
                    self.name(),
                    format!("({}, {})", input.shape()[0], self.out_features),
                    output_gradient.shape(),
                ))
            }
            None => {
                return Err(NnError::shape(
                    self.name(),
                    "a preceding forward call",
                    output_gradient.shape(),
                ))
            }
        };

        // dL/dX = dL/dY · Wᵀ, dL/dW = Xᵀ · dL/dY, dL/db = Σ_batch dL/dY
        let input_gradient = output_gradient.matmul(&self.weights.value.transpose());
        self.weights
            .set_grad(input.transpose().matmul(output_gradient));
        if let Some(bias) = &mut self.bias {
            bias.set_grad(output_gradient.sum_axes(&[0], true));
        }
        Ok(input_gradient)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn is_trainable(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<&Parameter> {
        std::iter::once(&self.weights).chain(self.bias.as_ref()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        std::iter::once(&mut self.weights)
            .chain(self.bias.as_mut())
            .collect()
    }
}
