//! Adam (Adaptive Moment Estimation) optimizer implementation
//!
//! This module provides the Adam optimizer, which combines momentum and
//! adaptive learning rates with bias correction for improved convergence.

use std::collections::HashMap;

use log::{debug, trace};

use crate::error::{NnError, Result};
use crate::layers::{Layer, ParamId, Parameter};
use crate::optimizers::{ensure_gradients, first_duplicate, gradient_of, Optimizer};
use crate::tensor::Tensor;

/// First and second moment estimates of one parameter.
#[derive(Debug, Clone)]
struct Moments {
    m: Tensor,
    v: Tensor,
}

/// Adam (Adaptive Moment Estimation) optimizer.
///
/// The update rule is:
///
/// ```text
/// m_t = β1 * m_{t-1} + (1 - β1) * gradient
/// v_t = β2 * v_{t-1} + (1 - β2) * gradient²
/// m_hat = m_t / (1 - β1^t)
/// v_hat = v_t / (1 - β2^t)
/// parameter = parameter - α * m_hat / (√v_hat + ε)
/// ```
///
/// where:
/// - α (alpha) is the learning rate
/// - β1 (beta1) is the exponential decay rate for first moment estimates
/// - β2 (beta2) is the exponential decay rate for second moment estimates
/// - ε (epsilon) is a small constant for numerical stability
/// - t is the global step counter
///
/// # State
///
/// Moments are keyed by [`ParamId`] and created, zeroed, when the optimizer
/// is constructed from a model. Every identity owns exactly one entry, so a
/// model whose parameters share an identity is rejected with
/// [`NnError::DuplicateParameterIdentity`]. Parameters created afterwards are
/// not tracked; meeting one during a step is an
/// [`NnError::UnknownParameterIdentity`].
///
/// # Reference
///
/// Kingma, D. P., & Ba, J. (2014). Adam: A method for stochastic optimization.
/// arXiv preprint arXiv:1412.6980.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    state: HashMap<ParamId, Moments>,
    /// Time step counter for bias correction
    t: i32,
}

impl Adam {
    /// Creates an optimizer tracking every parameter `model` has now.
    ///
    /// # Typical Values
    ///
    /// The original Adam paper recommends:
    /// - learning_rate: 0.001
    /// - beta1: 0.9
    /// - beta2: 0.999
    /// - epsilon: 1e-8
    ///
    /// # Errors
    ///
    /// [`NnError::DuplicateParameterIdentity`] if two parameters of `model`
    /// share an identity.
    pub fn new(
        model: &dyn Layer,
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    ) -> Result<Self> {
        let parameters = model.parameters();
        if let Some(id) = first_duplicate(parameters.iter().map(|p| p.id())) {
            return Err(NnError::DuplicateParameterIdentity { id: id.to_string() });
        }
        let state: HashMap<ParamId, Moments> = parameters
            .iter()
            .map(|p| {
                let zeros = Tensor::zeros(p.shape());
                (
                    p.id(),
                    Moments {
                        m: zeros.clone(),
                        v: zeros,
                    },
                )
            })
            .collect();
        debug!(
            "Adam state created for {} parameters (lr={}, beta1={}, beta2={}, eps={})",
            state.len(),
            learning_rate,
            beta1,
            beta2,
            epsilon
        );
        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            state,
            t: 0,
        })
    }

    /// [`Adam::new`] with β1 = 0.9, β2 = 0.999, ε = 1e-8.
    pub fn with_defaults(model: &dyn Layer, learning_rate: f64) -> Result<Self> {
        Self::new(model, learning_rate, 0.9, 0.999, 1e-8)
    }

    /// Number of steps taken since construction or the last reset.
    pub fn step_count(&self) -> i32 {
        self.t
    }

    pub fn is_tracking(&self, id: ParamId) -> bool {
        self.state.contains_key(&id)
    }

    pub fn tracked_parameters(&self) -> usize {
        self.state.len()
    }

    /// Current `(m, v)` estimates for `id`.
    pub fn moments(&self, id: ParamId) -> Option<(&Tensor, &Tensor)> {
        self.state.get(&id).map(|s| (&s.m, &s.v))
    }
}

impl Optimizer for Adam {
    fn update(&mut self, parameters: &mut [&mut Parameter]) -> Result<()> {
        ensure_gradients(parameters, "Adam")?;
        for parameter in parameters.iter() {
            let moments = self.state.get(&parameter.id()).ok_or_else(|| {
                NnError::UnknownParameterIdentity {
                    id: parameter.id().to_string(),
                }
            })?;
            if moments.m.shape() != parameter.shape() {
                return Err(NnError::shape(
                    "Adam",
                    format!("{} shaped {:?}", parameter.id(), moments.m.shape()),
                    parameter.shape(),
                ));
            }
        }
        if let Some(id) = first_duplicate(parameters.iter().map(|p| p.id())) {
            return Err(NnError::DuplicateParameterIdentity { id: id.to_string() });
        }

        self.t += 1;
        let (beta1, beta2) = (self.beta1, self.beta2);
        let bias_correction1 = 1.0 - beta1.powi(self.t);
        let bias_correction2 = 1.0 - beta2.powi(self.t);
        let (lr, eps) = (self.learning_rate, self.epsilon);

        for parameter in parameters.iter_mut() {
            let id = parameter.id();
            let grad = gradient_of(parameter, "Adam")?;
            let moments = self
                .state
                .get_mut(&id)
                .ok_or_else(|| NnError::UnknownParameterIdentity { id: id.to_string() })?;

            moments.m = moments.m.zip_map(grad, |m, g| beta1 * m + (1.0 - beta1) * g);
            moments.v = moments.v.zip_map(grad, |v, g| beta2 * v + (1.0 - beta2) * g * g);

            let m_hat = moments.m.mul_scalar(1.0 / bias_correction1);
            let v_hat = moments.v.mul_scalar(1.0 / bias_correction2);
            let step = m_hat.zip_map(&v_hat, |m, v| lr * m / (v.sqrt() + eps));
            parameter.value = parameter.value.sub(&step);
        }
        trace!("Adam step {} over {} parameters", self.t, parameters.len());
        Ok(())
    }

    /// Zero every moment estimate and the step counter. Tracked identities
    /// are kept.
    fn reset(&mut self) {
        for moments in self.state.values_mut() {
            moments.m = Tensor::zeros_like(&moments.m);
            moments.v = Tensor::zeros_like(&moments.v);
        }
        self.t = 0;
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
