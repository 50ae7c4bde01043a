//! Batch normalization layer for 4-D feature maps
//!
//! This module provides [`BatchNorm2d`], which normalizes each channel of an
//! `(batch, channels, height, width)` tensor over the batch and spatial axes.
//!
//! # Batch Normalization Theory
//!
//! For each channel, with m = batch·height·width elements:
//!
//! 1. Compute batch statistics: mean μ and population variance σ²
//! 2. Normalize: x̂ = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = γ·x̂ + β
//!
//! During training the running statistics are blended towards the batch
//! statistics as an exponential moving average:
//!
//! ```text
//! running_mean ← momentum·μ + (1 - momentum)·running_mean
//! running_var  ← momentum·σ²·m/(m-1) + (1 - momentum)·running_var
//! ```
//!
//! The variance is Bessel-corrected before blending so the running estimate
//! is unbiased. In evaluation mode the running statistics replace the batch
//! statistics and are left untouched.
//!
//! # Backward
//!
//! With g the upstream gradient and all sums over batch and spatial axes:
//!
//! ```text
//! dβ  = Σ g
//! dγ  = Σ g·x̂
//! dx̂  = g·γ
//! dσ² = -½ (σ² + ε)^(-3/2) · Σ dx̂·(x - μ)
//! dμ  = -Σ dx̂ / sqrt(σ² + ε) + dσ² · (-2)·mean(x - μ)
//! dx  = dx̂ / sqrt(σ² + ε) + dσ²·2(x - μ)/m + dμ/m
//! ```
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use log::{debug, warn};

use crate::error::{NnError, Result};
use crate::layers::param::{LayerId, ModelContext, ParamId, ParamRole, Parameter};
use crate::layers::Layer;
use crate::tensor::Tensor;

const STAT_AXES: [usize; 3] = [0, 2, 3];

pub const DEFAULT_MOMENTUM: f64 = 0.1;
pub const DEFAULT_EPS: f64 = 1e-5;

/// Values cached by forward for the backward pass.
#[derive(Debug)]
struct BatchNormCache {
    input: Tensor,
    mean: Tensor,
    var: Tensor,
    normalized: Tensor,
}

/// Batch normalization over the channel axis of 4-D inputs.
///
/// # Fields
///
/// * `gamma` - Learnable scale `(1, C, 1, 1)`, initialized to 1
/// * `beta` - Learnable shift `(1, C, 1, 1)`, initialized to 0
/// * `running_mean` - EMA of batch means, initialized to 0
/// * `running_var` - EMA of Bessel-corrected batch variances, initialized to 1
/// * `momentum` - Weight of the new batch statistic in the EMA
/// * `eps` - Added to the variance before the square root
///
/// # Example
///
/// ```ignore
/// use manual_backprop::layers::{BatchNorm2d, ModelContext};
///
/// let mut ctx = ModelContext::new(0);
/// let mut layer = BatchNorm2d::new(16, &mut ctx);
/// layer.set_training(false); // use running statistics
/// ```
#[derive(Debug)]
pub struct BatchNorm2d {
    id: LayerId,
    n_channels: usize,
    momentum: f64,
    eps: f64,
    training: bool,

    gamma: Parameter,
    beta: Parameter,

    running_mean: Tensor,
    running_var: Tensor,
    batches_seen: u64,

    cache: Option<BatchNormCache>,
}

impl BatchNorm2d {
    /// Create a layer with momentum 0.1 and eps 1e-5.
    pub fn new(n_channels: usize, ctx: &mut ModelContext) -> Self {
        Self::with_hyperparameters(n_channels, DEFAULT_MOMENTUM, DEFAULT_EPS, ctx)
    }

    /// Create a layer with explicit momentum and eps.
    ///
    /// # Panics
    ///
    /// Panics if `eps` is not positive or `momentum` lies outside [0, 1].
    pub fn with_hyperparameters(
        n_channels: usize,
        momentum: f64,
        eps: f64,
        ctx: &mut ModelContext,
    ) -> Self {
        assert!(eps > 0.0, "eps must be positive");
        assert!(
            (0.0..=1.0).contains(&momentum),
            "momentum must be in range [0.0, 1.0]"
        );

        let id = ctx.next_layer_id();
        let stat_shape = [1, n_channels, 1, 1];
        debug!(
            "BatchNorm2d {} created: {} channels, momentum={}, eps={}",
            id.0, n_channels, momentum, eps
        );

        Self {
            id,
            n_channels,
            momentum,
            eps,
            training: true,
            gamma: Parameter::new(ParamId::new(id, ParamRole::Scale), Tensor::ones(&stat_shape)),
            beta: Parameter::new(ParamId::new(id, ParamRole::Shift), Tensor::zeros(&stat_shape)),
            // Sensible eval-mode behaviour even before any training batch.
            running_mean: Tensor::zeros(&stat_shape),
            running_var: Tensor::ones(&stat_shape),
            batches_seen: 0,
            cache: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn gamma(&self) -> &Parameter {
        &self.gamma
    }

    pub fn beta(&self) -> &Parameter {
        &self.beta
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    /// Blend batch statistics into the running averages.
    fn update_running_stats(&mut self, mean: &Tensor, var: &Tensor, m: usize) {
        let bessel = if m > 1 {
            m as f64 / (m - 1) as f64
        } else {
            warn!(
                "BatchNorm2d {}: one element per channel, running variance left uncorrected",
                self.id.0
            );
            1.0
        };
        let momentum = self.momentum;
        self.running_mean = mean.zip_map(&self.running_mean, |b, r| {
            momentum * b + (1.0 - momentum) * r
        });
        self.running_var = var.zip_map(&self.running_var, |b, r| {
            momentum * b * bessel + (1.0 - momentum) * r
        });
        self.batches_seen += 1;
    }
}

impl Layer for BatchNorm2d {
    fn name(&self) -> &'static str {
        "BatchNorm2d"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 4 || input.shape()[1] != self.n_channels || input.is_empty() {
            return Err(NnError::shape(
                self.name(),
                format!("(batch, {}, h, w)", self.n_channels),
                input.shape(),
            ));
        }

        let (mean, var) = if self.training {
            let mean = input.mean_axes(&STAT_AXES, true);
            let var = input.var_axes(&STAT_AXES, true);
            let m = input.reduced_count(&STAT_AXES);
            self.update_running_stats(&mean, &var, m);
            (mean, var)
        } else {
            if self.batches_seen == 0 {
                warn!(
                    "BatchNorm2d {}: evaluating with running statistics that were never trained",
                    self.id.0
                );
            }
            (self.running_mean.clone(), self.running_var.clone())
        };

        let eps = self.eps;
        let std = var.map(|v| (v + eps).sqrt());
        let normalized = input.sub(&mean).div(&std);
        let output = normalized.mul(&self.gamma.value).add(&self.beta.value);

        self.cache = Some(BatchNormCache {
            input: input.clone(),
            mean,
            var,
            normalized,
        });
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let cache = match &self.cache {
            Some(c) if c.input.shape() == output_gradient.shape() => c,
            Some(c) => {
                return Err(NnError::shape(
                    self.name(),
                    format!("{:?}", c.input.shape()),
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
        let eps = self.eps;
        let m = cache.input.reduced_count(&STAT_AXES) as f64;

        let beta_grad = output_gradient.sum_axes(&STAT_AXES, true);
        let gamma_grad = output_gradient
            .mul(&cache.normalized)
            .sum_axes(&STAT_AXES, true);

        let norm_grad = output_gradient.mul(&self.gamma.value);
        let centered = cache.input.sub(&cache.mean);

        let var_grad = norm_grad
            .mul(&centered)
            .sum_axes(&STAT_AXES, true)
            .zip_map(&cache.var, |s, v| -0.5 * (v + eps).powf(-1.5) * s);

        let std_inv = cache.var.map(|v| 1.0 / (v + eps).sqrt());

        let mean_grad = norm_grad
            .sum_axes(&STAT_AXES, true)
            .mul(&std_inv)
            .mul_scalar(-1.0)
            .add(
                &var_grad
                    .mul(&centered.mean_axes(&STAT_AXES, true))
                    .mul_scalar(-2.0),
            );

        let input_gradient = norm_grad
            .mul(&std_inv)
            .add(&centered.mul(&var_grad).mul_scalar(2.0 / m))
            .add(&mean_grad.mul_scalar(1.0 / m));

        self.gamma.set_grad(gamma_grad);
        self.beta.set_grad(beta_grad);
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
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.gamma, &mut self.beta]
    }
}
