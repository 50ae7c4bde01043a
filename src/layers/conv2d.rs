//! 2D convolution by direct sliding-window enumeration
//!
//! This module provides [`Conv2dLoops`], the reference convolution: every
//! output cell is computed by walking its receptive field, and backward is
//! the adjoint of that same walk. It also holds the geometry and parameter
//! bookkeeping shared with the matrix-multiplication variant in
//! [`crate::layers::conv2d_matmul`].

use log::debug;

use crate::error::{NnError, Result};
use crate::layers::param::{LayerId, ModelContext, ParamId, ParamRole, Parameter};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Hyperparameters of a square-kernel 2D convolution.
///
/// # Example
///
/// ```ignore
/// // 3 input channels, 8 filters, 3x3 kernel, stride 2, one pixel of padding
/// let config = Conv2dConfig::new(3, 8, 3).stride(2).padding(1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    /// Stride 1, no padding, with bias.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        assert!(kernel_size > 0, "kernel_size must be positive");
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: 0,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        assert!(stride > 0, "stride must be positive");
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Output spatial size for an unpadded input of `height × width`:
    /// `floor((padded - kernel) / stride) + 1` per axis.
    ///
    /// Returns `None` when the kernel does not fit in the padded input.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let ph = height + 2 * self.padding;
        let pw = width + 2 * self.padding;
        if height == 0 || width == 0 || ph < self.kernel_size || pw < self.kernel_size {
            return None;
        }
        Some((
            (ph - self.kernel_size) / self.stride + 1,
            (pw - self.kernel_size) / self.stride + 1,
        ))
    }
}

/// Weights, optional bias and geometry common to both convolution variants.
///
/// Weights are `(out_channels, in_channels, kernel, kernel)`; bias is
/// `(out_channels)`.
#[derive(Debug)]
pub(crate) struct ConvParams {
    pub(crate) id: LayerId,
    pub(crate) config: Conv2dConfig,
    pub(crate) weights: Parameter,
    pub(crate) bias: Option<Parameter>,
}

impl ConvParams {
    pub(crate) fn init(config: Conv2dConfig, ctx: &mut ModelContext, kind: &str) -> Self {
        let id = ctx.next_layer_id();
        let k = config.kernel_size;
        let weights = ctx.random_tensor(&[config.out_channels, config.in_channels, k, k]);
        let bias = config
            .bias
            .then(|| ctx.random_tensor(&[config.out_channels]));
        debug!(
            "{} {} created: {} -> {} channels, kernel={}, stride={}, padding={}, bias={}",
            kind,
            id.0,
            config.in_channels,
            config.out_channels,
            k,
            config.stride,
            config.padding,
            config.bias
        );
        Self::assemble(id, config, weights, bias)
    }

    pub(crate) fn from_weights(
        layer: &'static str,
        id: LayerId,
        weights: Tensor,
        bias: Option<Tensor>,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let s = weights.shape();
        if s.len() != 4 || s[2] != s[3] || s[2] == 0 {
            return Err(NnError::shape(
                layer,
                "weights (out_channels, in_channels, k, k)",
                s,
            ));
        }
        if stride == 0 {
            return Err(NnError::InvalidConfig(format!("{}: stride must be positive", layer)));
        }
        if let Some(b) = &bias {
            if b.shape() != [s[0]] {
                return Err(NnError::shape(layer, format!("bias ({})", s[0]), b.shape()));
            }
        }
        let config = Conv2dConfig::new(s[1], s[0], s[2])
            .stride(stride)
            .padding(padding)
            .bias(bias.is_some());
        Ok(Self::assemble(id, config, weights, bias))
    }

    fn assemble(id: LayerId, config: Conv2dConfig, weights: Tensor, bias: Option<Tensor>) -> Self {
        Self {
            id,
            config,
            weights: Parameter::new(ParamId::new(id, ParamRole::Weights), weights),
            bias: bias.map(|b| Parameter::new(ParamId::new(id, ParamRole::Bias), b)),
        }
    }

    /// Validate a forward input and return `(batch, out_height, out_width)`.
    pub(crate) fn check_input(
        &self,
        layer: &'static str,
        input: &Tensor,
    ) -> Result<(usize, usize, usize)> {
        let c = &self.config;
        let s = input.shape();
        let sizes = if s.len() == 4 && s[1] == c.in_channels {
            c.output_size(s[2], s[3])
        } else {
            None
        };
        match sizes {
            Some((oh, ow)) => Ok((s[0], oh, ow)),
            None => Err(NnError::shape(
                layer,
                format!(
                    "(batch, {}, h, w) with h, w + 2*{} >= {}",
                    c.in_channels, c.padding, c.kernel_size
                ),
                s,
            )),
        }
    }

    /// Validate a backward gradient against the output shape of the cached
    /// forward input.
    pub(crate) fn check_gradient(
        &self,
        layer: &'static str,
        input_shape: Option<&[usize]>,
        output_gradient: &Tensor,
    ) -> Result<()> {
        let expected = input_shape.and_then(|s| {
            self.config
                .output_size(s[2], s[3])
                .map(|(oh, ow)| vec![s[0], self.config.out_channels, oh, ow])
        });
        match expected {
            Some(e) if e == output_gradient.shape() => Ok(()),
            Some(e) => Err(NnError::shape(layer, format!("{:?}", e), output_gradient.shape())),
            None => Err(NnError::shape(
                layer,
                "a preceding forward call",
                output_gradient.shape(),
            )),
        }
    }

    pub(crate) fn parameters(&self) -> Vec<&Parameter> {
        std::iter::once(&self.weights).chain(self.bias.as_ref()).collect()
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        std::iter::once(&mut self.weights)
            .chain(self.bias.as_mut())
            .collect()
    }
}

/// 2D convolution computed with explicit nested loops.
///
/// Input `(batch, in_channels, height, width)` is zero-padded by `padding`
/// on each side; the kernel slides with `stride`.
#[derive(Debug)]
pub struct Conv2dLoops {
    params: ConvParams,
    /// Zero-padded copy of the last forward input.
    padded_input: Option<Tensor>,
    input_shape: Option<Vec<usize>>,
    training: bool,
}

impl Conv2dLoops {
    pub fn new(config: Conv2dConfig, ctx: &mut ModelContext) -> Self {
        Self::wrap(ConvParams::init(config, ctx, "Conv2dLoops"))
    }

    /// Build a layer around explicit weights `(out, in, k, k)` and bias `(out)`.
    pub fn from_weights(
        id: LayerId,
        weights: Tensor,
        bias: Option<Tensor>,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        ConvParams::from_weights("Conv2dLoops", id, weights, bias, stride, padding).map(Self::wrap)
    }

    fn wrap(params: ConvParams) -> Self {
        Self {
            params,
            padded_input: None,
            input_shape: None,
            training: true,
        }
    }

    pub fn id(&self) -> LayerId {
        self.params.id
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.params.config
    }

    pub fn weights(&self) -> &Parameter {
        &self.params.weights
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.params.bias.as_ref()
    }
}

impl Layer for Conv2dLoops {
    fn name(&self) -> &'static str {
        "Conv2dLoops"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (batch, out_h, out_w) = self.params.check_input(self.name(), input)?;
        let Conv2dConfig {
            in_channels,
            out_channels,
            kernel_size: k,
            stride,
            padding,
            ..
        } = self.params.config;

        let padded = input.pad2d(padding, 0.0);
        let (ph, pw) = (padded.shape()[2], padded.shape()[3]);
        let x = padded.data();
        let w = self.params.weights.value.data();
        let bias = self.params.bias.as_ref().map(|b| b.value.data());

        let mut output = Tensor::zeros(&[batch, out_channels, out_h, out_w]);
        let out = output.data_mut();
        for b in 0..batch {
            for oc in 0..out_channels {
                let out_base = (b * out_channels + oc) * out_h * out_w;
                for oy in 0..out_h {
                    for ox in 0..out_w {
                        let mut sum = bias.map_or(0.0, |bias| bias[oc]);
                        for ic in 0..in_channels {
                            let in_base = (b * in_channels + ic) * ph * pw;
                            let w_base = (oc * in_channels + ic) * k * k;
                            for ky in 0..k {
                                let row = in_base + (oy * stride + ky) * pw + ox * stride;
                                for kx in 0..k {
                                    sum += x[row + kx] * w[w_base + ky * k + kx];
                                }
                            }
                        }
                        out[out_base + oy * out_w + ox] = sum;
                    }
                }
            }
        }

        self.input_shape = Some(input.shape().to_vec());
        self.padded_input = Some(padded);
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        self.params
            .check_gradient(self.name(), self.input_shape.as_deref(), output_gradient)?;
        let padded = match &self.padded_input {
            Some(p) => p,
            None => {
                return Err(NnError::shape(
                    self.name(),
                    "a preceding forward call",
                    output_gradient.shape(),
                ))
            }
        };
        let Conv2dConfig {
            in_channels,
            out_channels,
            kernel_size: k,
            stride,
            padding,
            ..
        } = self.params.config;
        let go = output_gradient.shape();
        let (batch, out_h, out_w) = (go[0], go[2], go[3]);
        let (ph, pw) = (padded.shape()[2], padded.shape()[3]);

        let x = padded.data();
        let g = output_gradient.data();
        let w = self.params.weights.value.data();

        let mut grad_padded = Tensor::zeros_like(padded);
        let mut grad_w = Tensor::zeros_like(&self.params.weights.value);
        let mut grad_b = vec![0.0; out_channels];
        {
            let gx = grad_padded.data_mut();
            let gw = grad_w.data_mut();
            for b in 0..batch {
                for oc in 0..out_channels {
                    let g_base = (b * out_channels + oc) * out_h * out_w;
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let grad = g[g_base + oy * out_w + ox];
                            grad_b[oc] += grad;
                            for ic in 0..in_channels {
                                let in_base = (b * in_channels + ic) * ph * pw;
                                let w_base = (oc * in_channels + ic) * k * k;
                                for ky in 0..k {
                                    let row = in_base + (oy * stride + ky) * pw + ox * stride;
                                    for kx in 0..k {
                                        let wi = w_base + ky * k + kx;
                                        gx[row + kx] += w[wi] * grad;
                                        gw[wi] += x[row + kx] * grad;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        self.params.weights.set_grad(grad_w);
        if let Some(bias) = &mut self.params.bias {
            bias.set_grad(Tensor::new(grad_b, vec![out_channels]));
        }
        Ok(grad_padded.crop2d(padding))
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
        self.params.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.parameters_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv2d_config_output_size() {
        let config = Conv2dConfig::new(1, 8, 3).padding(1);
        assert_eq!(config.output_size(28, 28), Some((28, 28)));
        let config = Conv2dConfig::new(1, 8, 3).stride(2).padding(1);
        assert_eq!(config.output_size(5, 5), Some((3, 3)));
        assert_eq!(Conv2dConfig::new(1, 1, 5).output_size(3, 3), None);
    }

    #[test]
    fn test_conv2d_parameter_count() {
        let mut ctx = ModelContext::new(42);
        let layer = Conv2dLoops::new(Conv2dConfig::new(1, 8, 3).padding(1), &mut ctx);

        // weights: 8 * 1 * 3 * 3 = 72, biases: 8
        assert_eq!(layer.parameter_count(), 80);
        assert_eq!(layer.bias().map(|b| b.shape().to_vec()), Some(vec![8]));
    }

    #[test]
    fn test_conv2d_without_bias() {
        let mut ctx = ModelContext::new(42);
        let layer = Conv2dLoops::new(Conv2dConfig::new(2, 4, 3).bias(false), &mut ctx);
        let ids: Vec<String> = layer.parameters().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["dW0"]);
    }

    #[test]
    fn test_forward_known_values() {
        // 1x1x3x3 input, single 2x2 filter of ones: each output sums a 2x2 window.
        let input = Tensor::from_fn(&[1, 1, 3, 3], |i| i as f64);
        let weights = Tensor::ones(&[1, 1, 2, 2]);
        let bias = Tensor::new(vec![1.0], vec![1]);
        let mut layer = Conv2dLoops::from_weights(LayerId(0), weights, Some(bias), 1, 0).unwrap();
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 2]);
        assert_eq!(out.data(), &[9.0, 13.0, 21.0, 25.0]);
    }

    #[test]
    fn test_padding_preserves_spatial_size() {
        let mut ctx = ModelContext::new(3);
        let mut layer = Conv2dLoops::new(Conv2dConfig::new(2, 3, 3).padding(1), &mut ctx);
        let out = layer.forward(&Tensor::ones(&[2, 2, 5, 5])).unwrap();
        assert_eq!(out.shape(), &[2, 3, 5, 5]);
        let grad = layer.backward(&Tensor::ones(out.shape())).unwrap();
        assert_eq!(grad.shape(), &[2, 2, 5, 5]);
    }

    #[test]
    fn test_wrong_channel_count_is_rejected() {
        let mut ctx = ModelContext::new(3);
        let mut layer = Conv2dLoops::new(Conv2dConfig::new(2, 3, 3), &mut ctx);
        let err = layer.forward(&Tensor::ones(&[1, 3, 5, 5])).unwrap_err();
        assert!(matches!(err, NnError::ShapeMismatch { layer: "Conv2dLoops", .. }));
    }

    #[test]
    fn test_backward_rejects_incongruent_gradient() {
        let mut ctx = ModelContext::new(3);
        let mut layer = Conv2dLoops::new(Conv2dConfig::new(1, 2, 3), &mut ctx);
        layer.forward(&Tensor::ones(&[1, 1, 4, 4])).unwrap();
        assert!(layer.backward(&Tensor::ones(&[1, 2, 3, 3])).is_err());
        assert!(layer.backward(&Tensor::ones(&[1, 2, 2, 2])).is_ok());
    }
}
