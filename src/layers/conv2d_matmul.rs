//! 2D convolution expressed as a single matrix multiplication
//!
//! The padded input is unfolded (im2col) into a matrix whose columns are the
//! flattened receptive fields, ordered batch-major, then output row, then
//! output column. Each filter becomes one row of a 2-D weight matrix, so the
//! whole convolution is `weights_2d · columns`. Backward multiplies through
//! the same matrices and folds the column gradient back into image shape,
//! accumulating where windows overlap.
//!
//! Results match [`crate::layers::Conv2dLoops`] to floating-point tolerance.

use crate::error::{NnError, Result};
use crate::layers::conv2d::{Conv2dConfig, ConvParams};
use crate::layers::param::{LayerId, ModelContext, Parameter};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Unfold a padded `(batch, channels, h, w)` tensor into
/// `(channels·k·k, batch·out_h·out_w)` columns.
pub fn im2col(padded: &Tensor, kernel_size: usize, stride: usize) -> Tensor {
    let s = padded.shape();
    let (batch, channels, h, w) = (s[0], s[1], s[2], s[3]);
    let k = kernel_size;
    let out_h = (h - k) / stride + 1;
    let out_w = (w - k) / stride + 1;
    let rows = channels * k * k;
    let cols = batch * out_h * out_w;

    let x = padded.data();
    let mut out = vec![0.0; rows * cols];
    let mut col = 0;
    for b in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut row = 0;
                for c in 0..channels {
                    let base = (b * channels + c) * h * w;
                    for ky in 0..k {
                        let src = base + (oy * stride + ky) * w + ox * stride;
                        for kx in 0..k {
                            out[row * cols + col] = x[src + kx];
                            row += 1;
                        }
                    }
                }
                col += 1;
            }
        }
    }
    Tensor::new(out, vec![rows, cols])
}

/// Inverse enumeration of [`im2col`]: scatter-add every column back into its
/// receptive field of a zero tensor shaped `padded_shape`.
pub fn col2im(columns: &Tensor, padded_shape: &[usize], kernel_size: usize, stride: usize) -> Tensor {
    let (batch, channels, h, w) = (
        padded_shape[0],
        padded_shape[1],
        padded_shape[2],
        padded_shape[3],
    );
    let k = kernel_size;
    let out_h = (h - k) / stride + 1;
    let out_w = (w - k) / stride + 1;
    let cols = columns.shape()[1];
    debug_assert_eq!(cols, batch * out_h * out_w);
    debug_assert_eq!(columns.shape()[0], channels * k * k);

    let src = columns.data();
    let mut image = Tensor::zeros(padded_shape);
    let dst = image.data_mut();
    let mut col = 0;
    for b in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut row = 0;
                for c in 0..channels {
                    let base = (b * channels + c) * h * w;
                    for ky in 0..k {
                        let at = base + (oy * stride + ky) * w + ox * stride;
                        for kx in 0..k {
                            dst[at + kx] += src[row * cols + col];
                            row += 1;
                        }
                    }
                }
                col += 1;
            }
        }
    }
    image
}

#[derive(Debug)]
struct Unfolded {
    columns: Tensor,
    input_shape: Vec<usize>,
}

/// 2D convolution via im2col and matrix multiplication.
///
/// Same parameters and shapes as [`crate::layers::Conv2dLoops`]. The unfolded
/// input is released after backward, so a second backward without a new
/// forward is rejected.
#[derive(Debug)]
pub struct Conv2d {
    params: ConvParams,
    cache: Option<Unfolded>,
    training: bool,
}

impl Conv2d {
    pub fn new(config: Conv2dConfig, ctx: &mut ModelContext) -> Self {
        Self::wrap(ConvParams::init(config, ctx, "Conv2d"))
    }

    /// Build a layer around explicit weights `(out, in, k, k)` and bias `(out)`.
    pub fn from_weights(
        id: LayerId,
        weights: Tensor,
        bias: Option<Tensor>,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        ConvParams::from_weights("Conv2d", id, weights, bias, stride, padding).map(Self::wrap)
    }

    fn wrap(params: ConvParams) -> Self {
        Self {
            params,
            cache: None,
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

    /// Filters flattened to rows: `(out_channels, in_channels·k·k)`.
    fn weights_2d(&self) -> Tensor {
        let c = &self.params.config;
        self.params
            .weights
            .value
            .reshape(&[c.out_channels, c.in_channels * c.kernel_size * c.kernel_size])
    }
}

impl Layer for Conv2d {
    fn name(&self) -> &'static str {
        "Conv2d"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (batch, out_h, out_w) = self.params.check_input(self.name(), input)?;
        let config = self.params.config;

        let padded = input.pad2d(config.padding, 0.0);
        let columns = im2col(&padded, config.kernel_size, config.stride);
        let mut out = self.weights_2d().matmul(&columns);
        if let Some(bias) = &self.params.bias {
            out = out.add(&bias.value.reshape(&[config.out_channels, 1]));
        }
        let output = out
            .into_reshape(&[config.out_channels, batch, out_h, out_w])
            .permute(&[1, 0, 2, 3]);

        self.cache = Some(Unfolded {
            columns,
            input_shape: input.shape().to_vec(),
        });
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let input_shape = self.cache.as_ref().map(|c| c.input_shape.as_slice());
        self.params
            .check_gradient(self.name(), input_shape, output_gradient)?;
        let Unfolded {
            columns,
            input_shape,
        } = match self.cache.take() {
            Some(cache) => cache,
            None => {
                return Err(NnError::shape(
                    self.name(),
                    "a preceding forward call",
                    output_gradient.shape(),
                ))
            }
        };
        let config = self.params.config;

        // (out_channels, batch·out_h·out_w), same column order as `columns`
        let grad_2d = output_gradient
            .permute(&[1, 0, 2, 3])
            .into_reshape(&[config.out_channels, columns.shape()[1]]);

        let grad_w = grad_2d
            .matmul(&columns.transpose())
            .into_reshape(self.params.weights.shape());
        let grad_columns = self.weights_2d().transpose().matmul(&grad_2d);

        self.params.weights.set_grad(grad_w);
        if let Some(bias) = &mut self.params.bias {
            bias.set_grad(grad_2d.sum_axes(&[1], false));
        }

        let p = config.padding;
        let padded_shape = [
            input_shape[0],
            input_shape[1],
            input_shape[2] + 2 * p,
            input_shape[3] + 2 * p,
        ];
        let grad_padded = col2im(&grad_columns, &padded_shape, config.kernel_size, config.stride);
        Ok(grad_padded.crop2d(p))
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
    fn test_im2col_column_order() {
        // batch 2, one channel, 2x2 image, 1x1 kernel: columns are just pixels
        // in batch, row, column order.
        let x = Tensor::from_fn(&[2, 1, 2, 2], |i| i as f64);
        let cols = im2col(&x, 1, 1);
        assert_eq!(cols.shape(), &[1, 8]);
        assert_eq!(cols.data(), x.data());
    }

    #[test]
    fn test_im2col_window_contents() {
        let x = Tensor::from_fn(&[1, 1, 3, 3], |i| i as f64);
        let cols = im2col(&x, 2, 1);
        assert_eq!(cols.shape(), &[4, 4]);
        // First column is the top-left window [0, 1, 3, 4].
        let first: Vec<f64> = (0..4).map(|r| cols.get(&[r, 0])).collect();
        assert_eq!(first, vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_col2im_accumulates_overlaps() {
        let shape = [1, 1, 3, 3];
        let cols = im2col(&Tensor::ones(&shape), 2, 1);
        let folded = col2im(&cols, &shape, 2, 1);
        // Centre pixel belongs to all four windows, corners to one.
        assert_eq!(folded.get(&[0, 0, 1, 1]), 4.0);
        assert_eq!(folded.get(&[0, 0, 0, 0]), 1.0);
        assert_eq!(folded.get(&[0, 0, 0, 1]), 2.0);
    }

    #[test]
    fn test_unfolded_input_released_after_backward() {
        let mut ctx = ModelContext::new(5);
        let mut layer = Conv2d::new(Conv2dConfig::new(1, 2, 3), &mut ctx);
        let out = layer.forward(&Tensor::ones(&[1, 1, 4, 4])).unwrap();
        assert!(layer.cache.is_some());
        layer.backward(&Tensor::ones(out.shape())).unwrap();
        assert!(layer.cache.is_none());
        let err = layer.backward(&Tensor::ones(out.shape())).unwrap_err();
        assert!(matches!(err, NnError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_forward_known_values() {
        let input = Tensor::from_fn(&[1, 1, 3, 3], |i| i as f64);
        let weights = Tensor::ones(&[1, 1, 2, 2]);
        let bias = Tensor::new(vec![1.0], vec![1]);
        let mut layer = Conv2d::from_weights(LayerId(0), weights, Some(bias), 1, 0).unwrap();
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.data(), &[9.0, 13.0, 21.0, 25.0]);
    }
}
