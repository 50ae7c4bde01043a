//! Pooling layers: windowed max pooling and global average pooling

use log::debug;

use crate::error::{NnError, Result};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// 2D max pooling over square windows.
///
/// Input is padded with negative infinity by default so that padded cells
/// never win a window; with `use_neg_inf_for_padding = false` it is padded
/// with zeros instead.
///
/// Backward routes each upstream value to every position that attained the
/// window maximum. Tied maxima each receive the full upstream value.
#[derive(Debug)]
pub struct MaxPool2d {
    kernel_size: usize,
    stride: usize,
    padding: usize,
    use_neg_inf_for_padding: bool,
    padded_input: Option<Tensor>,
    input_shape: Option<Vec<usize>>,
    training: bool,
}

impl MaxPool2d {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self::with_padding(kernel_size, stride, 0, true)
    }

    pub fn with_padding(
        kernel_size: usize,
        stride: usize,
        padding: usize,
        use_neg_inf_for_padding: bool,
    ) -> Self {
        assert!(kernel_size > 0 && stride > 0, "kernel_size and stride must be positive");
        debug!(
            "MaxPool2d created: kernel={}, stride={}, padding={}",
            kernel_size, stride, padding
        );
        Self {
            kernel_size,
            stride,
            padding,
            use_neg_inf_for_padding,
            padded_input: None,
            input_shape: None,
            training: true,
        }
    }

    fn fill(&self) -> f64 {
        if self.use_neg_inf_for_padding {
            f64::NEG_INFINITY
        } else {
            0.0
        }
    }

    fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
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

    /// Maximum of one window of `padded` starting at flat offset `base`.
    fn window_max(&self, x: &[f64], base: usize, row_len: usize) -> f64 {
        let mut max = f64::NEG_INFINITY;
        for ky in 0..self.kernel_size {
            for kx in 0..self.kernel_size {
                max = max.max(x[base + ky * row_len + kx]);
            }
        }
        max
    }
}

impl Layer for MaxPool2d {
    fn name(&self) -> &'static str {
        "MaxPool2d"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let s = input.shape();
        let sizes = if s.len() == 4 { self.output_size(s[2], s[3]) } else { None };
        let (out_h, out_w) = sizes.ok_or_else(|| {
            NnError::shape(
                self.name(),
                format!("(batch, channels, h, w) with h, w + 2*{} >= {}", self.padding, self.kernel_size),
                s,
            )
        })?;
        let (batch, channels) = (s[0], s[1]);

        let padded = input.pad2d(self.padding, self.fill());
        let (ph, pw) = (padded.shape()[2], padded.shape()[3]);
        let x = padded.data();

        let mut output = Tensor::zeros(&[batch, channels, out_h, out_w]);
        let out = output.data_mut();
        for plane in 0..batch * channels {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let base = plane * ph * pw + oy * self.stride * pw + ox * self.stride;
                    out[(plane * out_h + oy) * out_w + ox] = self.window_max(x, base, pw);
                }
            }
        }

        self.input_shape = Some(s.to_vec());
        self.padded_input = Some(padded);
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let (padded, input_shape) = match (&self.padded_input, &self.input_shape) {
            (Some(p), Some(s)) => (p, s),
            _ => {
                return Err(NnError::shape(
                    self.name(),
                    "a preceding forward call",
                    output_gradient.shape(),
                ))
            }
        };
        let (out_h, out_w) = self
            .output_size(input_shape[2], input_shape[3])
            .unwrap_or((0, 0));
        let expected = [input_shape[0], input_shape[1], out_h, out_w];
        if output_gradient.shape() != expected {
            return Err(NnError::shape(
                self.name(),
                format!("{:?}", expected),
                output_gradient.shape(),
            ));
        }

        let (ph, pw) = (padded.shape()[2], padded.shape()[3]);
        let x = padded.data();
        let g = output_gradient.data();
        let mut grad_padded = Tensor::zeros_like(padded);
        let gx = grad_padded.data_mut();
        for plane in 0..input_shape[0] * input_shape[1] {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let base = plane * ph * pw + oy * self.stride * pw + ox * self.stride;
                    let max = self.window_max(x, base, pw);
                    let upstream = g[(plane * out_h + oy) * out_w + ox];
                    for ky in 0..self.kernel_size {
                        for kx in 0..self.kernel_size {
                            let at = base + ky * pw + kx;
                            if x[at] == max {
                                gx[at] += upstream;
                            }
                        }
                    }
                }
            }
        }
        Ok(grad_padded.crop2d(self.padding))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Averages each channel over its spatial extent: `(n, c, h, w) -> (n, c)`.
#[derive(Debug)]
pub struct GlobalAveragePooling {
    input_shape: Option<Vec<usize>>,
    training: bool,
}

impl GlobalAveragePooling {
    pub fn new() -> Self {
        Self {
            input_shape: None,
            training: true,
        }
    }
}

impl Default for GlobalAveragePooling {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for GlobalAveragePooling {
    fn name(&self) -> &'static str {
        "GlobalAveragePooling"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 4 || input.shape()[2] * input.shape()[3] == 0 {
            return Err(NnError::shape(self.name(), "(batch, channels, h, w)", input.shape()));
        }
        self.input_shape = Some(input.shape().to_vec());
        Ok(input.mean_axes(&[2, 3], false))
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let shape = match &self.input_shape {
            Some(s) if output_gradient.shape() == &s[..2] => s,
            Some(s) => {
                return Err(NnError::shape(
                    self.name(),
                    format!("{:?}", &s[..2]),
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
        let scale = 1.0 / (shape[2] * shape[3]) as f64;
        Ok(output_gradient
            .reshape(&[shape[0], shape[1], 1, 1])
            .broadcast_to(shape)
            .mul_scalar(scale))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
