//! Elementwise and row-wise activation layers
//!
//! None of these own parameters. Each caches what its backward needs: the
//! input for ReLU, the output for Sigmoid and SoftMax, just the shape for
//! the identity.

use crate::error::{NnError, Result};
use crate::layers::Layer;
use crate::tensor::Tensor;
use crate::utils::activations::{relu, sigmoid, sigmoid_derivative, softmax_rows};

/// Fetch the tensor cached by forward, checking the gradient is congruent.
fn cached<'a>(
    layer: &'static str,
    cache: &'a Option<Tensor>,
    output_gradient: &Tensor,
) -> Result<&'a Tensor> {
    match cache {
        Some(t) if t.shape() == output_gradient.shape() => Ok(t),
        Some(t) => Err(NnError::shape(
            layer,
            format!("{:?}", t.shape()),
            output_gradient.shape(),
        )),
        None => Err(NnError::shape(
            layer,
            "a preceding forward call",
            output_gradient.shape(),
        )),
    }
}

macro_rules! training_flag {
    () => {
        fn set_training(&mut self, training: bool) {
            self.training = training;
        }

        fn is_training(&self) -> bool {
            self.training
        }
    };
}

macro_rules! default_via_new {
    ($($ty:ident),*) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    Self::new()
                }
            }
        )*
    };
}

default_via_new!(ReLU, Sigmoid, LinearActivation, SoftMax);

/// max(0, x). Gradient passes only where the input was strictly positive.
#[derive(Debug)]
pub struct ReLU {
    input: Option<Tensor>,
    training: bool,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            input: None,
            training: true,
        }
    }
}

impl Layer for ReLU {
    fn name(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input = Some(input.clone());
        Ok(input.map(relu))
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let input = cached(self.name(), &self.input, output_gradient)?;
        Ok(output_gradient.zip_map(input, |g, x| if x > 0.0 { g } else { 0.0 }))
    }

    training_flag!();
}

/// 1 / (1 + e^-x). Backward is `g · s · (1 - s)` using the cached output.
#[derive(Debug)]
pub struct Sigmoid {
    output: Option<Tensor>,
    training: bool,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self {
            output: None,
            training: true,
        }
    }
}

impl Layer for Sigmoid {
    fn name(&self) -> &'static str {
        "Sigmoid"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let output = input.map(sigmoid);
        self.output = Some(output.clone());
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let output = cached(self.name(), &self.output, output_gradient)?;
        Ok(output_gradient.zip_map(output, |g, s| g * sigmoid_derivative(s)))
    }

    training_flag!();
}

/// Identity activation.
#[derive(Debug)]
pub struct LinearActivation {
    input_shape: Option<Vec<usize>>,
    training: bool,
}

impl LinearActivation {
    pub fn new() -> Self {
        Self {
            input_shape: None,
            training: true,
        }
    }
}

impl Layer for LinearActivation {
    fn name(&self) -> &'static str {
        "LinearActivation"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input_shape = Some(input.shape().to_vec());
        Ok(input.clone())
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        match &self.input_shape {
            Some(s) if s.as_slice() == output_gradient.shape() => Ok(output_gradient.clone()),
            Some(s) => Err(NnError::shape(self.name(), format!("{:?}", s), output_gradient.shape())),
            None => Err(NnError::shape(
                self.name(),
                "a preceding forward call",
                output_gradient.shape(),
            )),
        }
    }

    training_flag!();
}

/// Row-wise softmax over `(batch, classes)`.
///
/// Backward is the diagonal approximation `g · s · (1 - s)`, not the full
/// Jacobian-vector product. Pair the raw logits with
/// [`crate::loss::CrossEntropyLossWithSoftMax`] for exact gradients.
#[derive(Debug)]
pub struct SoftMax {
    output: Option<Tensor>,
    training: bool,
}

impl SoftMax {
    pub fn new() -> Self {
        Self {
            output: None,
            training: true,
        }
    }
}

/// Row-wise softmax of a `(rows, cols)` tensor.
pub fn softmax(input: &Tensor) -> Tensor {
    let (rows, cols) = (input.shape()[0], input.shape()[1]);
    let mut data = input.data().to_vec();
    softmax_rows(&mut data, rows, cols);
    Tensor::new(data, vec![rows, cols])
}

impl Layer for SoftMax {
    fn name(&self) -> &'static str {
        "SoftMax"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 2 {
            return Err(NnError::shape(self.name(), "(batch, classes)", input.shape()));
        }
        let output = softmax(input);
        self.output = Some(output.clone());
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor) -> Result<Tensor> {
        let output = cached(self.name(), &self.output, output_gradient)?;
        Ok(output_gradient.zip_map(output, |g, s| g * s * (1.0 - s)))
    }

    training_flag!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_masks_non_positive_inputs() {
        let mut relu = ReLU::new();
        let x = Tensor::new(vec![-1.0, 0.0, 2.0, 3.0], vec![2, 2]);
        assert_eq!(relu.forward(&x).unwrap().data(), &[0.0, 0.0, 2.0, 3.0]);
        let g = relu.backward(&Tensor::full(&[2, 2], 5.0)).unwrap();
        assert_eq!(g.data(), &[0.0, 0.0, 5.0, 5.0]);
    }

    #[test]
    fn test_sigmoid_backward_uses_output() {
        let mut s = Sigmoid::new();
        s.forward(&Tensor::zeros(&[1, 3])).unwrap();
        let g = s.backward(&Tensor::ones(&[1, 3])).unwrap();
        assert!(g.data().iter().all(|&v| (v - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_linear_is_identity() {
        let mut l = LinearActivation::new();
        let x = Tensor::from_fn(&[2, 3], |i| i as f64 - 2.0);
        assert_eq!(l.forward(&x).unwrap(), x);
        assert_eq!(l.backward(&x).unwrap(), x);
        assert!(l.backward(&Tensor::zeros(&[3, 2])).is_err());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut sm = SoftMax::new();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0], vec![2, 3]);
        let y = sm.forward(&x).unwrap();
        let sums = y.sum_axes(&[1], false);
        assert!(sums.approx_eq(&Tensor::ones(&[2]), 1e-12));
    }

    #[test]
    fn test_softmax_backward_is_diagonal_approximation() {
        let mut sm = SoftMax::new();
        let y = sm.forward(&Tensor::new(vec![0.5, -0.5], vec![1, 2])).unwrap();
        let g = sm.backward(&Tensor::new(vec![1.0, 0.0], vec![1, 2])).unwrap();
        let s0 = y.data()[0];
        assert!((g.data()[0] - s0 * (1.0 - s0)).abs() < 1e-12);
        // The exact Jacobian would give -s0*s1 here.
        assert_eq!(g.data()[1], 0.0);
    }

    #[test]
    fn test_backward_before_forward_fails() {
        assert!(ReLU::new().backward(&Tensor::ones(&[1, 1])).is_err());
        assert!(Sigmoid::new().backward(&Tensor::ones(&[1, 1])).is_err());
        assert!(SoftMax::new().backward(&Tensor::ones(&[1, 1])).is_err());
    }
}
