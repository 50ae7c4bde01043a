//! Finite-difference gradient checking
//!
//! A layer's backward is checked against centered differences of the scalar
//! objective `f(x) = Σ forward(x) ⊙ upstream`. Its analytic gradient with
//! respect to the input is exactly `backward(upstream)`, and the gradient with
//! respect to each parameter is what backward stores on that parameter.

use crate::error::Result;
use crate::layers::Layer;
use crate::tensor::Tensor;

/// Default perturbation for centered differences.
pub const DEFAULT_STEP: f64 = 1e-5;

/// Denominator floor used by [`max_relative_error`].
pub const RELATIVE_ERROR_FLOOR: f64 = 1e-5;

fn objective(layer: &mut dyn Layer, input: &Tensor, upstream: &Tensor) -> Result<f64> {
    Ok(layer.forward(input)?.mul(upstream).sum())
}

/// Run forward then backward once and return the input gradient together
/// with every parameter gradient, in [`Layer::parameters`] order.
pub fn analytic_gradients(
    layer: &mut dyn Layer,
    input: &Tensor,
    upstream: &Tensor,
) -> Result<(Tensor, Vec<Option<Tensor>>)> {
    layer.forward(input)?;
    let input_gradient = layer.backward(upstream)?;
    let parameter_gradients = layer.parameters().iter().map(|p| p.grad.clone()).collect();
    Ok((input_gradient, parameter_gradients))
}

/// Centered-difference estimate of `∂f/∂input`.
pub fn numerical_input_gradient(
    layer: &mut dyn Layer,
    input: &Tensor,
    upstream: &Tensor,
    step: f64,
) -> Result<Tensor> {
    let mut probe = input.clone();
    let mut grad = Tensor::zeros_like(input);
    for i in 0..input.len() {
        let original = probe.data()[i];
        probe.data_mut()[i] = original + step;
        let plus = objective(layer, &probe, upstream)?;
        probe.data_mut()[i] = original - step;
        let minus = objective(layer, &probe, upstream)?;
        probe.data_mut()[i] = original;
        grad.data_mut()[i] = (plus - minus) / (2.0 * step);
    }
    Ok(grad)
}

/// Centered-difference estimate of `∂f/∂θ` for the parameter at `index` in
/// [`Layer::parameters`] order. The parameter is restored afterwards.
///
/// # Panics
///
/// Panics if `index` is out of range.
pub fn numerical_parameter_gradient(
    layer: &mut dyn Layer,
    index: usize,
    input: &Tensor,
    upstream: &Tensor,
    step: f64,
) -> Result<Tensor> {
    let len = layer.parameters()[index].value.len();
    let shape = layer.parameters()[index].shape().to_vec();
    let mut grad = Tensor::zeros(&shape);
    for i in 0..len {
        let original = layer.parameters()[index].value.data()[i];

        layer.parameters_mut()[index].value.data_mut()[i] = original + step;
        let plus = objective(layer, input, upstream)?;
        layer.parameters_mut()[index].value.data_mut()[i] = original - step;
        let minus = objective(layer, input, upstream)?;
        layer.parameters_mut()[index].value.data_mut()[i] = original;

        grad.data_mut()[i] = (plus - minus) / (2.0 * step);
    }
    Ok(grad)
}

/// Largest elementwise `|a - b| / max(|a|, |b|, RELATIVE_ERROR_FLOOR)`.
///
/// Returns infinity when the shapes differ.
pub fn max_relative_error(a: &Tensor, b: &Tensor) -> f64 {
    if a.shape() != b.shape() {
        return f64::INFINITY;
    }
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs() / x.abs().max(y.abs()).max(RELATIVE_ERROR_FLOOR))
        .fold(0.0, f64::max)
}
