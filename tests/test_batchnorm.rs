// Integration tests for batch normalization layer.
// Tests batch statistics, running-statistic updates and eval-mode behaviour.

use approx::assert_relative_eq;
use manual_backprop::layers::{
    BatchNorm2d, Conv2d, Conv2dConfig, Layer, ModelContext, ReLU, Sequential,
};
use manual_backprop::tensor::Tensor;
use manual_backprop::utils::SimpleRng;
use manual_backprop::NnError;

const AXES: [usize; 3] = [0, 2, 3];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn layer(n_channels: usize) -> BatchNorm2d {
    BatchNorm2d::new(n_channels, &mut ModelContext::new(0))
}

fn sample(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = SimpleRng::new(seed);
    Tensor::from_fn(shape, |_| rng.gen_range_f64(-3.0, 5.0))
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_batchnorm_initialization() {
    let layer = layer(4);
    assert_eq!(layer.n_channels(), 4);
    assert_eq!(layer.momentum(), 0.1);
    assert_eq!(layer.eps(), 1e-5);
    assert!(layer.is_training());
    assert_eq!(layer.parameter_count(), 8);

    assert_eq!(layer.gamma().value, Tensor::ones(&[1, 4, 1, 1]));
    assert_eq!(layer.beta().value, Tensor::zeros(&[1, 4, 1, 1]));
    assert_eq!(layer.running_mean(), &Tensor::zeros(&[1, 4, 1, 1]));
    assert_eq!(layer.running_var(), &Tensor::ones(&[1, 4, 1, 1]));

    let ids: Vec<String> = layer.parameters().iter().map(|p| p.id().to_string()).collect();
    assert_eq!(ids, vec!["g0", "b0"]);
}

#[test]
#[should_panic(expected = "eps must be positive")]
fn test_batchnorm_rejects_zero_eps() {
    BatchNorm2d::with_hyperparameters(2, 0.1, 0.0, &mut ModelContext::new(0));
}

#[test]
#[should_panic(expected = "momentum must be in range")]
fn test_batchnorm_rejects_momentum_above_one() {
    BatchNorm2d::with_hyperparameters(2, 1.5, 1e-5, &mut ModelContext::new(0));
}

// ============================================================================
// Training-mode Statistics
// ============================================================================

#[test]
fn test_training_mode_normalizes_each_channel() {
    let mut layer = layer(3);
    let output = layer.forward(&sample(&[4, 3, 5, 5], 1)).unwrap();

    let mean = output.mean_axes(&AXES, false);
    let var = output.var_axes(&AXES, false);
    for c in 0..3 {
        assert!(mean.data()[c].abs() < 1e-10, "channel {} mean {}", c, mean.data()[c]);
        // eps keeps the variance a hair below one.
        assert_relative_eq!(var.data()[c], 1.0, epsilon = 1e-4);
    }
}

#[test]
fn test_scale_and_shift_apply_after_normalization() {
    let mut layer = layer(2);
    layer.parameters_mut()[0].value = Tensor::new(vec![2.0, 0.5], vec![1, 2, 1, 1]);
    layer.parameters_mut()[1].value = Tensor::new(vec![1.0, -3.0], vec![1, 2, 1, 1]);
    let output = layer.forward(&sample(&[3, 2, 4, 4], 2)).unwrap();

    let mean = output.mean_axes(&AXES, false);
    let var = output.var_axes(&AXES, false);
    assert_relative_eq!(mean.data()[0], 1.0, epsilon = 1e-10);
    assert_relative_eq!(mean.data()[1], -3.0, epsilon = 1e-10);
    assert_relative_eq!(var.data()[0], 4.0, epsilon = 1e-3);
    assert_relative_eq!(var.data()[1], 0.25, epsilon = 1e-4);
}

#[test]
fn test_running_statistics_after_one_step() {
    let mut layer = layer(1);
    // m = 4 elements: mean 2.5, population variance 1.25, Bessel factor 4/3.
    let input = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 1, 1, 2]);
    layer.forward(&input).unwrap();

    assert_relative_eq!(layer.running_mean().data()[0], 0.1 * 2.5, epsilon = 1e-12);
    assert_relative_eq!(
        layer.running_var().data()[0],
        0.1 * 1.25 * 4.0 / 3.0 + 0.9 * 1.0,
        epsilon = 1e-12
    );
}

#[test]
fn test_running_statistics_blend_with_prior() {
    let mut layer = BatchNorm2d::with_hyperparameters(2, 0.3, 1e-5, &mut ModelContext::new(0));
    let first = sample(&[2, 2, 3, 3], 3);
    let second = sample(&[2, 2, 3, 3], 4);
    layer.forward(&first).unwrap();
    let prior_mean = layer.running_mean().clone();
    let prior_var = layer.running_var().clone();

    layer.forward(&second).unwrap();
    let m = 18.0;
    let batch_mean = second.mean_axes(&AXES, true);
    let batch_var = second.var_axes(&AXES, true);
    for c in 0..2 {
        let expected_mean = 0.3 * batch_mean.data()[c] + 0.7 * prior_mean.data()[c];
        let expected_var =
            0.3 * batch_var.data()[c] * m / (m - 1.0) + 0.7 * prior_var.data()[c];
        assert_relative_eq!(layer.running_mean().data()[c], expected_mean, epsilon = 1e-12);
        assert_relative_eq!(layer.running_var().data()[c], expected_var, epsilon = 1e-12);
    }
}

#[test]
fn test_single_element_per_channel_skips_bessel_correction() {
    init_logger();
    let mut layer = layer(2);
    let input = Tensor::new(vec![3.0, -1.0], vec![1, 2, 1, 1]);
    let output = layer.forward(&input).unwrap();
    // Zero variance: every output collapses to beta.
    assert!(output.data().iter().all(|v| v.abs() < 1e-12));
    assert_relative_eq!(layer.running_mean().data()[0], 0.3, epsilon = 1e-12);
    assert_relative_eq!(layer.running_var().data()[0], 0.9, epsilon = 1e-12);
}

// ============================================================================
// Evaluation Mode
// ============================================================================

#[test]
fn test_eval_mode_uses_running_statistics() {
    let mut layer = layer(1);
    for seed in 5..10 {
        layer.forward(&sample(&[4, 1, 3, 3], seed)).unwrap();
    }
    let mean = layer.running_mean().data()[0];
    let var = layer.running_var().data()[0];

    layer.set_training(false);
    let input = sample(&[2, 1, 3, 3], 10);
    let output = layer.forward(&input).unwrap();
    for (x, y) in input.data().iter().zip(output.data()) {
        assert_relative_eq!(*y, (x - mean) / (var + 1e-5).sqrt(), epsilon = 1e-12);
    }
    // Running statistics are frozen outside training.
    assert_eq!(layer.running_mean().data()[0], mean);
    assert_eq!(layer.running_var().data()[0], var);
}

#[test]
fn test_eval_before_training_is_near_identity() {
    init_logger();
    let mut layer = layer(2);
    layer.set_training(false);
    let input = sample(&[1, 2, 2, 2], 11);
    let output = layer.forward(&input).unwrap();
    assert!(output.approx_eq(&input.mul_scalar(1.0 / (1.0 + 1e-5f64).sqrt()), 1e-12));
}

// ============================================================================
// Backward and Errors
// ============================================================================

#[test]
fn test_backward_parameter_gradients() {
    let mut layer = layer(2);
    let input = sample(&[2, 2, 2, 2], 12);
    layer.forward(&input).unwrap();
    let input_gradient = layer.backward(&Tensor::ones(&[2, 2, 2, 2])).unwrap();

    // A constant upstream gradient only moves the shift.
    let beta_grad = layer.beta().grad.as_ref().unwrap();
    let gamma_grad = layer.gamma().grad.as_ref().unwrap();
    assert_eq!(beta_grad.shape(), &[1, 2, 1, 1]);
    assert_relative_eq!(beta_grad.data()[0], 8.0);
    assert!(gamma_grad.data().iter().all(|g| g.abs() < 1e-10));
    assert!(input_gradient.data().iter().all(|g| g.abs() < 1e-10));
}

#[test]
fn test_wrong_channel_count() {
    let mut layer = layer(3);
    assert!(matches!(
        layer.forward(&Tensor::zeros(&[1, 2, 2, 2])),
        Err(NnError::ShapeMismatch { .. })
    ));
    assert!(layer.forward(&Tensor::zeros(&[3, 4])).is_err());
}

#[test]
fn test_backward_requires_matching_forward() {
    let mut layer = layer(1);
    assert!(layer.backward(&Tensor::zeros(&[1, 1, 2, 2])).is_err());
    layer.forward(&sample(&[1, 1, 2, 2], 13)).unwrap();
    assert!(layer.backward(&Tensor::zeros(&[1, 1, 3, 3])).is_err());
}

// ============================================================================
// Integration with other layers
// ============================================================================

#[test]
fn test_set_training_reaches_nested_batchnorm() {
    let mut ctx = ModelContext::new(14);
    let inner = Sequential::new(vec![
        Box::new(BatchNorm2d::new(2, &mut ctx)),
        Box::new(ReLU::new()),
    ]);
    let mut model = Sequential::new(vec![
        Box::new(Conv2d::new(Conv2dConfig::new(1, 2, 3), &mut ctx)),
        Box::new(inner),
    ]);

    model.set_training(false);
    assert!(!model.is_training());
    assert!(model.children()[1].children()[0].children().is_empty());
    assert!(!model.children()[1].children()[0].is_training());
    assert!(!model.children()[1].children()[1].is_training());

    model.set_training(true);
    assert!(model.children()[1].children()[0].is_training());
}
