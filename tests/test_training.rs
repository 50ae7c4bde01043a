// End-to-end training tests.
// A 4 → 3 → 2 fully connected network learns a linearly separable two-class
// problem with full-batch SGD and the fused softmax cross-entropy loss.

use manual_backprop::architecture::{build_model, load_architecture};
use manual_backprop::config::load_config;
use manual_backprop::layers::{FullyConnected, Layer, ModelContext, ReLU, Sequential};
use manual_backprop::loss::{CrossEntropyLossWithSoftMax, Loss};
use manual_backprop::optimizers::{Optimizer, SGD};
use manual_backprop::tensor::Tensor;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Class 0 is heavy on the first two features, class 1 on the last two.
fn dataset() -> (Tensor, Tensor, Vec<usize>) {
    let inputs = Tensor::new(
        vec![
            1.0, 0.8, 0.1, 0.0, //
            0.9, 1.0, 0.0, 0.2, //
            1.2, 0.7, 0.3, 0.1, //
            0.8, 1.1, 0.2, 0.0, //
            0.1, 0.0, 1.0, 0.9, //
            0.0, 0.2, 0.8, 1.1, //
            0.3, 0.1, 1.1, 0.8, //
            0.2, 0.0, 0.9, 1.2, //
        ],
        vec![8, 4],
    );
    let labels = vec![0, 0, 0, 0, 1, 1, 1, 1];
    let targets = Tensor::from_fn(&[8, 2], |i| if labels[i / 2] == i % 2 { 1.0 } else { 0.0 });
    (inputs, targets, labels)
}

fn accuracy(logits: &Tensor, labels: &[usize]) -> f64 {
    let correct = labels
        .iter()
        .enumerate()
        .filter(|&(i, &label)| {
            let row = &logits.data()[i * 2..i * 2 + 2];
            let predicted = if row[1] > row[0] { 1 } else { 0 };
            predicted == label
        })
        .count();
    correct as f64 / labels.len() as f64
}

// Runs `steps` full-batch updates, returning the loss before each one.
fn train(
    model: &mut Sequential,
    optimizer: &mut dyn Optimizer,
    inputs: &Tensor,
    targets: &Tensor,
    steps: usize,
) -> Vec<f64> {
    let mut loss = CrossEntropyLossWithSoftMax::new();
    (0..steps)
        .map(|_| {
            let logits = model.forward(inputs).unwrap();
            let value = loss.forward(&logits, targets).unwrap();
            model.backward(&loss.backward().unwrap()).unwrap();
            optimizer.step(model).unwrap();
            value
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// ============================================================================
// Training Scenario
// ============================================================================

#[test]
fn test_two_layer_network_learns_separable_data() {
    init_logger();
    let (inputs, targets, labels) = dataset();
    let mut ctx = ModelContext::new(42).with_init_scale(0.5);
    let mut model = Sequential::new(vec![
        Box::new(FullyConnected::new(4, 3, &mut ctx)),
        Box::new(ReLU::new()),
        Box::new(FullyConnected::new(3, 2, &mut ctx)),
    ]);
    let mut optimizer = SGD::new(0.5);

    let losses = train(&mut model, &mut optimizer, &inputs, &targets, 50);

    assert_eq!(losses.len(), 50);
    assert!(losses.iter().all(|l| l.is_finite()));
    // Decreasing on average: the last ten steps sit well below the first ten.
    assert!(mean(&losses[40..]) < 0.5 * mean(&losses[..10]));
    assert!(losses[49] < losses[0]);

    let logits = model.forward(&inputs).unwrap();
    assert!(accuracy(&logits, &labels) >= 0.95);
}

#[test]
fn test_training_from_config_files() {
    let (inputs, targets, labels) = dataset();
    let architecture = load_architecture("config/architectures/mlp.json").unwrap();
    let mut model = build_model(&architecture, &mut ModelContext::new(42).with_init_scale(0.5))
        .unwrap();
    let mut optimizer = load_config("config/sgd.json")
        .unwrap()
        .build(&model)
        .unwrap();

    let losses = train(&mut model, optimizer.as_mut(), &inputs, &targets, 50);
    assert!(mean(&losses[40..]) < 0.5 * mean(&losses[..10]));

    let logits = model.forward(&inputs).unwrap();
    assert!(accuracy(&logits, &labels) >= 0.95);
}

#[test]
fn test_eval_mode_forward_is_repeatable() {
    let (inputs, _, _) = dataset();
    let mut model = Sequential::new(vec![
        Box::new(FullyConnected::new(4, 3, &mut ModelContext::new(1))),
        Box::new(ReLU::new()),
    ]);
    model.set_training(false);
    let first = model.forward(&inputs).unwrap();
    let second = model.forward(&inputs).unwrap();
    assert_eq!(first, second);
}
