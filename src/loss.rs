//! Classification losses
//!
//! A [`Loss`] turns a batch of predictions and one-hot (or soft) targets into
//! a scalar, then produces the gradient of that scalar with respect to the
//! predictions it was last given.

use crate::error::{NnError, Result};
use crate::layers::activation::softmax;
use crate::tensor::Tensor;

/// Floor applied to probabilities before taking the log.
pub const PROBABILITY_FLOOR: f64 = 1e-8;

pub trait Loss {
    fn name(&self) -> &'static str;

    /// Mean loss over the batch. Both tensors are `(batch, classes)`.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> Result<f64>;

    /// Gradient with respect to the prediction of the last forward call.
    fn backward(&mut self) -> Result<Tensor>;
}

fn check_pair(loss: &'static str, prediction: &Tensor, target: &Tensor) -> Result<()> {
    if prediction.ndim() != 2 || prediction.shape()[0] == 0 {
        return Err(NnError::shape(loss, "prediction (batch, classes)", prediction.shape()));
    }
    if target.shape() != prediction.shape() {
        return Err(NnError::shape(
            loss,
            format!("target {:?}", prediction.shape()),
            target.shape(),
        ));
    }
    Ok(())
}

/// -Σ target·ln(clip(pred)) / batch on probabilities.
fn mean_nll(clipped: &Tensor, target: &Tensor) -> f64 {
    let batch = clipped.shape()[0] as f64;
    -target.zip_map(clipped, |t, p| t * p.ln()).sum() / batch
}

/// Cross-entropy on probabilities, e.g. the output of a SoftMax layer.
///
/// Predictions are clipped below at [`PROBABILITY_FLOOR`]; the gradient is
/// `-target / clipped_prediction / batch`.
#[derive(Debug, Default)]
pub struct CrossEntropyLoss {
    cache: Option<(Tensor, Tensor)>,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Loss for CrossEntropyLoss {
    fn name(&self) -> &'static str {
        "CrossEntropyLoss"
    }

    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> Result<f64> {
        check_pair(self.name(), prediction, target)?;
        let clipped = prediction.map(|p| p.max(PROBABILITY_FLOOR));
        let loss = mean_nll(&clipped, target);
        self.cache = Some((clipped, target.clone()));
        Ok(loss)
    }

    fn backward(&mut self) -> Result<Tensor> {
        let (clipped, target) = self
            .cache
            .as_ref()
            .ok_or_else(|| NnError::shape(self.name(), "a preceding forward call", &[]))?;
        let batch = clipped.shape()[0] as f64;
        Ok(target.zip_map(clipped, |t, p| -t / p / batch))
    }
}

/// Softmax followed by cross-entropy, taking raw logits.
///
/// The gradient is `(softmax(logits) - target) / batch`, the simplified form
/// of composing the two backwards.
#[derive(Debug, Default)]
pub struct CrossEntropyLossWithSoftMax {
    cache: Option<(Tensor, Tensor)>,
}

impl CrossEntropyLossWithSoftMax {
    pub fn new() -> Self {
        Self::default()
    }

    /// Softmax probabilities from the last forward call.
    pub fn probabilities(&self) -> Option<&Tensor> {
        self.cache.as_ref().map(|(p, _)| p)
    }
}

impl Loss for CrossEntropyLossWithSoftMax {
    fn name(&self) -> &'static str {
        "CrossEntropyLossWithSoftMax"
    }

    fn forward(&mut self, logits: &Tensor, target: &Tensor) -> Result<f64> {
        check_pair(self.name(), logits, target)?;
        let probabilities = softmax(logits);
        let loss = mean_nll(&probabilities.map(|p| p.max(PROBABILITY_FLOOR)), target);
        self.cache = Some((probabilities, target.clone()));
        Ok(loss)
    }

    fn backward(&mut self) -> Result<Tensor> {
        let (probabilities, target) = self
            .cache
            .as_ref()
            .ok_or_else(|| NnError::shape(self.name(), "a preceding forward call", &[]))?;
        let batch = probabilities.shape()[0] as f64;
        Ok(probabilities.sub(target).mul_scalar(1.0 / batch))
    }
}
