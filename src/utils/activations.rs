//! Scalar and row-wise activation helpers
//!
//! Used by the activation layers and the fused softmax + cross-entropy loss.

/// Sigmoid: 1 / (1 + exp(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming s = sigmoid(z).
///
/// Returns s * (1 - s)
pub fn sigmoid_derivative(s: f64) -> f64 {
    s * (1.0 - s)
}

pub fn relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// In-place softmax over each `cols`-wide row of a `(rows, cols)` buffer.
///
/// The row maximum is subtracted before exponentiating.
pub fn softmax_rows(outputs: &mut [f64], rows: usize, cols: usize) {
    assert_eq!(outputs.len(), rows * cols, "softmax_rows: buffer is not rows * cols");
    if cols == 0 {
        return;
    }

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let max_value = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut sum = 0.0;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
}
