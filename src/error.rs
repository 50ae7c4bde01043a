//! Error types for layer, loss and optimizer operations
//!
//! Every error here is a programming or configuration error detected at the
//! point of use. Nothing is retried internally; errors propagate to the caller.

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum NnError {
    /// A tensor handed to `forward`/`backward` does not have the shape the
    /// layer expects (from its configuration or from the paired forward call).
    #[error("shape mismatch in {layer}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        layer: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    /// A parameter's gradient was read before any backward pass produced it.
    #[error("gradient for parameter {id} has not been computed")]
    UninitializedGradient { id: String },

    /// The optimizer met a parameter identity it did not register at construction.
    #[error("unknown parameter identity {id}")]
    UnknownParameterIdentity { id: String },

    /// Two live parameters carry the same identity.
    #[error("duplicate parameter identity {id}")]
    DuplicateParameterIdentity { id: String },

    /// Invalid hyperparameters or model description.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NnError>;

impl NnError {
    /// Shorthand for a [`NnError::ShapeMismatch`] with a free-form expectation.
    pub fn shape(layer: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        NnError::ShapeMismatch {
            layer,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = NnError::shape("FullyConnected", "(batch, 4)", &[2, 3]);
        assert_eq!(
            err.to_string(),
            "shape mismatch in FullyConnected: expected (batch, 4), got [2, 3]"
        );
    }

    #[test]
    fn test_identity_errors_name_the_parameter() {
        let err = NnError::UnknownParameterIdentity { id: "dW7".into() };
        assert!(err.to_string().contains("dW7"));
        let err = NnError::UninitializedGradient { id: "g2".into() };
        assert!(err.to_string().contains("g2"));
        let err = NnError::DuplicateParameterIdentity { id: "db0".into() };
        assert_eq!(err.to_string(), "duplicate parameter identity db0");
    }
}
