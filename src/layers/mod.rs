//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, parameter bookkeeping, and the
//! concrete layer kinds: fully connected, two convolution variants, pooling,
//! batch normalization, activations, flatten and the Sequential container.

mod r#trait;
pub mod activation;
pub mod batchnorm;
pub mod conv2d;
pub mod conv2d_matmul;
pub mod flatten;
pub mod fully_connected;
pub mod param;
pub mod pooling;
pub mod sequential;

pub use activation::{LinearActivation, ReLU, Sigmoid, SoftMax};
pub use batchnorm::BatchNorm2d;
pub use conv2d::{Conv2dConfig, Conv2dLoops};
pub use conv2d_matmul::Conv2d;
pub use flatten::Flatten;
pub use fully_connected::FullyConnected;
pub use param::{LayerId, LayerIdAllocator, ModelContext, ParamId, ParamRole, Parameter};
pub use pooling::{GlobalAveragePooling, MaxPool2d};
pub use r#trait::Layer;
pub use sequential::Sequential;

/// Compare two layers parameter by parameter.
///
/// Parameters are matched positionally and must have equal values. With
/// `check_gradients`, their gradients must also match, where an absent
/// gradient only equals another absent gradient. Identities are not compared,
/// so two separately built models with the same weights are equal.
pub fn parameters_equal(a: &dyn Layer, b: &dyn Layer, check_gradients: bool) -> bool {
    let (pa, pb) = (a.parameters(), b.parameters());
    pa.len() == pb.len()
        && pa.iter().zip(&pb).all(|(x, y)| {
            x.value == y.value
                && (!check_gradients
                    || match (&x.grad, &y.grad) {
                        (Some(gx), Some(gy)) => gx == gy,
                        (None, None) => true,
                        _ => false,
                    })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_models_from_same_seed_are_equal() {
        let a = FullyConnected::new(3, 2, &mut ModelContext::new(7));
        let b = FullyConnected::new(3, 2, &mut ModelContext::new(7));
        let c = FullyConnected::new(3, 2, &mut ModelContext::new(8));
        assert!(parameters_equal(&a, &b, true));
        assert!(!parameters_equal(&a, &c, false));
    }

    #[test]
    fn test_gradient_presence_matters() {
        let mut a = FullyConnected::new(3, 2, &mut ModelContext::new(7));
        let b = FullyConnected::new(3, 2, &mut ModelContext::new(7));
        a.forward(&Tensor::ones(&[1, 3])).unwrap();
        a.backward(&Tensor::ones(&[1, 2])).unwrap();
        assert!(parameters_equal(&a, &b, false));
        assert!(!parameters_equal(&a, &b, true));
    }
}
