//! Manual backpropagation library
//!
//! Layers with hand-written forward and backward passes, losses, and
//! optimizers over a small dense `f64` tensor.
//!
//! # Modules
//!
//! - `tensor`: n-dimensional tensor with broadcasting arithmetic and reductions
//! - `layers`: Layer trait and implementations (FullyConnected, Conv2d, BatchNorm2d, etc.)
//! - `loss`: Loss trait, cross-entropy and fused softmax cross-entropy
//! - `optimizers`: Optimizer trait and implementations (SGD, Adam)
//! - `utils`: Shared utilities (RNG, activation functions, gradient checking)
//! - `config`: Optimizer configuration
//! - `architecture`: Architecture configuration and model building
//! - `error`: Error type shared by every fallible operation

pub mod architecture;
pub mod config;
pub mod error;
pub mod layers;
pub mod loss;
pub mod optimizers;
pub mod tensor;
pub mod utils;

pub use error::{NnError, Result};
pub use tensor::Tensor;
