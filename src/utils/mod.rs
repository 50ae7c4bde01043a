//! Shared utilities
//!
//! Seeded random numbers for initialisation, scalar activation helpers, and
//! finite-difference gradient checking.

pub mod activations;
pub mod gradient_check;
pub mod rng;

pub use activations::{relu, sigmoid, sigmoid_derivative, softmax_rows};
pub use rng::SimpleRng;
