//! Optimizer configuration
//!
//! This module parses optimizer hyperparameters from JSON and turns them into
//! a ready-to-use [`Optimizer`] for a given model.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{NnError, Result};
use crate::layers::Layer;
use crate::optimizers::{Adam, Optimizer, SGD};

/// Optimizer hyperparameters.
///
/// `beta1`, `beta2` and `epsilon` only apply to Adam and default to
/// 0.9, 0.999 and 1e-8.
///
/// # Example
///
/// ```json
/// {
///   "optimizer": "adam",
///   "learning_rate": 0.001,
///   "beta1": 0.9,
///   "beta2": 0.999
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptimizerConfig {
    /// "sgd" or "adam"
    pub optimizer: String,

    pub learning_rate: f64,

    #[serde(default = "default_beta1")]
    pub beta1: f64,

    #[serde(default = "default_beta2")]
    pub beta2: f64,

    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-8
}

impl OptimizerConfig {
    pub fn sgd(learning_rate: f64) -> Self {
        Self {
            optimizer: "sgd".to_string(),
            learning_rate,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }

    pub fn adam(learning_rate: f64) -> Self {
        Self {
            optimizer: "adam".to_string(),
            ..Self::sgd(learning_rate)
        }
    }

    /// Build the optimizer. Adam state is created from the parameters `model`
    /// owns at this point.
    pub fn build(&self, model: &dyn Layer) -> Result<Box<dyn Optimizer>> {
        validate_config(self)?;
        match self.optimizer.to_lowercase().as_str() {
            "sgd" => Ok(Box::new(SGD::new(self.learning_rate))),
            "adam" => Ok(Box::new(Adam::new(
                model,
                self.learning_rate,
                self.beta1,
                self.beta2,
                self.epsilon,
            )?)),
            other => Err(NnError::InvalidConfig(format!("unknown optimizer '{}'", other))),
        }
    }
}

/// Loads and validates an optimizer configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use manual_backprop::config::load_config;
///
/// let cfg = load_config("config/adam.json").unwrap();
/// assert_eq!(cfg.optimizer, "adam");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<OptimizerConfig> {
    let contents = fs::read_to_string(path)?;
    let config: OptimizerConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks the optimizer name and hyperparameter ranges.
pub fn validate_config(config: &OptimizerConfig) -> Result<()> {
    let valid_optimizers = ["sgd", "adam"];
    if !valid_optimizers.contains(&config.optimizer.to_lowercase().as_str()) {
        return Err(NnError::InvalidConfig(format!(
            "Invalid optimizer '{}'. Must be one of: {}",
            config.optimizer,
            valid_optimizers.join(", ")
        )));
    }

    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(NnError::InvalidConfig(
            "learning_rate must be positive".to_string(),
        ));
    }

    for (name, beta) in [("beta1", config.beta1), ("beta2", config.beta2)] {
        if !(0.0..1.0).contains(&beta) {
            return Err(NnError::InvalidConfig(format!("{} must be in [0, 1)", name)));
        }
    }

    if !(config.epsilon.is_finite() && config.epsilon > 0.0) {
        return Err(NnError::InvalidConfig("epsilon must be positive".to_string()));
    }

    Ok(())
}
