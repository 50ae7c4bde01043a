//! Model architecture description
//!
//! A model is described in JSON as an ordered list of layers and built into a
//! [`Sequential`]. Validation reports the index of the offending layer and
//! checks that consecutive layers agree on feature/channel counts where both
//! sides are known.

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{NnError, Result};
use crate::layers::batchnorm::{DEFAULT_EPS, DEFAULT_MOMENTUM};
use crate::layers::{
    BatchNorm2d, Conv2d, Conv2dConfig, Conv2dLoops, Flatten, FullyConnected,
    GlobalAveragePooling, Layer, LinearActivation, MaxPool2d, ModelContext, ReLU, Sequential,
    Sigmoid, SoftMax,
};

/// Accepted values of [`LayerConfig::layer_type`].
pub const LAYER_TYPES: [&str; 11] = [
    "fully_connected",
    "conv2d",
    "conv2d_loops",
    "max_pool2d",
    "global_average_pooling",
    "batch_norm2d",
    "flatten",
    "relu",
    "sigmoid",
    "linear",
    "softmax",
];

/// Configuration for one layer.
///
/// Which fields are required depends on `layer_type`:
///
/// - **fully_connected**: `in_features`, `out_features`, optional `bias`
/// - **conv2d** / **conv2d_loops**: `in_channels`, `out_channels`,
///   `kernel_size`, optional `stride` (1), `padding` (0), `bias` (true)
/// - **max_pool2d**: `kernel_size`, optional `stride` (1), `padding` (0),
///   `use_neg_inf_for_padding` (true)
/// - **batch_norm2d**: `n_channels`, optional `momentum` (0.1), `eps` (1e-5)
/// - **global_average_pooling**, **flatten**, **relu**, **sigmoid**,
///   **linear**, **softmax**: no fields
///
/// # Example
///
/// ```json
/// {
///   "layer_type": "conv2d",
///   "in_channels": 1,
///   "out_channels": 8,
///   "kernel_size": 3,
///   "padding": 1
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerConfig {
    pub layer_type: String,

    // FullyConnected
    pub in_features: Option<usize>,
    pub out_features: Option<usize>,

    // Convolutions and pooling
    pub in_channels: Option<usize>,
    pub out_channels: Option<usize>,
    pub kernel_size: Option<usize>,
    pub stride: Option<usize>,
    pub padding: Option<usize>,
    pub bias: Option<bool>,
    pub use_neg_inf_for_padding: Option<bool>,

    // BatchNorm2d
    pub n_channels: Option<usize>,
    pub momentum: Option<f64>,
    pub eps: Option<f64>,
}

impl LayerConfig {
    /// A config of the given type with every optional field unset.
    pub fn of_type(layer_type: &str) -> Self {
        Self {
            layer_type: layer_type.to_string(),
            ..Self::default()
        }
    }
}

/// Configuration for the entire network: layers applied in order.
///
/// # Example
///
/// ```json
/// {
///   "layers": [
///     { "layer_type": "fully_connected", "in_features": 4, "out_features": 3 },
///     { "layer_type": "relu" },
///     { "layer_type": "fully_connected", "in_features": 3, "out_features": 2 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    pub layers: Vec<LayerConfig>,
}

/// Loads and validates an architecture configuration from a JSON file.
pub fn load_architecture(path: impl AsRef<Path>) -> Result<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

fn invalid(index: usize, message: impl std::fmt::Display) -> NnError {
    NnError::InvalidConfig(format!("Layer {}: {}", index, message))
}

/// A required, strictly positive field.
fn require(value: Option<usize>, index: usize, layer_type: &str, field: &str) -> Result<usize> {
    match value {
        None => Err(invalid(index, format!("{} layer requires '{}'", layer_type, field))),
        Some(0) => Err(invalid(index, format!("{} must be greater than 0", field))),
        Some(v) => Ok(v),
    }
}

/// What flows between two layers, as far as the description tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Features(usize),
    Channels(usize),
    Unknown,
}

/// Validate one layer given what the previous layer produces, returning what
/// this layer produces.
fn validate_layer(layer: &LayerConfig, index: usize, incoming: Flow) -> Result<Flow> {
    let layer_type = layer.layer_type.to_lowercase();
    let expect = |wanted: Flow| -> Result<()> {
        let compatible = match (incoming, wanted) {
            (Flow::Unknown, _) | (_, Flow::Unknown) => true,
            (a, b) => a == b,
        };
        if compatible {
            Ok(())
        } else {
            Err(invalid(
                index,
                format!("Layer connection mismatch: expects {:?} but receives {:?}", wanted, incoming),
            ))
        }
    };

    match layer_type.as_str() {
        "fully_connected" => {
            let inputs = require(layer.in_features, index, "fully_connected", "in_features")?;
            let outputs = require(layer.out_features, index, "fully_connected", "out_features")?;
            expect(Flow::Features(inputs))?;
            Ok(Flow::Features(outputs))
        }
        "conv2d" | "conv2d_loops" => {
            let inputs = require(layer.in_channels, index, &layer_type, "in_channels")?;
            let outputs = require(layer.out_channels, index, &layer_type, "out_channels")?;
            require(layer.kernel_size, index, &layer_type, "kernel_size")?;
            if layer.stride == Some(0) {
                return Err(invalid(index, "stride must be greater than 0"));
            }
            expect(Flow::Channels(inputs))?;
            Ok(Flow::Channels(outputs))
        }
        "max_pool2d" => {
            require(layer.kernel_size, index, "max_pool2d", "kernel_size")?;
            if layer.stride == Some(0) {
                return Err(invalid(index, "stride must be greater than 0"));
            }
            Ok(incoming)
        }
        "batch_norm2d" => {
            let channels = require(layer.n_channels, index, "batch_norm2d", "n_channels")?;
            if let Some(momentum) = layer.momentum {
                if !(0.0..=1.0).contains(&momentum) {
                    return Err(invalid(index, "momentum must be in range [0.0, 1.0]"));
                }
            }
            if let Some(eps) = layer.eps {
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(invalid(index, "eps must be positive"));
                }
            }
            expect(Flow::Channels(channels))?;
            Ok(incoming)
        }
        "global_average_pooling" => Ok(match incoming {
            Flow::Channels(c) => Flow::Features(c),
            _ => Flow::Unknown,
        }),
        "flatten" => Ok(Flow::Unknown),
        "relu" | "sigmoid" | "linear" | "softmax" => Ok(incoming),
        _ => Err(invalid(
            index,
            format!(
                "Invalid layer type '{}'. Must be one of: {}",
                layer.layer_type,
                LAYER_TYPES.join(", ")
            ),
        )),
    }
}

/// Validates every layer and the connections between consecutive layers.
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<()> {
    if config.layers.is_empty() {
        return Err(NnError::InvalidConfig(
            "Architecture must have at least one layer".to_string(),
        ));
    }
    config
        .layers
        .iter()
        .enumerate()
        .try_fold(Flow::Unknown, |flow, (i, layer)| validate_layer(layer, i, flow))?;
    Ok(())
}

fn build_layer(layer: &LayerConfig, ctx: &mut ModelContext) -> Result<Box<dyn Layer>> {
    let layer_type = layer.layer_type.to_lowercase();
    let built: Box<dyn Layer> = match layer_type.as_str() {
        "fully_connected" => Box::new(FullyConnected::with_bias(
            layer.in_features.unwrap_or_default(),
            layer.out_features.unwrap_or_default(),
            layer.bias.unwrap_or(true),
            ctx,
        )),
        "conv2d" | "conv2d_loops" => {
            let config = Conv2dConfig::new(
                layer.in_channels.unwrap_or_default(),
                layer.out_channels.unwrap_or_default(),
                layer.kernel_size.unwrap_or(1),
            )
            .stride(layer.stride.unwrap_or(1))
            .padding(layer.padding.unwrap_or(0))
            .bias(layer.bias.unwrap_or(true));
            if layer_type == "conv2d" {
                Box::new(Conv2d::new(config, ctx))
            } else {
                Box::new(Conv2dLoops::new(config, ctx))
            }
        }
        "max_pool2d" => Box::new(MaxPool2d::with_padding(
            layer.kernel_size.unwrap_or(1),
            layer.stride.unwrap_or(1),
            layer.padding.unwrap_or(0),
            layer.use_neg_inf_for_padding.unwrap_or(true),
        )),
        "batch_norm2d" => Box::new(BatchNorm2d::with_hyperparameters(
            layer.n_channels.unwrap_or_default(),
            layer.momentum.unwrap_or(DEFAULT_MOMENTUM),
            layer.eps.unwrap_or(DEFAULT_EPS),
            ctx,
        )),
        "global_average_pooling" => Box::new(GlobalAveragePooling::new()),
        "flatten" => Box::new(Flatten::new()),
        "relu" => Box::new(ReLU::new()),
        "sigmoid" => Box::new(Sigmoid::new()),
        "linear" => Box::new(LinearActivation::new()),
        "softmax" => Box::new(SoftMax::new()),
        other => {
            return Err(NnError::InvalidConfig(format!(
                "Invalid layer type '{}'",
                other
            )))
        }
    };
    Ok(built)
}

/// Builds a model from a validated architecture.
///
/// Layer ids and initial weights come from `ctx`, so building the same
/// config twice from equally seeded contexts gives identical models.
///
/// # Examples
///
/// ```no_run
/// use manual_backprop::architecture::{build_model, load_architecture};
/// use manual_backprop::layers::ModelContext;
///
/// let config = load_architecture("config/architectures/mlp.json").unwrap();
/// let mut ctx = ModelContext::new(42);
/// let model = build_model(&config, &mut ctx).unwrap();
/// assert_eq!(model.len(), config.layers.len());
/// ```
pub fn build_model(config: &ArchitectureConfig, ctx: &mut ModelContext) -> Result<Sequential> {
    validate_architecture(config)?;
    let layers = config
        .layers
        .iter()
        .map(|layer| build_layer(layer, ctx))
        .collect::<Result<Vec<_>>>()?;
    debug!("Architecture built: {} layers", layers.len());
    Ok(Sequential::new(layers))
}
