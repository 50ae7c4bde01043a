//! Learnable parameters and their identities
//!
//! Each [`Parameter`] is owned by exactly one layer. Its [`ParamId`] combines
//! the owning layer's [`LayerId`] with a [`ParamRole`] and is how optimizers
//! key per-parameter state. Layer ids come from a [`LayerIdAllocator`] owned by
//! the [`ModelContext`] that builds the model, so two models built from
//! separate contexts never need to coordinate ids through global state.

use std::fmt;

use crate::tensor::Tensor;
use crate::utils::rng::SimpleRng;

/// Identity of a layer within one model-building context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

/// What a parameter does inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    Weights,
    Bias,
    /// BatchNorm gamma.
    Scale,
    /// BatchNorm beta.
    Shift,
}

impl ParamRole {
    fn tag(self) -> &'static str {
        match self {
            ParamRole::Weights => "dW",
            ParamRole::Bias => "db",
            ParamRole::Scale => "g",
            ParamRole::Shift => "b",
        }
    }
}

/// Stable identity of one parameter: owning layer plus role.
///
/// Displays as the role tag followed by the layer id, e.g. `dW3` or `g7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId {
    pub layer: LayerId,
    pub role: ParamRole,
}

impl ParamId {
    pub fn new(layer: LayerId, role: ParamRole) -> Self {
        Self { layer, role }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.tag(), self.layer.0)
    }
}

/// A learnable tensor together with its most recent gradient.
///
/// `grad` is `None` until the owning layer's first backward pass and is
/// overwritten (not accumulated) by every later one.
#[derive(Debug, Clone)]
pub struct Parameter {
    id: ParamId,
    pub value: Tensor,
    pub grad: Option<Tensor>,
}

impl Parameter {
    pub fn new(id: ParamId, value: Tensor) -> Self {
        Self {
            id,
            value,
            grad: None,
        }
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Replace the gradient produced by a backward pass.
    pub(crate) fn set_grad(&mut self, grad: Tensor) {
        debug_assert_eq!(grad.shape(), self.value.shape());
        self.grad = Some(grad);
    }
}

/// Hands out monotonically increasing layer ids.
#[derive(Debug, Default, Clone)]
pub struct LayerIdAllocator {
    next: u64,
}

impl LayerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> LayerId {
        let id = LayerId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

/// Everything a layer constructor needs: an id source and an initialiser.
///
/// Parameters are drawn from a standard normal distribution and multiplied
/// by `init_scale` (0.01 unless overridden).
#[derive(Debug, Clone)]
pub struct ModelContext {
    ids: LayerIdAllocator,
    rng: SimpleRng,
    init_scale: f64,
}

pub const DEFAULT_INIT_SCALE: f64 = 0.01;

impl ModelContext {
    pub fn new(seed: u64) -> Self {
        Self {
            ids: LayerIdAllocator::new(),
            rng: SimpleRng::new(seed),
            init_scale: DEFAULT_INIT_SCALE,
        }
    }

    pub fn with_init_scale(mut self, scale: f64) -> Self {
        self.init_scale = scale;
        self
    }

    pub fn init_scale(&self) -> f64 {
        self.init_scale
    }

    pub fn next_layer_id(&mut self) -> LayerId {
        self.ids.allocate()
    }

    pub fn ids(&self) -> &LayerIdAllocator {
        &self.ids
    }

    pub fn rng(&mut self) -> &mut SimpleRng {
        &mut self.rng
    }

    /// Small random tensor: `N(0, 1) * init_scale`.
    pub fn random_tensor(&mut self, shape: &[usize]) -> Tensor {
        let scale = self.init_scale;
        let rng = &mut self.rng;
        Tensor::from_fn(shape, |_| rng.next_normal() * scale)
    }
}
