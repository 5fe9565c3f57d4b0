//! Ordered parameter vector with fixed positional semantics.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered sequence of doubles with fixed positional meaning.
///
/// Every source model reads the same leading slots:
///
/// | slot | meaning          |
/// |------|------------------|
/// | 0    | relative momentum `k` |
/// | 1    | pair separation `r`   |
/// | 2    | cos θ                 |
/// | 3..  | model shape parameters |
///
/// Callers typically hold one `SourceParams` per fit worker, set the shape
/// slots once per parameter point, and sweep the radius slot in the inner
/// evaluation loop. Evaluators never mutate a caller's vector; internal
/// dispatch works on local scratch copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
    slots: Vec<f64>,
}

impl SourceParams {
    /// Slot index of the relative momentum.
    pub const MOMENTUM: usize = 0;
    /// Slot index of the pair separation (the integration variable).
    pub const RADIUS: usize = 1;
    /// Slot index of cos θ.
    pub const COS_THETA: usize = 2;
    /// Slot index of the first shape parameter.
    pub const SHAPE: usize = 3;

    /// Create a zeroed parameter vector with room for `n_shape` shape slots.
    pub fn new(n_shape: usize) -> Self {
        Self { slots: vec![0.0; Self::SHAPE + n_shape] }
    }

    /// Create a parameter vector from kinematics plus shape slots.
    pub fn with_shape(momentum: f64, radius: f64, cos_theta: f64, shape: &[f64]) -> Self {
        let mut slots = Vec::with_capacity(Self::SHAPE + shape.len());
        slots.push(momentum);
        slots.push(radius);
        slots.push(cos_theta);
        slots.extend_from_slice(shape);
        Self { slots }
    }

    /// Create a parameter vector from raw slots (at least the three
    /// kinematic slots must be present).
    pub fn from_slots(slots: Vec<f64>) -> Result<Self> {
        if slots.len() < Self::SHAPE {
            return Err(Error::Validation(format!(
                "SourceParams requires at least {} slots (momentum, radius, cos theta), got {}",
                Self::SHAPE,
                slots.len()
            )));
        }
        Ok(Self { slots })
    }

    /// Relative momentum (slot 0).
    pub fn momentum(&self) -> f64 {
        self.slots[Self::MOMENTUM]
    }

    /// Pair separation (slot 1).
    pub fn radius(&self) -> f64 {
        self.slots[Self::RADIUS]
    }

    /// cos θ (slot 2).
    pub fn cos_theta(&self) -> f64 {
        self.slots[Self::COS_THETA]
    }

    /// Set the relative momentum.
    pub fn set_momentum(&mut self, value: f64) {
        self.slots[Self::MOMENTUM] = value;
    }

    /// Set the pair separation.
    pub fn set_radius(&mut self, value: f64) {
        self.slots[Self::RADIUS] = value;
    }

    /// Set cos θ.
    pub fn set_cos_theta(&mut self, value: f64) {
        self.slots[Self::COS_THETA] = value;
    }

    /// Shape parameter `i` (slot `3 + i`).
    ///
    /// A missing slot reads as NaN so that downstream validity checks reject
    /// it instead of panicking inside an evaluation loop.
    pub fn shape(&self, i: usize) -> f64 {
        self.slots.get(Self::SHAPE + i).copied().unwrap_or(f64::NAN)
    }

    /// Set shape parameter `i`, growing the vector if needed.
    pub fn set_shape(&mut self, i: usize, value: f64) {
        let idx = Self::SHAPE + i;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, 0.0);
        }
        self.slots[idx] = value;
    }

    /// Number of shape slots present.
    pub fn n_shape(&self) -> usize {
        self.slots.len() - Self::SHAPE
    }

    /// Raw slot view.
    pub fn slots(&self) -> &[f64] {
        &self.slots
    }
}
