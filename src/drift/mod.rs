//! Bounded drift of the persona's numeric state
//!
//! Both engines share one update shape, implemented by [`DriftStep`]:
//! 1. every axis decays toward its center by a fixed fraction
//! 2. rules add small, learning-rate-scaled influences
//! 3. every axis is clamped back into its bounds
//!
//! With no influences the state converges monotonically on the center.

pub mod traits;
pub mod values;

pub use traits::{TraitDriftConfig, TraitDriftEngine, TraitInputs, TraitState};
pub use values::{ValueDriftConfig, ValueDriftEngine, ValueInputs, ValueState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::{PersonaError, Result};
use crate::types::Diagnostics;

/// Closed interval every axis of a state is kept in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisBounds {
    pub min: f32,
    pub max: f32,
    /// Resting point that decay pulls toward
    pub center: f32,
}

impl Default for AxisBounds {
    fn default() -> Self {
        Self {
            min: -1.0,
            max: 1.0,
            center: 0.0,
        }
    }
}

impl AxisBounds {
    pub fn validate(&self, name: &str) -> Result<()> {
        let finite = self.min.is_finite() && self.max.is_finite() && self.center.is_finite();
        if !finite || self.min >= self.max || self.center < self.min || self.center > self.max {
            return Err(PersonaError::Config(format!(
                "{}: bounds must satisfy min < max and min <= center <= max (got {:?})",
                name, self
            )));
        }
        Ok(())
    }

    /// Clamp into bounds; NaN collapses to the center
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.center
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A fixed set of named float axes
pub trait AxisState: Clone + Default + PartialEq + Debug {
    const AXES: &'static [&'static str];

    fn values(&self) -> Vec<f32>;

    /// Build from values in [`Self::AXES`] order
    fn from_values(values: &[f32]) -> Self;

    fn neutral(bounds: &AxisBounds) -> Self {
        Self::from_values(&vec![bounds.center; Self::AXES.len()])
    }

    fn to_map(&self) -> BTreeMap<String, f32> {
        Self::AXES
            .iter()
            .zip(self.values())
            .map(|(name, v)| (name.to_string(), v))
            .collect()
    }

    /// Missing axes take the center; everything is clamped
    fn from_map(map: &BTreeMap<String, f32>, bounds: &AxisBounds) -> Self {
        let values: Vec<f32> = Self::AXES
            .iter()
            .map(|name| bounds.clamp(map.get(*name).copied().unwrap_or(bounds.center)))
            .collect();
        Self::from_values(&values)
    }

    /// Euclidean distance to the all-center point
    fn distance_to_center(&self, bounds: &AxisBounds) -> f32 {
        self.values()
            .iter()
            .map(|v| (v - bounds.center).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    fn within(&self, bounds: &AxisBounds) -> bool {
        self.values().iter().all(|v| bounds.contains(*v))
    }
}

/// Result of one drift update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftOutcome<S> {
    pub new_state: S,
    /// Per-axis change actually applied (after clamping)
    pub delta: BTreeMap<String, f32>,
    pub notes: Diagnostics,
}

/// In-progress update over one state
pub(crate) struct DriftStep<'a, S: AxisState> {
    before: Vec<f32>,
    values: Vec<f32>,
    bounds: &'a AxisBounds,
    learning_rate: f32,
    fired: Vec<&'static str>,
    _state: std::marker::PhantomData<S>,
}

impl<'a, S: AxisState> DriftStep<'a, S> {
    pub(crate) fn begin(current: &S, bounds: &'a AxisBounds, learning_rate: f32) -> Self {
        let before = current.values();
        Self {
            values: before.clone(),
            before,
            bounds,
            learning_rate,
            fired: Vec::new(),
            _state: std::marker::PhantomData,
        }
    }

    /// Move every axis `rate` of the way to the center. Never overshoots.
    pub(crate) fn decay(&mut self, rate: f32) {
        let rate = rate.clamp(0.0, 1.0);
        let center = self.bounds.center;
        for v in &mut self.values {
            *v -= (*v - center) * rate;
        }
    }

    /// Add `learning_rate * weight` to one axis on behalf of a rule
    pub(crate) fn nudge(&mut self, rule: &'static str, axis: usize, weight: f32) {
        if !weight.is_finite() || weight == 0.0 {
            return;
        }
        if let Some(v) = self.values.get_mut(axis) {
            *v += self.learning_rate * weight;
            if !self.fired.contains(&rule) {
                self.fired.push(rule);
            }
        }
    }

    pub(crate) fn finish(self, mut notes: Diagnostics) -> DriftOutcome<S> {
        let clamped: Vec<f32> = self.values.iter().map(|v| self.bounds.clamp(*v)).collect();
        debug_assert!(
            clamped.iter().all(|v| self.bounds.contains(*v)),
            "drift produced out-of-bounds state: {:?}",
            clamped
        );

        let delta = S::AXES
            .iter()
            .zip(clamped.iter().zip(&self.before))
            .map(|(name, (after, before))| (name.to_string(), after - before))
            .collect();
        notes.insert("rules".into(), serde_json::json!(self.fired));

        DriftOutcome {
            new_state: S::from_values(&clamped),
            delta,
            notes,
        }
    }
}
