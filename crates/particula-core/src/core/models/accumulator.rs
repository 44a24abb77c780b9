use super::ids::ParticleId;
use crate::core::keys::{FloatKey, XYZ};
use nalgebra::Vector3;
use std::collections::HashMap;

/// Collects derivative contributions for one scoring pass.
///
/// Every contribution is multiplied by the accumulator's weight as it is added, so a restraint
/// with weight `w` can write raw gradients and still produce correctly weighted totals. Once a
/// pass is finished the entries are merged into the particle store.
#[derive(Debug, Clone)]
pub struct DerivativeAccumulator {
    weight: f64,
    entries: HashMap<(ParticleId, FloatKey), f64>,
}

impl Default for DerivativeAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivativeAccumulator {
    pub fn new() -> Self {
        Self::with_weight(1.0)
    }

    pub fn with_weight(weight: f64) -> Self {
        Self {
            weight,
            entries: HashMap::new(),
        }
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn add(&mut self, particle: ParticleId, key: FloatKey, value: f64) {
        *self.entries.entry((particle, key)).or_insert(0.0) += self.weight * value;
    }

    /// Adds a gradient on the Cartesian coordinates of `particle`.
    pub fn add_xyz(&mut self, particle: ParticleId, gradient: &Vector3<f64>) {
        for (axis, key) in XYZ.into_iter().enumerate() {
            self.add(particle, key, gradient[axis]);
        }
    }

    pub fn get(&self, particle: ParticleId, key: FloatKey) -> f64 {
        self.entries.get(&(particle, key)).copied().unwrap_or(0.0)
    }

    pub fn xyz(&self, particle: ParticleId) -> Vector3<f64> {
        Vector3::new(
            self.get(particle, XYZ[0]),
            self.get(particle, XYZ[1]),
            self.get(particle, XYZ[2]),
        )
    }

    /// Folds already weighted entries from another accumulator into this one.
    pub fn merge(&mut self, other: DerivativeAccumulator) {
        for (entry, value) in other.entries {
            *self.entries.entry(entry).or_insert(0.0) += value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticleId, FloatKey, f64)> + '_ {
        self.entries
            .iter()
            .map(|(&(particle, key), &value)| (particle, key, value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
