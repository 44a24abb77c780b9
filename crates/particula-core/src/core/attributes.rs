//! Typed, sparse per-particle attribute storage.
//!
//! Each attribute type owns one [`AttributeTable`]: a dense array of columns addressed by
//! `(category, key index)`, where every column is a sparse map from particle to value. Reads
//! and writes are O(1). Floating point attributes also carry a derivative entry which is
//! created and removed together with the value.

use super::keys::{AttributeTag, Category, Key, RawKey};
use super::models::ids::ParticleId;
use slotmap::SecondaryMap;
use std::fmt;
use thiserror::Error;

/// Associates an attribute marker type with its value type and storage table.
pub trait AttributeType: Sized + 'static {
    type Value: Clone + fmt::Debug + PartialEq + Send + Sync;
    const TAG: AttributeTag;

    #[doc(hidden)]
    fn table(attributes: &Attributes) -> &AttributeTable<Self::Value>;
    #[doc(hidden)]
    fn table_mut(attributes: &mut Attributes) -> &mut AttributeTable<Self::Value>;
}

macro_rules! attribute_types {
    ($($(#[$meta:meta])* $marker:ident => $value:ty, $tag:ident, $field:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $marker {}

            impl AttributeType for $marker {
                type Value = $value;
                const TAG: AttributeTag = AttributeTag::$tag;

                fn table(attributes: &Attributes) -> &AttributeTable<$value> {
                    &attributes.$field
                }

                fn table_mut(attributes: &mut Attributes) -> &mut AttributeTable<$value> {
                    &mut attributes.$field
                }
            }
        )*
    };
}

attribute_types! {
    /// Floating point attributes; the only kind with derivatives.
    FloatAttr => f64, Float, floats;
    IntAttr => i64, Int, ints;
    StringAttr => String, String, strings;
    /// Non-negative integer indexes.
    IndexAttr => usize, Index, indexes;
    /// A reference to another particle.
    ParticleAttr => ParticleId, Particle, particles;
    FloatsAttr => Vec<f64>, Floats, float_lists;
    IntsAttr => Vec<i64>, Ints, int_lists;
    /// A list of references to other particles, e.g. the children of a hierarchy node.
    ParticlesAttr => Vec<ParticleId>, Particles, particle_lists;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("Attribute {key:?} is already present on particle {particle:?}")]
    AlreadyPresent { key: RawKey, particle: ParticleId },
    #[error("Attribute {key:?} is missing on particle {particle:?}")]
    Missing { key: RawKey, particle: ParticleId },
}

/// Sparse storage for one attribute type.
#[derive(Debug, Clone)]
pub struct AttributeTable<V> {
    tag: AttributeTag,
    columns: Vec<Vec<SecondaryMap<ParticleId, V>>>,
}

impl<V: Clone> AttributeTable<V> {
    pub fn new(tag: AttributeTag) -> Self {
        Self {
            tag,
            columns: Vec::new(),
        }
    }

    fn column(&self, key: RawKey) -> Option<&SecondaryMap<ParticleId, V>> {
        self.columns
            .get(key.category.0 as usize)?
            .get(key.index as usize)
    }

    fn existing_column_mut(&mut self, key: RawKey) -> Option<&mut SecondaryMap<ParticleId, V>> {
        self.columns
            .get_mut(key.category.0 as usize)?
            .get_mut(key.index as usize)
    }

    fn column_mut(&mut self, key: RawKey) -> &mut SecondaryMap<ParticleId, V> {
        let category = key.category.0 as usize;
        let index = key.index as usize;
        if self.columns.len() <= category {
            self.columns.resize_with(category + 1, Vec::new);
        }
        let columns = &mut self.columns[category];
        if columns.len() <= index {
            columns.resize_with(index + 1, SecondaryMap::new);
        }
        &mut columns[index]
    }

    pub fn has(&self, key: RawKey, particle: ParticleId) -> bool {
        self.column(key)
            .is_some_and(|column| column.contains_key(particle))
    }

    pub fn get(&self, key: RawKey, particle: ParticleId) -> Result<&V, AttributeError> {
        self.column(key)
            .and_then(|column| column.get(particle))
            .ok_or(AttributeError::Missing { key, particle })
    }

    pub fn get_mut(&mut self, key: RawKey, particle: ParticleId) -> Result<&mut V, AttributeError> {
        self.existing_column_mut(key)
            .and_then(|column| column.get_mut(particle))
            .ok_or(AttributeError::Missing { key, particle })
    }

    pub fn add(&mut self, key: RawKey, particle: ParticleId, value: V) -> Result<(), AttributeError> {
        let column = self.column_mut(key);
        if column.contains_key(particle) {
            return Err(AttributeError::AlreadyPresent { key, particle });
        }
        column.insert(particle, value);
        Ok(())
    }

    pub fn set(&mut self, key: RawKey, particle: ParticleId, value: V) -> Result<(), AttributeError> {
        *self.get_mut(key, particle)? = value;
        Ok(())
    }

    pub fn remove(&mut self, key: RawKey, particle: ParticleId) -> Result<V, AttributeError> {
        self.existing_column_mut(key)
            .and_then(|column| column.remove(particle))
            .ok_or(AttributeError::Missing { key, particle })
    }

    /// Drops every value stored for `particle`.
    pub fn remove_particle(&mut self, particle: ParticleId) {
        for column in self.columns.iter_mut().flatten() {
            column.remove(particle);
        }
    }

    /// Lists the keys for which `particle` has a value.
    pub fn keys_of(&self, particle: ParticleId) -> Vec<RawKey> {
        let mut keys = Vec::new();
        for (category, columns) in self.columns.iter().enumerate() {
            for (index, column) in columns.iter().enumerate() {
                if column.contains_key(particle) {
                    keys.push(RawKey {
                        tag: self.tag,
                        category: Category(category as u16),
                        index: index as u32,
                    });
                }
            }
        }
        keys
    }

    /// Overwrites every stored value with `value`.
    pub fn fill(&mut self, value: V) {
        for column in self.columns.iter_mut().flatten() {
            for (_, slot) in column.iter_mut() {
                *slot = value.clone();
            }
        }
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = (ParticleId, &V)> {
        self.columns
            .iter()
            .flatten()
            .flat_map(|column| column.iter())
    }
}

/// The full set of attribute tables for one particle store.
#[derive(Debug, Clone)]
pub struct Attributes {
    floats: AttributeTable<f64>,
    derivatives: AttributeTable<f64>,
    ints: AttributeTable<i64>,
    strings: AttributeTable<String>,
    indexes: AttributeTable<usize>,
    particles: AttributeTable<ParticleId>,
    float_lists: AttributeTable<Vec<f64>>,
    int_lists: AttributeTable<Vec<i64>>,
    particle_lists: AttributeTable<Vec<ParticleId>>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self::new()
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self {
            floats: AttributeTable::new(AttributeTag::Float),
            derivatives: AttributeTable::new(AttributeTag::Float),
            ints: AttributeTable::new(AttributeTag::Int),
            strings: AttributeTable::new(AttributeTag::String),
            indexes: AttributeTable::new(AttributeTag::Index),
            particles: AttributeTable::new(AttributeTag::Particle),
            float_lists: AttributeTable::new(AttributeTag::Floats),
            int_lists: AttributeTable::new(AttributeTag::Ints),
            particle_lists: AttributeTable::new(AttributeTag::Particles),
        }
    }

    pub fn add<T: AttributeType>(
        &mut self,
        particle: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), AttributeError> {
        T::table_mut(self).add(key.raw(), particle, value)?;
        if T::TAG == AttributeTag::Float {
            self.derivatives.add(key.raw(), particle, 0.0)?;
        }
        Ok(())
    }

    pub fn set<T: AttributeType>(
        &mut self,
        particle: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), AttributeError> {
        T::table_mut(self).set(key.raw(), particle, value)
    }

    pub fn get<T: AttributeType>(
        &self,
        particle: ParticleId,
        key: Key<T>,
    ) -> Result<&T::Value, AttributeError> {
        T::table(self).get(key.raw(), particle)
    }

    pub fn remove<T: AttributeType>(
        &mut self,
        particle: ParticleId,
        key: Key<T>,
    ) -> Result<T::Value, AttributeError> {
        let value = T::table_mut(self).remove(key.raw(), particle)?;
        if T::TAG == AttributeTag::Float {
            self.derivatives.remove(key.raw(), particle)?;
        }
        Ok(value)
    }

    pub fn has<T: AttributeType>(&self, particle: ParticleId, key: Key<T>) -> bool {
        T::table(self).has(key.raw(), particle)
    }

    pub fn derivative(&self, particle: ParticleId, key: Key<FloatAttr>) -> Result<f64, AttributeError> {
        self.derivatives.get(key.raw(), particle).copied()
    }

    pub fn add_to_derivative(
        &mut self,
        particle: ParticleId,
        key: Key<FloatAttr>,
        delta: f64,
    ) -> Result<(), AttributeError> {
        *self.derivatives.get_mut(key.raw(), particle)? += delta;
        Ok(())
    }

    pub fn zero_derivatives(&mut self) {
        self.derivatives.fill(0.0);
    }

    pub fn remove_particle(&mut self, particle: ParticleId) {
        self.floats.remove_particle(particle);
        self.derivatives.remove_particle(particle);
        self.ints.remove_particle(particle);
        self.strings.remove_particle(particle);
        self.indexes.remove_particle(particle);
        self.particles.remove_particle(particle);
        self.float_lists.remove_particle(particle);
        self.int_lists.remove_particle(particle);
        self.particle_lists.remove_particle(particle);
    }

    /// Lists every attribute key set on `particle`, across all types.
    pub fn keys_of(&self, particle: ParticleId) -> Vec<RawKey> {
        let mut keys = self.floats.keys_of(particle);
        keys.extend(self.ints.keys_of(particle));
        keys.extend(self.strings.keys_of(particle));
        keys.extend(self.indexes.keys_of(particle));
        keys.extend(self.particles.keys_of(particle));
        keys.extend(self.float_lists.keys_of(particle));
        keys.extend(self.int_lists.keys_of(particle));
        keys.extend(self.particle_lists.keys_of(particle));
        keys
    }

    /// Finds a particle whose reference attributes point at `target`.
    pub fn find_referrer(&self, target: ParticleId) -> Option<ParticleId> {
        self.particles
            .values()
            .find(|(_, value)| **value == target)
            .map(|(owner, _)| owner)
            .or_else(|| {
                self.particle_lists
                    .values()
                    .find(|(_, list)| list.contains(&target))
                    .map(|(owner, _)| owner)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{KeyRegistry, X};
    use slotmap::SlotMap;

    fn make_particles(n: usize) -> (SlotMap<ParticleId, ()>, Vec<ParticleId>) {
        let mut arena = SlotMap::with_key();
        let ids = (0..n).map(|_| arena.insert(())).collect();
        (arena, ids)
    }

    #[test]
    fn add_then_get_returns_the_value() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(1);
        let mut attributes = Attributes::new();
        let charge = registry.key::<FloatAttr>("charge");

        attributes.add(ids[0], charge, -0.5).unwrap();

        assert_eq!(attributes.get(ids[0], charge), Ok(&-0.5));
        assert!(attributes.has(ids[0], charge));
        assert_eq!(attributes.derivative(ids[0], charge), Ok(0.0));
    }

    #[test]
    fn double_add_fails() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(1);
        let mut attributes = Attributes::new();
        let kind = registry.key::<IntAttr>("kind");

        attributes.add(ids[0], kind, 1).unwrap();
        let err = attributes.add(ids[0], kind, 2).unwrap_err();

        assert!(matches!(err, AttributeError::AlreadyPresent { .. }));
        assert_eq!(attributes.get(ids[0], kind), Ok(&1));
    }

    #[test]
    fn get_set_and_remove_fail_for_missing_attribute() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(1);
        let mut attributes = Attributes::new();
        let label = registry.key::<StringAttr>("label");

        assert!(matches!(
            attributes.get(ids[0], label),
            Err(AttributeError::Missing { .. })
        ));
        assert!(attributes.set(ids[0], label, "a".to_string()).is_err());
        assert!(attributes.remove(ids[0], label).is_err());
        assert!(!attributes.has(ids[0], label));
    }

    #[test]
    fn remove_clears_value_and_derivative() {
        let (_arena, ids) = make_particles(1);
        let mut attributes = Attributes::new();

        attributes.add(ids[0], X, 3.0).unwrap();
        attributes.add_to_derivative(ids[0], X, 1.5).unwrap();
        assert_eq!(attributes.remove(ids[0], X), Ok(3.0));

        assert!(!attributes.has(ids[0], X));
        assert!(attributes.derivative(ids[0], X).is_err());
        assert!(attributes.add_to_derivative(ids[0], X, 1.0).is_err());
    }

    #[test]
    fn zero_derivatives_resets_all_accumulators() {
        let (_arena, ids) = make_particles(2);
        let mut attributes = Attributes::new();
        for &id in &ids {
            attributes.add(id, X, 0.0).unwrap();
            attributes.add_to_derivative(id, X, 2.0).unwrap();
        }

        attributes.zero_derivatives();

        for &id in &ids {
            assert_eq!(attributes.derivative(id, X), Ok(0.0));
        }
    }

    #[test]
    fn attributes_in_different_categories_do_not_collide() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(1);
        let mut attributes = Attributes::new();
        let a = registry.get_or_create::<IntAttr>(Category(0), "state");
        let b = registry.get_or_create::<IntAttr>(Category(3), "state");
        assert_eq!(a.index(), b.index());

        attributes.add(ids[0], a, 1).unwrap();
        attributes.add(ids[0], b, 2).unwrap();

        assert_eq!(attributes.get(ids[0], a), Ok(&1));
        assert_eq!(attributes.get(ids[0], b), Ok(&2));
    }

    #[test]
    fn remove_particle_drops_every_attribute_type() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(2);
        let mut attributes = Attributes::new();
        let children = registry.key::<ParticlesAttr>("children");
        let weights = registry.key::<FloatsAttr>("weights");
        attributes.add(ids[0], X, 1.0).unwrap();
        attributes.add(ids[0], children, vec![ids[1]]).unwrap();
        attributes.add(ids[0], weights, vec![0.5, 0.5]).unwrap();
        assert_eq!(attributes.keys_of(ids[0]).len(), 3);

        attributes.remove_particle(ids[0]);

        assert!(attributes.keys_of(ids[0]).is_empty());
    }

    #[test]
    fn find_referrer_reports_particle_references() {
        let registry = KeyRegistry::new();
        let (_arena, ids) = make_particles(3);
        let mut attributes = Attributes::new();
        let parent = registry.key::<ParticleAttr>("parent");
        let children = registry.key::<ParticlesAttr>("children");

        attributes.add(ids[1], parent, ids[0]).unwrap();
        attributes.add(ids[0], children, vec![ids[2]]).unwrap();

        assert_eq!(attributes.find_referrer(ids[0]), Some(ids[1]));
        assert_eq!(attributes.find_referrer(ids[2]), Some(ids[0]));
        assert_eq!(attributes.find_referrer(ids[1]), None);
    }
}
