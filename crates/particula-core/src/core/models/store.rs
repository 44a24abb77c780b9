use super::accumulator::DerivativeAccumulator;
use super::ids::ParticleId;
use crate::core::attributes::{AttributeError, AttributeType, Attributes, FloatAttr};
use crate::core::error::ModelError;
use crate::core::keys::{FloatKey, Key, KeyRegistry, RawKey, XYZ};
use nalgebra::Point3;
use slotmap::SlotMap;
use std::sync::Arc;

/// Per-particle bookkeeping that is not an attribute.
#[derive(Debug, Clone)]
pub struct ParticleData {
    /// A human-readable name used in diagnostics.
    pub name: String,
}

/// Owns every particle of a model together with its runtime attributes.
///
/// Particles are addressed by generational [`ParticleId`]s, so a removed particle's id is
/// never confused with a later one. The store keeps a revision counter that advances on every
/// attribute value mutation (but not on derivative updates); caches such as dynamic containers
/// compare it against the revision they were built from.
#[derive(Debug, Clone)]
pub struct ParticleStore {
    registry: Arc<KeyRegistry>,
    particles: SlotMap<ParticleId, ParticleData>,
    attributes: Attributes,
    revision: u64,
}

impl ParticleStore {
    /// Creates an empty store bound to a key registry.
    ///
    /// # Arguments
    ///
    /// * `registry` - The registry used to create keys and resolve key names in errors.
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self {
            registry,
            particles: SlotMap::with_key(),
            attributes: Attributes::new(),
            revision: 0,
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Returns the key for `name` in the default category, creating it if needed.
    pub fn key<T: AttributeType>(&self, name: &str) -> Key<T> {
        self.registry.key(name)
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Adds a new particle without attributes.
    ///
    /// # Arguments
    ///
    /// * `name` - A human-readable name for diagnostics.
    ///
    /// # Return
    ///
    /// The identifier of the new particle.
    pub fn add_particle(&mut self, name: &str) -> ParticleId {
        self.touch();
        self.particles.insert(ParticleData {
            name: name.to_string(),
        })
    }

    /// Removes a particle and every attribute attached to it.
    ///
    /// Reference checks against model objects are the caller's responsibility.
    pub(crate) fn remove_particle(&mut self, id: ParticleId) -> Result<ParticleData, ModelError> {
        let data = self
            .particles
            .remove(id)
            .ok_or(ModelError::UnknownParticle(id))?;
        self.attributes.remove_particle(id);
        self.touch();
        Ok(data)
    }

    pub fn contains(&self, id: ParticleId) -> bool {
        self.particles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particle(&self, id: ParticleId) -> Option<&ParticleData> {
        self.particles.get(id)
    }

    /// Returns the particle's name, or its debug id when it no longer exists.
    pub fn particle_name(&self, id: ParticleId) -> String {
        self.particles
            .get(id)
            .map(|data| data.name.clone())
            .unwrap_or_else(|| format!("{:?}", id))
    }

    pub fn particles(&self) -> impl Iterator<Item = (ParticleId, &ParticleData)> {
        self.particles.iter()
    }

    pub fn particle_ids(&self) -> impl Iterator<Item = ParticleId> + '_ {
        self.particles.keys()
    }

    fn check_particle(&self, id: ParticleId) -> Result<(), ModelError> {
        if self.particles.contains_key(id) {
            Ok(())
        } else {
            Err(ModelError::UnknownParticle(id))
        }
    }

    fn attribute_error(&self, err: AttributeError) -> ModelError {
        match err {
            AttributeError::AlreadyPresent { key, particle } => ModelError::AttributeAlreadyPresent {
                key: self.registry.describe(key),
                particle: self.particle_name(particle),
            },
            AttributeError::Missing { key, particle } => ModelError::MissingAttribute {
                key: self.registry.describe(key),
                particle: self.particle_name(particle),
            },
        }
    }

    /// Adds an attribute to a particle.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::AttributeAlreadyPresent`] if the particle already has the key.
    pub fn add_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.check_particle(id)?;
        self.attributes
            .add(id, key, value)
            .map_err(|e| self.attribute_error(e))?;
        self.touch();
        Ok(())
    }

    /// Replaces an existing attribute value.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::MissingAttribute`] if the particle does not have the key.
    pub fn set_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.check_particle(id)?;
        self.attributes
            .set(id, key, value)
            .map_err(|e| self.attribute_error(e))?;
        self.touch();
        Ok(())
    }

    pub fn get_attribute<T: AttributeType>(
        &self,
        id: ParticleId,
        key: Key<T>,
    ) -> Result<&T::Value, ModelError> {
        self.check_particle(id)?;
        self.attributes
            .get(id, key)
            .map_err(|e| self.attribute_error(e))
    }

    pub fn remove_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
    ) -> Result<T::Value, ModelError> {
        self.check_particle(id)?;
        let value = self
            .attributes
            .remove(id, key)
            .map_err(|e| self.attribute_error(e))?;
        self.touch();
        Ok(value)
    }

    /// Never fails; unknown particles simply have no attributes.
    pub fn has_attribute<T: AttributeType>(&self, id: ParticleId, key: Key<T>) -> bool {
        self.attributes.has(id, key)
    }

    /// Every key set on a particle, across all attribute types.
    pub fn attribute_keys(&self, id: ParticleId) -> Vec<RawKey> {
        self.attributes.keys_of(id)
    }

    #[inline]
    pub fn float(&self, id: ParticleId, key: FloatKey) -> Result<f64, ModelError> {
        self.get_attribute::<FloatAttr>(id, key).copied()
    }

    pub fn derivative(&self, id: ParticleId, key: FloatKey) -> Result<f64, ModelError> {
        self.check_particle(id)?;
        self.attributes
            .derivative(id, key)
            .map_err(|e| self.attribute_error(e))
    }

    pub fn add_to_derivative(
        &mut self,
        id: ParticleId,
        key: FloatKey,
        delta: f64,
    ) -> Result<(), ModelError> {
        self.check_particle(id)?;
        self.attributes
            .add_to_derivative(id, key, delta)
            .map_err(|e| self.attribute_error(e))
    }

    pub fn zero_derivatives(&mut self) {
        self.attributes.zero_derivatives();
    }

    /// Adds every entry of a finished accumulator to the stored derivatives.
    pub fn apply_derivatives(&mut self, accumulator: &DerivativeAccumulator) -> Result<(), ModelError> {
        for (id, key, value) in accumulator.iter() {
            self.add_to_derivative(id, key, value)?;
        }
        Ok(())
    }

    /// Reads the Cartesian coordinates of a particle.
    pub fn xyz(&self, id: ParticleId) -> Result<Point3<f64>, ModelError> {
        Ok(Point3::new(
            self.float(id, XYZ[0])?,
            self.float(id, XYZ[1])?,
            self.float(id, XYZ[2])?,
        ))
    }

    pub fn set_xyz(&mut self, id: ParticleId, position: &Point3<f64>) -> Result<(), ModelError> {
        for (axis, key) in XYZ.into_iter().enumerate() {
            self.set_attribute(id, key, position[axis])?;
        }
        Ok(())
    }

    /// Attaches `x`, `y` and `z` attributes to a particle.
    pub fn add_xyz(&mut self, id: ParticleId, position: &Point3<f64>) -> Result<(), ModelError> {
        for (axis, key) in XYZ.into_iter().enumerate() {
            self.add_attribute(id, key, position[axis])?;
        }
        Ok(())
    }

    /// Gradient of the Cartesian coordinates as currently stored.
    pub fn xyz_derivative(&self, id: ParticleId) -> Result<nalgebra::Vector3<f64>, ModelError> {
        Ok(nalgebra::Vector3::new(
            self.derivative(id, XYZ[0])?,
            self.derivative(id, XYZ[1])?,
            self.derivative(id, XYZ[2])?,
        ))
    }

    /// Finds a particle whose particle-reference attributes point at `target`.
    pub fn find_referrer(&self, target: ParticleId) -> Option<ParticleId> {
        self.attributes.find_referrer(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attributes::{IntAttr, ParticlesAttr, StringAttr};
    use crate::core::keys::{RADIUS, X};

    fn make_store() -> ParticleStore {
        ParticleStore::new(Arc::new(KeyRegistry::new()))
    }

    #[test]
    fn attribute_round_trip_and_removal() {
        let mut store = make_store();
        let p = store.add_particle("p0");
        let label = store.key::<StringAttr>("label");

        store.add_attribute(p, label, "core".to_string()).unwrap();
        assert_eq!(store.get_attribute(p, label).unwrap(), "core");
        store.remove_attribute(p, label).unwrap();
        assert!(!store.has_attribute(p, label));
    }

    #[test]
    fn double_add_reports_key_and_particle_names() {
        let mut store = make_store();
        let p = store.add_particle("bead");
        store.add_attribute(p, RADIUS, 1.0).unwrap();

        let err = store.add_attribute(p, RADIUS, 2.0).unwrap_err();

        match err {
            ModelError::AttributeAlreadyPresent { key, particle } => {
                assert_eq!(key, "float:radius");
                assert_eq!(particle, "bead");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_attribute_read_fails() {
        let mut store = make_store();
        let p = store.add_particle("p");
        let kind = store.key::<IntAttr>("kind");
        assert!(matches!(
            store.get_attribute(p, kind),
            Err(ModelError::MissingAttribute { .. })
        ));
        assert!(matches!(
            store.set_attribute(p, kind, 3),
            Err(ModelError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn removed_particle_ids_are_rejected() {
        let mut store = make_store();
        let p = store.add_particle("p");
        store.add_xyz(p, &Point3::new(1.0, 2.0, 3.0)).unwrap();
        store.remove_particle(p).unwrap();

        assert!(!store.contains(p));
        assert!(!store.has_attribute(p, X));
        assert!(matches!(store.xyz(p), Err(ModelError::UnknownParticle(_))));
        let q = store.add_particle("q");
        assert_ne!(p, q);
    }

    #[test]
    fn revision_advances_on_values_but_not_derivatives() {
        let mut store = make_store();
        let p = store.add_particle("p");
        store.add_xyz(p, &Point3::origin()).unwrap();
        let before = store.revision();

        store.add_to_derivative(p, X, 1.0).unwrap();
        store.zero_derivatives();
        assert_eq!(store.revision(), before);

        store.set_xyz(p, &Point3::new(1.0, 0.0, 0.0)).unwrap();
        assert!(store.revision() > before);
    }

    #[test]
    fn apply_derivatives_adds_to_stored_values() {
        let mut store = make_store();
        let p = store.add_particle("p");
        store.add_xyz(p, &Point3::origin()).unwrap();
        let mut acc = DerivativeAccumulator::with_weight(2.0);
        acc.add(p, X, 1.5);

        store.apply_derivatives(&acc).unwrap();
        store.apply_derivatives(&acc).unwrap();

        assert_eq!(store.derivative(p, X).unwrap(), 6.0);
        assert_eq!(store.xyz_derivative(p).unwrap()[1], 0.0);
    }

    #[test]
    fn find_referrer_sees_particle_lists() {
        let mut store = make_store();
        let parent = store.add_particle("parent");
        let child = store.add_particle("child");
        let children = store.key::<ParticlesAttr>("children");
        store.add_attribute(parent, children, vec![child]).unwrap();
        assert_eq!(store.find_referrer(child), Some(parent));
        assert_eq!(store.find_referrer(parent), None);
    }
}
