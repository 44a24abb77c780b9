use super::constraint::{TupleConstraint, TupleModifier};
use super::dependency::ModelObject;
use crate::core::attributes::ParticlesAttr;
use crate::core::error::ModelError;
use crate::core::geometry::centroid;
use crate::core::keys::{ParticlesKey, XYZ};
use crate::core::models::ids::ParticleId;
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use crate::engine::score::check_arity;

/// Maps a particle to the particles it is made of, through a particle-list attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildrenRefiner {
    key: ParticlesKey,
}

impl ChildrenRefiner {
    pub fn new(key: ParticlesKey) -> Self {
        Self { key }
    }

    pub fn refine(&self, store: &ParticleStore, parent: ParticleId) -> Result<Vec<ParticleId>, ModelError> {
        Ok(store.get_attribute::<ParticlesAttr>(parent, self.key)?.clone())
    }

    fn children_or_empty(&self, store: &ParticleStore, parent: ParticleId) -> Vec<ParticleId> {
        self.refine(store, parent).unwrap_or_default()
    }
}

/// Sets a parent's coordinates to the centroid of its children.
#[derive(Debug, Clone, Copy)]
pub struct CentroidOfRefined {
    refiner: ChildrenRefiner,
}

impl CentroidOfRefined {
    pub fn new(refiner: ChildrenRefiner) -> Self {
        Self { refiner }
    }
}

impl TupleModifier for CentroidOfRefined {
    fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError> {
        check_arity(1, tuple)?;
        let parent = tuple[0];
        let positions = self
            .refiner
            .refine(store, parent)?
            .into_iter()
            .map(|child| store.xyz(child))
            .collect::<Result<Vec<_>, _>>()?;
        match centroid(&positions) {
            Some(center) => store.set_xyz(parent, &center),
            None => Ok(()),
        }
    }

    fn inputs(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        let mut inputs = vec![ModelObject::Particle(tuple[0])];
        inputs.extend(
            self.refiner
                .children_or_empty(store, tuple[0])
                .into_iter()
                .map(ModelObject::Particle),
        );
        inputs
    }

    fn outputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        vec![ModelObject::Particle(tuple[0])]
    }
}

/// Pushes a parent's coordinate derivatives down to its children.
///
/// With `averaged` each child receives `1/n` of the parent derivative, which is the chain rule
/// for a centroid. Otherwise every child receives the full derivative.
#[derive(Debug, Clone, Copy)]
pub struct DerivativesToRefined {
    refiner: ChildrenRefiner,
    averaged: bool,
}

impl DerivativesToRefined {
    pub fn new(refiner: ChildrenRefiner) -> Self {
        Self {
            refiner,
            averaged: false,
        }
    }

    pub fn averaged(refiner: ChildrenRefiner) -> Self {
        Self {
            refiner,
            averaged: true,
        }
    }
}

impl TupleModifier for DerivativesToRefined {
    fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError> {
        check_arity(1, tuple)?;
        let parent = tuple[0];
        let children = self.refiner.refine(store, parent)?;
        if children.is_empty() {
            return Ok(());
        }
        let scale = if self.averaged {
            1.0 / children.len() as f64
        } else {
            1.0
        };
        let gradient = store.xyz_derivative(parent)? * scale;
        for child in children {
            for (axis, key) in XYZ.into_iter().enumerate() {
                store.add_to_derivative(child, key, gradient[axis])?;
            }
        }
        Ok(())
    }

    fn inputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        vec![ModelObject::Particle(tuple[0])]
    }

    fn outputs(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        self.refiner
            .children_or_empty(store, tuple[0])
            .into_iter()
            .map(ModelObject::Particle)
            .collect()
    }
}

/// Sums the children's coordinate derivatives into the parent.
#[derive(Debug, Clone, Copy)]
pub struct DerivativesFromRefined {
    refiner: ChildrenRefiner,
}

impl DerivativesFromRefined {
    pub fn new(refiner: ChildrenRefiner) -> Self {
        Self { refiner }
    }
}

impl TupleModifier for DerivativesFromRefined {
    fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError> {
        check_arity(1, tuple)?;
        let parent = tuple[0];
        let mut total = nalgebra::Vector3::zeros();
        for child in self.refiner.refine(store, parent)? {
            total += store.xyz_derivative(child)?;
        }
        for (axis, key) in XYZ.into_iter().enumerate() {
            store.add_to_derivative(parent, key, total[axis])?;
        }
        Ok(())
    }

    fn inputs(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        let mut inputs = vec![ModelObject::Particle(tuple[0])];
        inputs.extend(
            self.refiner
                .children_or_empty(store, tuple[0])
                .into_iter()
                .map(ModelObject::Particle),
        );
        inputs
    }

    fn outputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
        vec![ModelObject::Particle(tuple[0])]
    }
}

/// Keeps `parent` at the centroid of its children and routes its derivatives back to them.
pub fn centroid_constraint(name: &str, parent: ParticleId, refiner: ChildrenRefiner) -> TupleConstraint {
    TupleConstraint::new(
        name,
        Box::new(CentroidOfRefined::new(refiner)),
        Some(Box::new(DerivativesToRefined::averaged(refiner))),
        ParticleTuple::single(parent),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{KeyRegistry, X, Y};
    use crate::engine::constraint::ScoreState;
    use nalgebra::Point3;
    use std::sync::Arc;

    const TOLERANCE: f64 = 1e-9;

    fn setup() -> (ParticleStore, ParticleId, Vec<ParticleId>, ChildrenRefiner) {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let children_key = store.key::<ParticlesAttr>("children");
        let parent = store.add_particle("parent");
        store.add_xyz(parent, &Point3::origin()).unwrap();
        let children: Vec<ParticleId> = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 3.0, 0.0]]
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = store.add_particle(&format!("child{i}"));
                store.add_xyz(id, &Point3::new(p[0], p[1], p[2])).unwrap();
                id
            })
            .collect();
        store
            .add_attribute(parent, children_key, children.clone())
            .unwrap();
        (store, parent, children, ChildrenRefiner::new(children_key))
    }

    #[test]
    fn centroid_is_written_to_parent() {
        let (mut store, parent, _, refiner) = setup();
        let mut constraint = centroid_constraint("centroid", parent, refiner);
        constraint.before_evaluate(&mut store).unwrap();
        let center = store.xyz(parent).unwrap();
        assert!((center - Point3::new(1.0, 1.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn parent_derivatives_are_split_among_children() {
        let (mut store, parent, children, refiner) = setup();
        let mut constraint = centroid_constraint("centroid", parent, refiner);
        store.add_to_derivative(parent, X, 3.0).unwrap();
        store.add_to_derivative(parent, Y, -6.0).unwrap();

        constraint.after_evaluate(&mut store).unwrap();

        for child in children {
            assert!((store.derivative(child, X).unwrap() - 1.0).abs() < TOLERANCE);
            assert!((store.derivative(child, Y).unwrap() + 2.0).abs() < TOLERANCE);
        }
    }

    #[test]
    fn derivatives_from_refined_sums_children() {
        let (mut store, parent, children, refiner) = setup();
        for (i, &child) in children.iter().enumerate() {
            store.add_to_derivative(child, X, i as f64).unwrap();
        }
        DerivativesFromRefined::new(refiner)
            .apply(&mut store, &ParticleTuple::single(parent))
            .unwrap();
        assert!((store.derivative(parent, X).unwrap() - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn centroid_constraint_declares_children_as_inputs() {
        let (store, parent, children, refiner) = setup();
        let constraint = centroid_constraint("centroid", parent, refiner);
        let inputs = constraint.inputs(&store);
        for child in &children {
            assert!(inputs.contains(&ModelObject::Particle(*child)));
        }
        assert_eq!(constraint.outputs(&store), vec![ModelObject::Particle(parent)]);
    }
}
