use super::dependency::ModelObject;
use crate::core::error::ModelError;
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;

/// Work scheduled around restraint evaluation to keep derived attributes consistent.
///
/// `before_evaluate` runs in dependency order before scoring; `after_evaluate` runs in reverse
/// order once derivatives have been written to the store, and only on passes that compute
/// derivatives.
pub trait ScoreState: Send + Sync {
    fn name(&self) -> &str;

    fn before_evaluate(&mut self, store: &mut ParticleStore) -> Result<(), ModelError>;

    fn after_evaluate(&mut self, _store: &mut ParticleStore) -> Result<(), ModelError> {
        Ok(())
    }

    fn inputs(&self, store: &ParticleStore) -> Vec<ModelObject>;

    fn outputs(&self, store: &ParticleStore) -> Vec<ModelObject>;
}

/// Updates attributes of the particles in a tuple.
///
/// Used both for value updates before scoring and for derivative propagation afterwards.
pub trait TupleModifier: Send + Sync {
    fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError>;

    fn inputs(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject>;

    fn outputs(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject>;
}

/// A before modifier and an optional derivative modifier bound to one tuple.
pub struct TupleConstraint {
    name: String,
    before: Box<dyn TupleModifier>,
    after: Option<Box<dyn TupleModifier>>,
    tuple: ParticleTuple,
}

impl TupleConstraint {
    pub fn new(
        name: &str,
        before: Box<dyn TupleModifier>,
        after: Option<Box<dyn TupleModifier>>,
        tuple: ParticleTuple,
    ) -> Self {
        Self {
            name: name.to_string(),
            before,
            after,
            tuple,
        }
    }

    pub fn tuple(&self) -> ParticleTuple {
        self.tuple
    }
}

impl ScoreState for TupleConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_evaluate(&mut self, store: &mut ParticleStore) -> Result<(), ModelError> {
        self.before.apply(store, &self.tuple)
    }

    fn after_evaluate(&mut self, store: &mut ParticleStore) -> Result<(), ModelError> {
        match &self.after {
            Some(after) => after.apply(store, &self.tuple),
            None => Ok(()),
        }
    }

    /// Values read before scoring plus derivatives written after it.
    fn inputs(&self, store: &ParticleStore) -> Vec<ModelObject> {
        let mut inputs = self.before.inputs(store, &self.tuple);
        if let Some(after) = &self.after {
            inputs.extend(after.outputs(store, &self.tuple));
        }
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    /// Values written before scoring plus derivatives read after it.
    fn outputs(&self, store: &ParticleStore) -> Vec<ModelObject> {
        let mut outputs = self.before.outputs(store, &self.tuple);
        if let Some(after) = &self.after {
            outputs.extend(after.inputs(store, &self.tuple));
        }
        outputs.sort_unstable();
        outputs.dedup();
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{KeyRegistry, X};
    use crate::core::models::ids::ParticleId;
    use std::sync::Arc;

    struct CopyX;

    impl TupleModifier for CopyX {
        fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError> {
            let x = store.float(tuple[0], X)?;
            store.set_attribute(tuple[1], X, x)
        }

        fn inputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
            vec![ModelObject::Particle(tuple[0])]
        }

        fn outputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
            vec![ModelObject::Particle(tuple[1])]
        }
    }

    struct CopyXDerivative;

    impl TupleModifier for CopyXDerivative {
        fn apply(&self, store: &mut ParticleStore, tuple: &ParticleTuple) -> Result<(), ModelError> {
            let d = store.derivative(tuple[1], X)?;
            store.add_to_derivative(tuple[0], X, d)
        }

        fn inputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
            vec![ModelObject::Particle(tuple[1])]
        }

        fn outputs(&self, _store: &ParticleStore, tuple: &ParticleTuple) -> Vec<ModelObject> {
            vec![ModelObject::Particle(tuple[0])]
        }
    }

    fn setup() -> (ParticleStore, ParticleId, ParticleId) {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let source = store.add_particle("source");
        let copy = store.add_particle("copy");
        store.add_attribute(source, X, 4.0).unwrap();
        store.add_attribute(copy, X, 0.0).unwrap();
        (store, source, copy)
    }

    #[test]
    fn before_and_after_phases_apply_modifiers() {
        let (mut store, source, copy) = setup();
        let mut constraint = TupleConstraint::new(
            "mirror",
            Box::new(CopyX),
            Some(Box::new(CopyXDerivative)),
            ParticleTuple::pair(source, copy),
        );

        constraint.before_evaluate(&mut store).unwrap();
        assert_eq!(store.float(copy, X).unwrap(), 4.0);

        store.add_to_derivative(copy, X, 1.5).unwrap();
        constraint.after_evaluate(&mut store).unwrap();
        assert_eq!(store.derivative(source, X).unwrap(), 1.5);
    }

    #[test]
    fn inputs_and_outputs_combine_both_phases() {
        let (store, source, copy) = setup();
        let constraint = TupleConstraint::new(
            "mirror",
            Box::new(CopyX),
            Some(Box::new(CopyXDerivative)),
            ParticleTuple::pair(source, copy),
        );
        assert_eq!(constraint.inputs(&store), vec![ModelObject::Particle(source)]);
        assert_eq!(constraint.outputs(&store), vec![ModelObject::Particle(copy)]);
    }
}
