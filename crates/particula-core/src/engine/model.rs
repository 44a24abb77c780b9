use super::config::{CheckLevel, ConfigError, ModelConfig};
use super::constraint::ScoreState;
use super::container::{self, Container, Containers, ListContainer};
use super::context::ScoringContext;
use super::dependency::{DependencyGraph, ModelObject, NodeSpec, ScheduleNode};
use super::restraint::{Restraint, ScoreTerm};
use crate::core::attributes::AttributeType;
use crate::core::error::ModelError;
use crate::core::keys::{AttributeTag, FloatKey, Key, KeyRegistry};
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::{ContainerId, ParticleId, RestraintId, ScoreStateId};
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use nalgebra::Point3;
use slotmap::SlotMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

struct RestraintEntry {
    restraint: Box<dyn Restraint>,
    weight: f64,
}

/// Owns particles, containers, restraints and score states, and evaluates them.
///
/// Every object lives in an arena inside the model and refers to others by id. The ordering
/// of score states and derived containers is cached in a [`DependencyGraph`] that is rebuilt
/// whenever the set of objects, a list container's content, or a particle-reference
/// attribute changes.
pub struct Model {
    store: ParticleStore,
    config: ModelConfig,
    containers: Containers,
    restraints: SlotMap<RestraintId, RestraintEntry>,
    score_states: SlotMap<ScoreStateId, Box<dyn ScoreState>>,
    dependencies: Option<DependencyGraph>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// Creates an empty model with its own key registry and the default configuration.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(KeyRegistry::new()))
    }

    /// Creates an empty model that shares `registry` with other models.
    pub fn with_registry(registry: Arc<KeyRegistry>) -> Self {
        Self {
            store: ParticleStore::new(registry),
            config: ModelConfig::default(),
            containers: Containers::with_key(),
            restraints: SlotMap::with_key(),
            score_states: SlotMap::with_key(),
            dependencies: None,
        }
    }

    /// Creates an empty model and registers the keys declared in `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Evaluation settings and key declarations.
    /// * `registry` - The registry to create keys in.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownAttributeType`] for a declaration with an unknown type.
    pub fn with_config(config: ModelConfig, registry: Arc<KeyRegistry>) -> Result<Self, ConfigError> {
        config.register_keys(&registry)?;
        let mut model = Self::with_registry(registry);
        model.config = config;
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        self.store.registry()
    }

    /// A read-only view for evaluating restraints outside of [`Self::evaluate`].
    pub fn scoring_context(&self) -> ScoringContext<'_> {
        ScoringContext::new(&self.store, &self.containers, &self.config)
    }

    fn invalidate_dependencies(&mut self) {
        if self.dependencies.take().is_some() {
            trace!("Dependency graph invalidated.");
        }
    }

    // ---- Particles and attributes ----

    pub fn key<T: AttributeType>(&self, name: &str) -> Key<T> {
        self.store.key(name)
    }

    pub fn add_particle(&mut self, name: &str) -> ParticleId {
        self.store.add_particle(name)
    }

    /// Removes a particle and all of its attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ParticleInUse`] if a list container, restraint, score state or
    /// particle-reference attribute still refers to the particle.
    pub fn remove_particle(&mut self, id: ParticleId) -> Result<(), ModelError> {
        if !self.store.contains(id) {
            return Err(ModelError::UnknownParticle(id));
        }
        if let Some(holder) = self.particle_holder(id) {
            return Err(ModelError::ParticleInUse {
                particle: self.store.particle_name(id),
                holder,
            });
        }
        self.store.remove_particle(id)?;
        self.invalidate_dependencies();
        debug!(particle = ?id, "Removed particle.");
        Ok(())
    }

    fn particle_holder(&self, id: ParticleId) -> Option<String> {
        let object = ModelObject::Particle(id);
        for (_, container) in &self.containers {
            if let Container::List(list) = container {
                if list.tuples().iter().any(|t| t.contains(id)) {
                    return Some(format!("container '{}'", container.name()));
                }
            }
        }
        let ctx = self.scoring_context();
        for (_, entry) in &self.restraints {
            if entry.restraint.inputs(&ctx).contains(&object) {
                return Some(format!("restraint '{}'", entry.restraint.name()));
            }
        }
        for (_, state) in &self.score_states {
            if state.inputs(&self.store).contains(&object) || state.outputs(&self.store).contains(&object) {
                return Some(format!("score state '{}'", state.name()));
            }
        }
        self.store
            .find_referrer(id)
            .map(|owner| format!("an attribute of particle '{}'", self.store.particle_name(owner)))
    }

    pub fn add_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.store.add_attribute(id, key, value)?;
        self.on_attribute_changed::<T>();
        Ok(())
    }

    pub fn set_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
        value: T::Value,
    ) -> Result<(), ModelError> {
        self.store.set_attribute(id, key, value)?;
        self.on_attribute_changed::<T>();
        Ok(())
    }

    pub fn get_attribute<T: AttributeType>(&self, id: ParticleId, key: Key<T>) -> Result<&T::Value, ModelError> {
        self.store.get_attribute(id, key)
    }

    pub fn remove_attribute<T: AttributeType>(
        &mut self,
        id: ParticleId,
        key: Key<T>,
    ) -> Result<T::Value, ModelError> {
        let value = self.store.remove_attribute(id, key)?;
        self.on_attribute_changed::<T>();
        Ok(value)
    }

    pub fn has_attribute<T: AttributeType>(&self, id: ParticleId, key: Key<T>) -> bool {
        self.store.has_attribute(id, key)
    }

    /// Particle references feed declared inputs and outputs, so changing one reshapes the graph.
    fn on_attribute_changed<T: AttributeType>(&mut self) {
        if matches!(T::TAG, AttributeTag::Particle | AttributeTag::Particles) {
            self.invalidate_dependencies();
        }
    }

    pub fn derivative(&self, id: ParticleId, key: FloatKey) -> Result<f64, ModelError> {
        self.store.derivative(id, key)
    }

    pub fn add_to_derivative(&mut self, id: ParticleId, key: FloatKey, delta: f64) -> Result<(), ModelError> {
        self.store.add_to_derivative(id, key, delta)
    }

    pub fn xyz(&self, id: ParticleId) -> Result<Point3<f64>, ModelError> {
        self.store.xyz(id)
    }

    pub fn set_xyz(&mut self, id: ParticleId, position: &Point3<f64>) -> Result<(), ModelError> {
        self.store.set_xyz(id, position)
    }

    pub fn add_xyz(&mut self, id: ParticleId, position: &Point3<f64>) -> Result<(), ModelError> {
        self.store.add_xyz(id, position)
    }

    // ---- Containers ----

    /// Attaches a container.
    ///
    /// # Errors
    ///
    /// Fails if an upstream container does not exist, if a close-pair container's upstream
    /// does not hold single particles or its cutoff is negative or not finite, or if a
    /// container set is empty or mixes arities.
    pub fn add_container(&mut self, mut container: Container) -> Result<ContainerId, ModelError> {
        let mut arities = Vec::with_capacity(container.upstreams().len());
        for &upstream in container.upstreams() {
            arities.push(
                self.containers
                    .get(upstream)
                    .ok_or(ModelError::UnknownContainer(upstream))?
                    .arity(),
            );
        }
        match &container {
            Container::ClosePairs(close) => {
                if arities[0] != 1 {
                    return Err(ModelError::ArityMismatch {
                        expected: 1,
                        found: arities[0],
                    });
                }
                if !close.cutoff().is_finite() || close.cutoff() < 0.0 {
                    return Err(ModelError::InvalidCutoff {
                        container: close.name().to_string(),
                        cutoff: close.cutoff(),
                    });
                }
            }
            Container::Set(set) => {
                let Some(&first) = arities.first() else {
                    return Err(ModelError::EmptyContainerSet(set.name().to_string()));
                };
                if let Some(&found) = arities.iter().find(|&&arity| arity != first) {
                    return Err(ModelError::ArityMismatch {
                        expected: first,
                        found,
                    });
                }
            }
            _ => {}
        }
        if let Some(&arity) = arities.first() {
            container.set_arity(arity);
        }
        debug!(name = container.name(), kind = container.kind(), "Added container.");
        let id = self.containers.insert(container);
        self.invalidate_dependencies();
        Ok(id)
    }

    /// Attaches an empty list container of the given arity.
    pub fn add_list_container(&mut self, name: &str, arity: usize) -> ContainerId {
        let id = self.containers.insert(Container::List(ListContainer::new(name, arity)));
        self.invalidate_dependencies();
        id
    }

    pub fn container(&self, id: ContainerId) -> Result<&Container, ModelError> {
        self.containers.get(id).ok_or(ModelError::UnknownContainer(id))
    }

    /// Mutable access to a list container's content.
    pub fn list_container_mut(&mut self, id: ContainerId) -> Result<&mut ListContainer, ModelError> {
        self.invalidate_dependencies();
        let container = self
            .containers
            .get_mut(id)
            .ok_or(ModelError::UnknownContainer(id))?;
        let name = container.name().to_string();
        container.as_list_mut().ok_or(ModelError::ContainerKindMismatch {
            container: name,
            expected: "list",
        })
    }

    /// Detaches a container that nothing else uses.
    pub fn remove_container(&mut self, id: ContainerId) -> Result<Container, ModelError> {
        let name = self.container(id)?.name().to_string();
        if let Some(holder) = self.container_holder(id) {
            return Err(ModelError::ContainerInUse {
                container: name,
                holder,
            });
        }
        let container = self
            .containers
            .remove(id)
            .ok_or(ModelError::UnknownContainer(id))?;
        self.invalidate_dependencies();
        Ok(container)
    }

    fn container_holder(&self, id: ContainerId) -> Option<String> {
        let object = ModelObject::Container(id);
        for (other_id, other) in &self.containers {
            if other_id != id && other.upstreams().contains(&id) {
                return Some(format!("container '{}'", other.name()));
            }
        }
        let ctx = self.scoring_context();
        for (_, entry) in &self.restraints {
            if entry.restraint.inputs(&ctx).contains(&object) {
                return Some(format!("restraint '{}'", entry.restraint.name()));
            }
        }
        for (_, state) in &self.score_states {
            if state.inputs(&self.store).contains(&object) {
                return Some(format!("score state '{}'", state.name()));
            }
        }
        None
    }

    /// The current tuples of a container, refreshing derived containers first.
    pub fn container_tuples(&mut self, id: ContainerId) -> Result<&[ParticleTuple], ModelError> {
        container::refresh(&mut self.containers, &self.store, id)?;
        Ok(self.container(id)?.tuples())
    }

    pub fn is_container_up_to_date(&self, id: ContainerId) -> Result<bool, ModelError> {
        Ok(self
            .container(id)?
            .is_up_to_date(&self.containers, &self.store))
    }

    pub fn container_inputs(&self, id: ContainerId) -> Result<Vec<ModelObject>, ModelError> {
        Ok(self.container(id)?.inputs(&self.containers, &self.store))
    }

    // ---- Restraints ----

    pub fn add_restraint(&mut self, restraint: Box<dyn Restraint>) -> Result<RestraintId, ModelError> {
        self.add_weighted_restraint(restraint, 1.0)
    }

    /// Attaches a restraint whose score is multiplied by `weight`.
    ///
    /// # Errors
    ///
    /// Propagates the restraint's own validation against this model.
    pub fn add_weighted_restraint(
        &mut self,
        restraint: Box<dyn Restraint>,
        weight: f64,
    ) -> Result<RestraintId, ModelError> {
        restraint.validate(&self.scoring_context())?;
        debug!(name = restraint.name(), weight, "Added restraint.");
        let id = self.restraints.insert(RestraintEntry { restraint, weight });
        self.invalidate_dependencies();
        Ok(id)
    }

    pub fn remove_restraint(&mut self, id: RestraintId) -> Result<Box<dyn Restraint>, ModelError> {
        let entry = self
            .restraints
            .remove(id)
            .ok_or(ModelError::UnknownRestraint(id))?;
        self.invalidate_dependencies();
        Ok(entry.restraint)
    }

    pub fn set_restraint_weight(&mut self, id: RestraintId, weight: f64) -> Result<(), ModelError> {
        self.restraints
            .get_mut(id)
            .ok_or(ModelError::UnknownRestraint(id))?
            .weight = weight;
        Ok(())
    }

    pub fn restraint_weight(&self, id: RestraintId) -> Result<f64, ModelError> {
        self.restraints
            .get(id)
            .map(|entry| entry.weight)
            .ok_or(ModelError::UnknownRestraint(id))
    }

    pub fn restraint(&self, id: RestraintId) -> Result<&dyn Restraint, ModelError> {
        self.restraints
            .get(id)
            .map(|entry| entry.restraint.as_ref())
            .ok_or(ModelError::UnknownRestraint(id))
    }

    /// Mutable access to an attached restraint.
    ///
    /// The dependency graph is rebuilt on the next evaluation, since the restraint's inputs
    /// may change.
    pub fn restraint_mut(&mut self, id: RestraintId) -> Result<&mut dyn Restraint, ModelError> {
        self.invalidate_dependencies();
        self.restraints
            .get_mut(id)
            .map(|entry| entry.restraint.as_mut() as &mut dyn Restraint)
            .ok_or(ModelError::UnknownRestraint(id))
    }

    /// Mutable access to an attached restraint as its concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::RestraintKindMismatch`] if the restraint is not an `R`.
    pub fn restraint_as_mut<R: Restraint + 'static>(&mut self, id: RestraintId) -> Result<&mut R, ModelError> {
        let restraint = self.restraint_mut(id)?;
        let name = restraint.name().to_string();
        restraint
            .as_any_mut()
            .downcast_mut::<R>()
            .ok_or(ModelError::RestraintKindMismatch {
                restraint: name,
                expected: std::any::type_name::<R>(),
            })
    }

    pub fn restraint_ids(&self) -> Vec<RestraintId> {
        self.restraints.keys().collect()
    }

    // ---- Score states ----

    pub fn add_score_state(&mut self, state: Box<dyn ScoreState>) -> ScoreStateId {
        debug!(name = state.name(), "Added score state.");
        let id = self.score_states.insert(state);
        self.invalidate_dependencies();
        id
    }

    pub fn remove_score_state(&mut self, id: ScoreStateId) -> Result<Box<dyn ScoreState>, ModelError> {
        let state = self
            .score_states
            .remove(id)
            .ok_or(ModelError::UnknownScoreState(id))?;
        self.invalidate_dependencies();
        Ok(state)
    }

    // ---- Dependencies ----

    fn node_specs(&self) -> Vec<NodeSpec> {
        let containers = self
            .containers
            .iter()
            .filter(|(_, container)| !container.upstreams().is_empty())
            .map(|(id, container)| NodeSpec {
                node: ScheduleNode::Container(id),
                name: format!("container '{}'", container.name()),
                inputs: container.inputs(&self.containers, &self.store),
                outputs: vec![ModelObject::Container(id)],
            });
        let states = self.score_states.iter().map(|(id, state)| NodeSpec {
            node: ScheduleNode::ScoreState(id),
            name: format!("score state '{}'", state.name()),
            inputs: state.inputs(&self.store),
            outputs: state.outputs(&self.store),
        });
        containers.chain(states).collect()
    }

    fn ensure_dependencies(&mut self) -> Result<(), ModelError> {
        if self.dependencies.is_none() || self.config.check_level == CheckLevel::Internal {
            self.dependencies = Some(DependencyGraph::build(self.node_specs())?);
        }
        Ok(())
    }

    fn restraint_inputs(&self, ids: &[RestraintId]) -> Result<Vec<ModelObject>, ModelError> {
        let ctx = self.scoring_context();
        let mut inputs: HashSet<ModelObject> = HashSet::new();
        for &id in ids {
            let entry = self
                .restraints
                .get(id)
                .ok_or(ModelError::UnknownRestraint(id))?;
            inputs.extend(entry.restraint.inputs(&ctx));
        }
        let mut inputs: Vec<ModelObject> = inputs.into_iter().collect();
        inputs.sort_unstable();
        Ok(inputs)
    }

    /// The containers and score states that must run before `ids` can be scored, in order.
    pub fn required_score_states(&mut self, ids: &[RestraintId]) -> Result<Vec<ScheduleNode>, ModelError> {
        self.ensure_dependencies()?;
        let inputs = self.restraint_inputs(ids)?;
        Ok(self
            .dependencies
            .as_ref()
            .map(|graph| graph.required_for(&inputs))
            .unwrap_or_default())
    }

    // ---- Evaluation ----

    /// Scores the given restraints.
    ///
    /// Runs the before phase of every required container and score state in dependency order,
    /// sums the weighted restraint scores and, when `calc_derivatives` is set, writes
    /// derivatives to the store and runs the after phases in reverse order.
    ///
    /// # Return
    ///
    /// The total weighted score.
    ///
    /// # Errors
    ///
    /// Fails on dependency cycles, missing attributes, failed lookups and (unless checks are
    /// disabled) non-finite restraint scores.
    #[instrument(skip_all, name = "model_evaluate", fields(restraints = ids.len(), calc_derivatives = calc_derivatives))]
    pub fn evaluate(&mut self, ids: &[RestraintId], calc_derivatives: bool) -> Result<f64, ModelError> {
        let schedule = self.required_score_states(ids)?;
        trace!(nodes = schedule.len(), "Running before phase.");
        for node in &schedule {
            match *node {
                ScheduleNode::Container(id) => {
                    container::refresh(&mut self.containers, &self.store, id)?;
                }
                ScheduleNode::ScoreState(id) => {
                    let state = self
                        .score_states
                        .get_mut(id)
                        .ok_or(ModelError::UnknownScoreState(id))?;
                    state.before_evaluate(&mut self.store)?;
                }
            }
        }

        if calc_derivatives {
            self.store.zero_derivatives();
        }

        let ctx = ScoringContext::new(&self.store, &self.containers, &self.config);
        let mut derivatives = DerivativeAccumulator::new();
        let mut total = 0.0;
        for &id in ids {
            let entry = self
                .restraints
                .get_mut(id)
                .ok_or(ModelError::UnknownRestraint(id))?;
            let mut local = calc_derivatives.then(|| DerivativeAccumulator::with_weight(entry.weight));
            let score = entry.restraint.unprotected_evaluate(&ctx, local.as_mut())?;
            if self.config.check_level != CheckLevel::None && !score.is_finite() {
                return Err(ModelError::NonFiniteScore {
                    restraint: entry.restraint.name().to_string(),
                    score,
                });
            }
            trace!(restraint = entry.restraint.name(), score, "Scored restraint.");
            total += entry.weight * score;
            if let Some(local) = local {
                derivatives.merge(local);
            }
        }

        if calc_derivatives {
            self.store.apply_derivatives(&derivatives)?;
            for node in schedule.iter().rev() {
                if let ScheduleNode::ScoreState(id) = *node {
                    let state = self
                        .score_states
                        .get_mut(id)
                        .ok_or(ModelError::UnknownScoreState(id))?;
                    state.after_evaluate(&mut self.store)?;
                }
            }
        }

        info!(score = total, "Evaluation complete.");
        Ok(total)
    }

    /// Scores every attached restraint.
    pub fn evaluate_all(&mut self, calc_derivatives: bool) -> Result<f64, ModelError> {
        let ids = self.restraint_ids();
        self.evaluate(&ids, calc_derivatives)
    }

    /// Weighted per-term scores of one restraint, after bringing its inputs up to date.
    pub fn score_breakdown(&mut self, id: RestraintId) -> Result<Vec<ScoreTerm>, ModelError> {
        self.evaluate(&[id], false)?;
        let ctx = ScoringContext::new(&self.store, &self.containers, &self.config);
        let entry = self
            .restraints
            .get_mut(id)
            .ok_or(ModelError::UnknownRestraint(id))?;
        let weight = entry.weight;
        let mut terms = entry.restraint.create_current_decomposition(&ctx)?;
        for term in &mut terms {
            term.score *= weight;
        }
        Ok(terms)
    }
}
