use crate::core::attributes::IntAttr;
use crate::core::error::{LookupError, ModelError};
use crate::core::keys::IntKey;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::{ContainerId, ParticleId};
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use crate::engine::context::ScoringContext;
use crate::engine::dependency::ModelObject;
use crate::engine::restraint::{Restraint, ScoreTerm, score_tuple_list};
use crate::engine::score::TupleScore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Classifies a tuple into an integer bucket.
pub trait TuplePredicate: Send + Sync {
    fn value(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<i64, ModelError>;

    fn inputs(&self, _store: &ParticleStore, particles: &[ParticleId]) -> Vec<ModelObject> {
        particles.iter().copied().map(ModelObject::Particle).collect()
    }
}

impl<F> TuplePredicate for F
where
    F: Fn(&ParticleStore, &ParticleTuple) -> i64 + Send + Sync,
{
    fn value(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<i64, ModelError> {
        Ok(self(store, tuple))
    }
}

fn encode_types(types: &[i64], num_types: i64) -> Result<i64, ModelError> {
    types.iter().try_fold(0i64, |acc, &t| {
        if !(0..num_types).contains(&t) {
            return Err(LookupError::TypeOutOfRange {
                type_value: t,
                num_types,
            }
            .into());
        }
        acc.checked_mul(num_types)
            .and_then(|shifted| shifted.checked_add(t))
            .ok_or(ModelError::PredicateOverflow {
                num_types,
                arity: types.len(),
            })
    })
}

fn tuple_types(store: &ParticleStore, tuple: &ParticleTuple, key: IntKey) -> Result<Vec<i64>, ModelError> {
    tuple
        .iter()
        .map(|p| store.get_attribute::<IntAttr>(p, key).copied())
        .collect()
}

/// Encodes the integer types of a tuple's particles, in tuple order, as one value.
///
/// Types must lie in `0..num_types`; `(a, b)` and `(b, a)` give different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedTypePredicate {
    type_key: IntKey,
    num_types: i64,
}

impl OrderedTypePredicate {
    pub fn new(type_key: IntKey, num_types: i64) -> Self {
        Self { type_key, num_types }
    }

    /// The predicate value of a tuple whose particles have `types`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::TypeOutOfRange`] for a type outside `0..num_types`, and
    /// [`ModelError::PredicateOverflow`] if the encoded value does not fit in an `i64`.
    pub fn value_for(&self, types: &[i64]) -> Result<i64, ModelError> {
        encode_types(types, self.num_types)
    }
}

impl TuplePredicate for OrderedTypePredicate {
    fn value(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<i64, ModelError> {
        self.value_for(&tuple_types(store, tuple, self.type_key)?)
    }
}

/// Like [`OrderedTypePredicate`], but the types are sorted first so particle order is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnorderedTypePredicate {
    type_key: IntKey,
    num_types: i64,
}

impl UnorderedTypePredicate {
    pub fn new(type_key: IntKey, num_types: i64) -> Self {
        Self { type_key, num_types }
    }

    pub fn value_for(&self, types: &[i64]) -> Result<i64, ModelError> {
        let mut sorted = types.to_vec();
        sorted.sort_unstable();
        encode_types(&sorted, self.num_types)
    }
}

impl TuplePredicate for UnorderedTypePredicate {
    fn value(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<i64, ModelError> {
        self.value_for(&tuple_types(store, tuple, self.type_key)?)
    }
}

struct Bucket {
    score: Arc<dyn TupleScore>,
    tuples: Vec<ParticleTuple>,
}

impl Bucket {
    fn new(score: Arc<dyn TupleScore>) -> Self {
        Self {
            score,
            tuples: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClassificationStamp {
    container: u64,
    store: u64,
    scores: u64,
}

/// Applies a different tuple score to each predicate value of a container's tuples.
///
/// Tuples are classified into per-value buckets that are cached until the input container,
/// any attribute value, or the set of registered scores changes. Once attached, the restraint
/// is reached through [`Model::restraint_as_mut`](crate::engine::model::Model::restraint_as_mut).
pub struct PredicateRestraint {
    name: String,
    predicate: Box<dyn TuplePredicate>,
    input: ContainerId,
    buckets: BTreeMap<i64, Bucket>,
    unknown: Option<Bucket>,
    is_complete: bool,
    scores_version: u64,
    stamp: Option<ClassificationStamp>,
}

impl PredicateRestraint {
    pub fn new(name: &str, predicate: Box<dyn TuplePredicate>, input: ContainerId) -> Self {
        Self {
            name: name.to_string(),
            predicate,
            input,
            buckets: BTreeMap::new(),
            unknown: None,
            is_complete: true,
            scores_version: 0,
            stamp: None,
        }
    }

    /// Applies `score` to every tuple whose predicate value is `value`.
    pub fn set_score(&mut self, value: i64, score: Arc<dyn TupleScore>) {
        self.buckets.insert(value, Bucket::new(score));
        self.scores_version += 1;
    }

    /// Applies `score` to every tuple whose value has no registered score.
    pub fn set_unknown_score(&mut self, score: Arc<dyn TupleScore>) {
        self.unknown = Some(Bucket::new(score));
        self.scores_version += 1;
    }

    /// When set (the default), a tuple with no matching score is an error; otherwise it is
    /// skipped.
    pub fn set_is_complete(&mut self, is_complete: bool) {
        self.is_complete = is_complete;
        self.scores_version += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// The tuples last classified under `value`, empty for unregistered values.
    pub fn tuples_for(&self, value: i64) -> &[ParticleTuple] {
        self.buckets
            .get(&value)
            .map(|bucket| bucket.tuples.as_slice())
            .unwrap_or_default()
    }

    pub fn unknown_tuples(&self) -> &[ParticleTuple] {
        self.unknown
            .as_ref()
            .map(|bucket| bucket.tuples.as_slice())
            .unwrap_or_default()
    }

    fn current_stamp(&self, ctx: &ScoringContext) -> Result<ClassificationStamp, ModelError> {
        Ok(ClassificationStamp {
            container: ctx.container(self.input)?.revision(),
            store: ctx.store.revision(),
            scores: self.scores_version,
        })
    }

    /// Re-classifies the input tuples if anything they depend on changed since the last pass.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnmatchedPredicate`] (wrapped in [`ModelError::Lookup`]) when the
    /// restraint is complete and a tuple has no score for its value.
    pub fn update_lists_if_necessary(&mut self, ctx: &ScoringContext) -> Result<(), ModelError> {
        let stamp = self.current_stamp(ctx)?;
        if self.stamp == Some(stamp) {
            return Ok(());
        }
        self.stamp = None;
        for bucket in self.buckets.values_mut().chain(self.unknown.as_mut()) {
            bucket.tuples.clear();
        }

        let mut dropped = 0usize;
        for tuple in ctx.tuples(self.input)? {
            let value = self.predicate.value(ctx.store, tuple)?;
            if let Some(bucket) = self.buckets.get_mut(&value) {
                bucket.tuples.push(*tuple);
            } else if let Some(unknown) = self.unknown.as_mut() {
                unknown.tuples.push(*tuple);
            } else if self.is_complete {
                return Err(LookupError::UnmatchedPredicate {
                    value,
                    tuple: *tuple,
                }
                .into());
            } else {
                dropped += 1;
            }
        }

        debug!(
            restraint = self.name.as_str(),
            buckets = self.buckets.len(),
            dropped,
            "Classified predicate tuples."
        );
        self.stamp = Some(stamp);
        Ok(())
    }

    fn scored_buckets(&self) -> impl Iterator<Item = (Option<i64>, &Bucket)> {
        self.buckets
            .iter()
            .map(|(value, bucket)| (Some(*value), bucket))
            .chain(self.unknown.as_ref().map(|bucket| (None, bucket)))
    }
}

impl Restraint for PredicateRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, ctx: &ScoringContext) -> Result<(), ModelError> {
        let arity = ctx.container(self.input)?.arity();
        for (_, bucket) in self.scored_buckets() {
            if let Some(expected) = bucket.score.arity() {
                if expected != arity {
                    return Err(ModelError::ArityMismatch {
                        expected,
                        found: arity,
                    });
                }
            }
        }
        Ok(())
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        mut da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        self.update_lists_if_necessary(ctx)?;
        let mut total = 0.0;
        for (value, bucket) in self.scored_buckets() {
            let partial = score_tuple_list(bucket.score.as_ref(), ctx, &bucket.tuples, da.as_deref_mut())?;
            trace!(restraint = self.name.as_str(), ?value, partial, "Scored predicate bucket.");
            total += partial;
        }
        Ok(total)
    }

    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject> {
        let mut inputs = vec![ModelObject::Container(self.input)];
        if let Ok(container) = ctx.container(self.input) {
            let particles = container.all_possible_particles(ctx.containers);
            inputs.extend(self.predicate.inputs(ctx.store, &particles));
            for (_, bucket) in self.scored_buckets() {
                inputs.extend(bucket.score.inputs(ctx.store, &particles));
            }
        }
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    fn create_current_decomposition(
        &mut self,
        ctx: &ScoringContext,
    ) -> Result<Vec<ScoreTerm>, ModelError> {
        self.update_lists_if_necessary(ctx)?;
        let mut terms = Vec::new();
        for (value, bucket) in self.scored_buckets() {
            let label = match value {
                Some(value) => format!("{} [{value}]", self.name),
                None => format!("{} [unknown]", self.name),
            };
            for tuple in &bucket.tuples {
                terms.push(ScoreTerm {
                    label: format!("{label} {:?}", tuple.as_slice()),
                    particles: tuple.as_slice().to_vec(),
                    score: bucket.score.evaluate(ctx.store, tuple, None)?,
                });
            }
        }
        Ok(terms)
    }
}
