use super::context::ScoringContext;
use super::dependency::ModelObject;
use super::score::TupleScore;
use crate::core::error::ModelError;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::{ContainerId, ParticleId};
use crate::core::models::tuple::ParticleTuple;
use std::any::Any;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One entry of a score breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTerm {
    pub label: String,
    pub particles: Vec<ParticleId>,
    pub score: f64,
}

/// Access to a restraint's concrete type, implemented for every `'static` type.
pub trait AsAnyMut {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAnyMut for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The unit of scoring held by a model.
pub trait Restraint: AsAnyMut + Send + Sync {
    fn name(&self) -> &str;

    /// Checks the restraint against the model it is being attached to.
    fn validate(&self, _ctx: &ScoringContext) -> Result<(), ModelError> {
        Ok(())
    }

    /// Computes the unweighted score; derivatives go to `da`, which carries the weight.
    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError>;

    /// Every model object read during evaluation.
    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject>;

    /// Splits the current score into per-tuple terms for diagnostics.
    fn create_current_decomposition(
        &mut self,
        ctx: &ScoringContext,
    ) -> Result<Vec<ScoreTerm>, ModelError> {
        let score = self.unprotected_evaluate(ctx, None)?;
        let particles = self
            .inputs(ctx)
            .into_iter()
            .filter_map(|object| match object {
                ModelObject::Particle(p) => Some(p),
                ModelObject::Container(_) => None,
            })
            .collect();
        Ok(vec![ScoreTerm {
            label: self.name().to_string(),
            particles,
            score,
        }])
    }
}

fn score_tuples(
    score: &dyn TupleScore,
    ctx: &ScoringContext,
    tuples: &[ParticleTuple],
    mut da: Option<&mut DerivativeAccumulator>,
) -> Result<f64, ModelError> {
    let mut total = 0.0;
    for tuple in tuples {
        total += score.evaluate(ctx.store, tuple, da.as_deref_mut())?;
    }
    Ok(total)
}

#[cfg(feature = "parallel")]
fn score_tuples_parallel(
    score: &dyn TupleScore,
    ctx: &ScoringContext,
    tuples: &[ParticleTuple],
    da: Option<&mut DerivativeAccumulator>,
) -> Result<f64, ModelError> {
    let chunk_size = ctx.config.parallel_threshold.max(1);
    let weight = da.as_ref().map(|da| da.weight());
    let partials: Vec<(f64, Option<DerivativeAccumulator>)> = tuples
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut local = weight.map(DerivativeAccumulator::with_weight);
            let value = score_tuples(score, ctx, chunk, local.as_mut())?;
            Ok((value, local))
        })
        .collect::<Result<_, ModelError>>()?;

    let mut total = 0.0;
    let mut da = da;
    for (value, local) in partials {
        total += value;
        if let (Some(da), Some(local)) = (da.as_deref_mut(), local) {
            da.merge(local);
        }
    }
    Ok(total)
}

/// Sums `score` over `tuples`, across rayon workers once the list reaches the configured
/// threshold.
pub(crate) fn score_tuple_list(
    score: &dyn TupleScore,
    ctx: &ScoringContext,
    tuples: &[ParticleTuple],
    da: Option<&mut DerivativeAccumulator>,
) -> Result<f64, ModelError> {
    #[cfg(feature = "parallel")]
    if tuples.len() >= ctx.config.parallel_threshold {
        return score_tuples_parallel(score, ctx, tuples, da);
    }

    score_tuples(score, ctx, tuples, da)
}

/// Sums a tuple score over every tuple of a container.
pub struct ContainerRestraint {
    name: String,
    score: Arc<dyn TupleScore>,
    container: ContainerId,
}

impl ContainerRestraint {
    pub fn new(name: &str, score: Arc<dyn TupleScore>, container: ContainerId) -> Self {
        Self {
            name: name.to_string(),
            score,
            container,
        }
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }
}

impl Restraint for ContainerRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, ctx: &ScoringContext) -> Result<(), ModelError> {
        let container = ctx.container(self.container)?;
        match self.score.arity() {
            Some(expected) if expected != container.arity() => Err(ModelError::ArityMismatch {
                expected,
                found: container.arity(),
            }),
            _ => Ok(()),
        }
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        let tuples = ctx.tuples(self.container)?;
        score_tuple_list(self.score.as_ref(), ctx, tuples, da)
    }

    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject> {
        let mut inputs = vec![ModelObject::Container(self.container)];
        if let Ok(container) = ctx.container(self.container) {
            let particles = container.all_possible_particles(ctx.containers);
            inputs.extend(self.score.inputs(ctx.store, &particles));
        }
        inputs
    }

    fn create_current_decomposition(
        &mut self,
        ctx: &ScoringContext,
    ) -> Result<Vec<ScoreTerm>, ModelError> {
        ctx.tuples(self.container)?
            .iter()
            .map(|tuple| {
                Ok(ScoreTerm {
                    label: format!("{} {:?}", self.name, tuple.as_slice()),
                    particles: tuple.as_slice().to_vec(),
                    score: self.score.evaluate(ctx.store, tuple, None)?,
                })
            })
            .collect()
    }
}

/// Applies a tuple score to one explicit tuple.
pub struct TupleRestraint {
    name: String,
    score: Arc<dyn TupleScore>,
    tuple: ParticleTuple,
}

impl TupleRestraint {
    pub fn new(name: &str, score: Arc<dyn TupleScore>, tuple: ParticleTuple) -> Self {
        Self {
            name: name.to_string(),
            score,
            tuple,
        }
    }

    pub fn tuple(&self) -> ParticleTuple {
        self.tuple
    }
}

impl Restraint for TupleRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, ctx: &ScoringContext) -> Result<(), ModelError> {
        if let Some(expected) = self.score.arity() {
            if expected != self.tuple.arity() {
                return Err(ModelError::ArityMismatch {
                    expected,
                    found: self.tuple.arity(),
                });
            }
        }
        for particle in self.tuple.iter() {
            if !ctx.store.contains(particle) {
                return Err(ModelError::UnknownParticle(particle));
            }
        }
        Ok(())
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        self.score.evaluate(ctx.store, &self.tuple, da)
    }

    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject> {
        self.score.inputs(ctx.store, self.tuple.as_slice())
    }
}
