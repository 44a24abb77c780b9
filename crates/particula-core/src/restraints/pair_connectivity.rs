use super::connectivity::{ascending_order, score_candidates};
use crate::core::error::ModelError;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::ParticleId;
use crate::core::models::tuple::ParticleTuple;
use crate::engine::context::ScoringContext;
use crate::engine::dependency::ModelObject;
use crate::engine::restraint::{Restraint, ScoreTerm};
use crate::engine::score::TupleScore;
use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// Applies the `num_to_apply` lowest-scoring pairs between two particle groups.
///
/// Candidate edges are every cross pair `(a, b)` with `a` from the first group and `b` from the
/// second. Each pass scores all candidates and accepts them in ascending score order. Without
/// particle reuse an edge is skipped if either endpoint was used by an earlier accepted edge.
pub struct PairConnectivityRestraint {
    name: String,
    score: Arc<dyn TupleScore>,
    particles: Vec<ParticleId>,
    candidates: Vec<ParticleTuple>,
    num_to_apply: usize,
    particle_reuse: bool,
    selected: Vec<ParticleTuple>,
}

impl PairConnectivityRestraint {
    pub fn new(
        name: &str,
        first: &[ParticleId],
        second: &[ParticleId],
        score: Arc<dyn TupleScore>,
        num_to_apply: usize,
        particle_reuse: bool,
    ) -> Self {
        let candidates = first
            .iter()
            .cartesian_product(second)
            .map(|(&a, &b)| ParticleTuple::pair(a, b))
            .collect();
        let particles = first.iter().chain(second).copied().unique().collect();
        Self {
            name: name.to_string(),
            score,
            particles,
            candidates,
            num_to_apply,
            particle_reuse,
            selected: Vec::new(),
        }
    }

    pub fn candidates(&self) -> &[ParticleTuple] {
        &self.candidates
    }

    /// The edges accepted by the most recent evaluation, lowest score first.
    pub fn selected_pairs(&self) -> &[ParticleTuple] {
        &self.selected
    }
}

impl Restraint for PairConnectivityRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, ctx: &ScoringContext) -> Result<(), ModelError> {
        match self.particles.iter().find(|&&p| !ctx.store.contains(p)) {
            Some(&missing) => Err(ModelError::UnknownParticle(missing)),
            None => Ok(()),
        }
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        mut da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        self.selected.clear();
        let scores = score_candidates(self.score.as_ref(), ctx, &self.candidates)?;
        let mut used: HashSet<ParticleId> = HashSet::new();
        let mut total = 0.0;
        for index in ascending_order(&scores) {
            if self.selected.len() == self.num_to_apply {
                break;
            }
            let pair = self.candidates[index];
            if !self.particle_reuse && (used.contains(&pair[0]) || used.contains(&pair[1])) {
                continue;
            }
            used.insert(pair[0]);
            used.insert(pair[1]);
            total += match da.as_deref_mut() {
                Some(da) => self.score.evaluate(ctx.store, &pair, Some(da))?,
                None => scores[index],
            };
            self.selected.push(pair);
        }
        trace!(restraint = self.name.as_str(), applied = self.selected.len(), total, "Applied pair connectivity.");
        Ok(total)
    }

    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject> {
        self.score.inputs(ctx.store, &self.particles)
    }

    fn create_current_decomposition(
        &mut self,
        ctx: &ScoringContext,
    ) -> Result<Vec<ScoreTerm>, ModelError> {
        self.unprotected_evaluate(ctx, None)?;
        self.selected
            .iter()
            .map(|pair| {
                Ok(ScoreTerm {
                    label: format!("{} {:?}", self.name, pair.as_slice()),
                    particles: pair.as_slice().to_vec(),
                    score: self.score.evaluate(ctx.store, pair, None)?,
                })
            })
            .collect()
    }
}
