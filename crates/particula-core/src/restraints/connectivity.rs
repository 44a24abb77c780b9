use crate::core::attributes::IntAttr;
use crate::core::error::ModelError;
use crate::core::keys::IntKey;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::ParticleId;
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use crate::engine::context::ScoringContext;
use crate::engine::dependency::ModelObject;
use crate::engine::restraint::{Restraint, ScoreTerm};
use crate::engine::score::TupleScore;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Scores every candidate pair without derivatives.
pub(super) fn score_candidates(
    score: &dyn TupleScore,
    ctx: &ScoringContext,
    candidates: &[ParticleTuple],
) -> Result<Vec<f64>, ModelError> {
    #[cfg(feature = "parallel")]
    if candidates.len() >= ctx.config.parallel_threshold {
        return candidates
            .par_iter()
            .map(|pair| score.evaluate(ctx.store, pair, None))
            .collect();
    }

    candidates
        .iter()
        .map(|pair| score.evaluate(ctx.store, pair, None))
        .collect()
}

/// Candidate indices in ascending score order; ties keep enumeration order.
pub(super) fn ascending_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    order
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Merges the sets of `a` and `b`; false if they were already one set.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return false;
        }
        self.parent[root_a] = root_b;
        true
    }
}

/// Connects all particle types with the cheapest set of pair scores.
///
/// Candidate edges are every pair of particles with different types. Each pass scores all
/// candidates, then runs Kruskal's algorithm over the types (not the particles): edges are
/// visited in ascending score order and accepted when they join two type components, until
/// `num_types - 1` edges span every type. Only accepted edges contribute to the score and
/// derivatives.
///
/// Types are read once, when the restraint is built.
pub struct ConnectivityRestraint {
    name: String,
    score: Arc<dyn TupleScore>,
    particles: Vec<ParticleId>,
    candidates: Vec<ParticleTuple>,
    /// Dense type index of both endpoints of each candidate.
    candidate_types: Vec<(usize, usize)>,
    num_types: usize,
    selected: Vec<ParticleTuple>,
}

impl ConnectivityRestraint {
    /// Builds the candidate edges for `particles`.
    ///
    /// # Arguments
    ///
    /// * `name` - Restraint name used in logs and errors.
    /// * `store` - The particle store holding the type attribute.
    /// * `particles` - The particles to connect.
    /// * `type_key` - Integer attribute giving each particle's type.
    /// * `score` - Pair score applied to candidate edges.
    ///
    /// # Errors
    ///
    /// Fails if a particle lacks the type attribute, or with
    /// [`ModelError::CombinatorialMismatch`] if the number of candidate edges does not match
    /// the count implied by the per-type particle counts.
    pub fn new(
        name: &str,
        store: &ParticleStore,
        particles: Vec<ParticleId>,
        type_key: IntKey,
        score: Arc<dyn TupleScore>,
    ) -> Result<Self, ModelError> {
        let mut dense: HashMap<i64, usize> = HashMap::new();
        let mut types = Vec::with_capacity(particles.len());
        for &particle in &particles {
            let raw = *store.get_attribute::<IntAttr>(particle, type_key)?;
            let next = dense.len();
            types.push(*dense.entry(raw).or_insert(next));
        }

        let edges: Vec<(usize, usize)> = (0..particles.len())
            .tuple_combinations::<(usize, usize)>()
            .filter(|&(i, j)| types[i] != types[j])
            .collect();
        Self::from_edges(name, particles, &types, edges, score)
    }

    /// Assembles the restraint from dense particle types and candidate edges given as index
    /// pairs into `particles`.
    ///
    /// The edge count must equal `sum_i s_i (S - s_i) / 2`, where `s_i` is the number of
    /// particles of type `i` and `S` the total.
    pub(crate) fn from_edges(
        name: &str,
        particles: Vec<ParticleId>,
        types: &[usize],
        edges: Vec<(usize, usize)>,
        score: Arc<dyn TupleScore>,
    ) -> Result<Self, ModelError> {
        let per_type = types.iter().counts();
        let num_types = per_type.len();
        let total = types.len();
        let expected = per_type.values().map(|&s| s * (total - s)).sum::<usize>() / 2;
        if edges.len() != expected {
            return Err(ModelError::CombinatorialMismatch {
                restraint: name.to_string(),
                expected,
                found: edges.len(),
            });
        }

        let (candidates, candidate_types): (Vec<ParticleTuple>, Vec<(usize, usize)>) = edges
            .into_iter()
            .map(|(i, j)| (ParticleTuple::pair(particles[i], particles[j]), (types[i], types[j])))
            .unzip();

        debug!(
            restraint = name,
            particles = total,
            num_types,
            candidates = candidates.len(),
            "Built connectivity candidates."
        );
        Ok(Self {
            name: name.to_string(),
            score,
            particles,
            candidates,
            candidate_types,
            num_types,
            selected: Vec::new(),
        })
    }

    pub fn num_types(&self) -> usize {
        self.num_types
    }

    pub fn candidates(&self) -> &[ParticleTuple] {
        &self.candidates
    }

    /// The edges accepted by the most recent evaluation, in acceptance order.
    pub fn selected_pairs(&self) -> &[ParticleTuple] {
        &self.selected
    }
}

impl Restraint for ConnectivityRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        mut da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        self.selected.clear();
        if self.num_types < 2 {
            return Ok(0.0);
        }
        let scores = score_candidates(self.score.as_ref(), ctx, &self.candidates)?;
        let mut components = DisjointSets::new(self.num_types);
        let mut total = 0.0;
        for index in ascending_order(&scores) {
            if self.selected.len() == self.num_types - 1 {
                break;
            }
            let (type_a, type_b) = self.candidate_types[index];
            if !components.union(type_a, type_b) {
                continue;
            }
            let pair = self.candidates[index];
            total += match da.as_deref_mut() {
                Some(da) => self.score.evaluate(ctx.store, &pair, Some(da))?,
                None => scores[index],
            };
            self.selected.push(pair);
        }
        trace!(restraint = self.name.as_str(), edges = self.selected.len(), total, "Spanning tree complete.");
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
