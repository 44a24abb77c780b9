use crate::core::error::ModelError;
use crate::core::functions::HarmonicLowerBound;
use crate::core::keys::FloatKey;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::ParticleId;
use crate::core::models::tuple::ParticleTuple;
use crate::engine::context::ScoringContext;
use crate::engine::dependency::ModelObject;
use crate::engine::restraint::{Restraint, ScoreTerm, score_tuple_list};
use crate::engine::score::{SphereDistancePairScore, TupleScore};
use itertools::Itertools;

/// Penalises overlap between particle spheres.
///
/// Every pair is scored on every pass with `HarmonicLowerBound { mean: 0, k }` applied to the
/// surface gap `d - r_a - r_b`, so separated and touching pairs contribute nothing. For large
/// systems a close-pair container feeding a container restraint prunes the pair list instead.
pub struct ExclusionVolumeRestraint {
    name: String,
    score: SphereDistancePairScore<HarmonicLowerBound>,
    particles: Vec<ParticleId>,
    pairs: Vec<ParticleTuple>,
}

impl ExclusionVolumeRestraint {
    /// Excludes every pair within one group.
    pub fn within(name: &str, particles: &[ParticleId], radius_key: FloatKey, k: f64) -> Self {
        let pairs = particles
            .iter()
            .tuple_combinations::<(_, _)>()
            .map(|(&a, &b)| ParticleTuple::pair(a, b))
            .collect();
        Self::from_pairs(name, particles.to_vec(), pairs, radius_key, k)
    }

    /// Excludes every pair with one particle from each group.
    pub fn between(
        name: &str,
        first: &[ParticleId],
        second: &[ParticleId],
        radius_key: FloatKey,
        k: f64,
    ) -> Self {
        let pairs = first
            .iter()
            .cartesian_product(second)
            .map(|(&a, &b)| ParticleTuple::pair(a, b))
            .collect();
        let particles = first.iter().chain(second).copied().unique().collect();
        Self::from_pairs(name, particles, pairs, radius_key, k)
    }

    fn from_pairs(
        name: &str,
        particles: Vec<ParticleId>,
        pairs: Vec<ParticleTuple>,
        radius_key: FloatKey,
        k: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            score: SphereDistancePairScore::new(HarmonicLowerBound::new(0.0, k), radius_key),
            particles,
            pairs,
        }
    }

    pub fn pairs(&self) -> &[ParticleTuple] {
        &self.pairs
    }
}

impl Restraint for ExclusionVolumeRestraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn unprotected_evaluate(
        &mut self,
        ctx: &ScoringContext,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        score_tuple_list(&self.score, ctx, &self.pairs, da)
    }

    fn inputs(&self, ctx: &ScoringContext) -> Vec<ModelObject> {
        self.score.inputs(ctx.store, &self.particles)
    }

    fn create_current_decomposition(
        &mut self,
        ctx: &ScoringContext,
    ) -> Result<Vec<ScoreTerm>, ModelError> {
        let mut terms = Vec::new();
        for pair in &self.pairs {
            let score = self.score.evaluate(ctx.store, pair, None)?;
            if score > 0.0 {
                terms.push(ScoreTerm {
                    label: format!("{} {:?}", self.name, pair.as_slice()),
                    particles: pair.as_slice().to_vec(),
                    score,
                });
            }
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{KeyRegistry, RADIUS, X};
    use crate::core::models::store::ParticleStore;
    use crate::engine::config::ModelConfig;
    use crate::engine::container::Containers;
    use nalgebra::Point3;
    use std::sync::Arc;

    fn two_spheres(separation: f64) -> (ParticleStore, ParticleId, ParticleId) {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let a = store.add_particle("a");
        let b = store.add_particle("b");
        store.add_xyz(a, &Point3::origin()).unwrap();
        store.add_xyz(b, &Point3::new(separation, 0.0, 0.0)).unwrap();
        store.add_attribute(a, RADIUS, 1.0).unwrap();
        store.add_attribute(b, RADIUS, 1.5).unwrap();
        (store, a, b)
    }

    fn exclusion_score(separation: f64) -> f64 {
        let (store, a, b) = two_spheres(separation);
        let containers = Containers::with_key();
        let config = ModelConfig::default();
        let ctx = ScoringContext::new(&store, &containers, &config);
        ExclusionVolumeRestraint::within("excluded", &[a, b], RADIUS, 10.0)
            .unprotected_evaluate(&ctx, None)
            .unwrap()
    }

    #[test]
    fn separated_and_touching_spheres_score_zero() {
        assert_eq!(exclusion_score(4.0), 0.0);
        assert_eq!(exclusion_score(2.5), 0.0);
    }

    #[test]
    fn score_strictly_increases_as_spheres_overlap() {
        let scores: Vec<f64> = [2.4, 2.0, 1.5, 0.5].into_iter().map(exclusion_score).collect();
        assert!(scores[0] > 0.0);
        assert!(scores.windows(2).all(|w| w[1] > w[0]));
        assert!((scores[1] - 0.5 * 10.0 * 0.25).abs() < 1e-9);
    }

    #[test]
    fn overlap_pushes_spheres_apart() {
        let (store, a, b) = two_spheres(2.0);
        let containers = Containers::with_key();
        let config = ModelConfig::default();
        let ctx = ScoringContext::new(&store, &containers, &config);
        let mut restraint = ExclusionVolumeRestraint::within("excluded", &[a, b], RADIUS, 10.0);
        let mut da = DerivativeAccumulator::new();
        restraint.unprotected_evaluate(&ctx, Some(&mut da)).unwrap();
        assert!(da.get(a, X) > 0.0);
        assert!(da.get(b, X) < 0.0);
    }

    #[test]
    fn between_groups_only_scores_cross_pairs() {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let ids: Vec<ParticleId> = (0..4)
            .map(|i| {
                let id = store.add_particle(&format!("p{i}"));
                store.add_xyz(id, &Point3::origin()).unwrap();
                store.add_attribute(id, RADIUS, 1.0).unwrap();
                id
            })
            .collect();
        let restraint = ExclusionVolumeRestraint::between("cross", &ids[..1], &ids[1..], RADIUS, 1.0);
        assert_eq!(restraint.pairs().len(), 3);
        assert!(restraint.pairs().iter().all(|pair| pair[0] == ids[0]));

        let mut within = ExclusionVolumeRestraint::within("all", &ids, RADIUS, 1.0);
        assert_eq!(within.pairs().len(), 6);
        let containers = Containers::with_key();
        let config = ModelConfig::default();
        let ctx = ScoringContext::new(&store, &containers, &config);
        let terms = within.create_current_decomposition(&ctx).unwrap();
        assert_eq!(terms.len(), 6);
        assert!(terms.iter().all(|t| (t.score - 2.0).abs() < 1e-9));
    }
}
