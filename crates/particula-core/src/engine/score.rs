use super::dependency::ModelObject;
use crate::core::error::ModelError;
use crate::core::functions::UnaryFunction;
use crate::core::geometry::distance_and_gradient;
use crate::core::keys::FloatKey;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::ParticleId;
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use std::sync::Arc;

/// Scores one tuple of particles.
///
/// Implementations must be pure functions of the attribute values they read so that disjoint
/// tuples can be scored concurrently, each worker writing into its own accumulator.
pub trait TupleScore: Send + Sync {
    fn name(&self) -> &str;

    /// The tuple arity this score accepts, or `None` for any arity.
    fn arity(&self) -> Option<usize> {
        None
    }

    fn evaluate(
        &self,
        store: &ParticleStore,
        tuple: &ParticleTuple,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError>;

    /// Model objects read when scoring tuples drawn from `particles`.
    fn inputs(&self, _store: &ParticleStore, particles: &[ParticleId]) -> Vec<ModelObject> {
        particles.iter().copied().map(ModelObject::Particle).collect()
    }
}

pub(crate) fn check_arity(expected: usize, tuple: &ParticleTuple) -> Result<(), ModelError> {
    if tuple.arity() == expected {
        Ok(())
    } else {
        Err(ModelError::ArityMismatch {
            expected,
            found: tuple.arity(),
        })
    }
}

/// Applies a unary function to the distance between the two particles of a pair.
#[derive(Debug)]
pub struct DistancePairScore<F: UnaryFunction> {
    function: F,
}

impl<F: UnaryFunction> DistancePairScore<F> {
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F: UnaryFunction> TupleScore for DistancePairScore<F> {
    fn name(&self) -> &str {
        "DistancePairScore"
    }

    fn arity(&self) -> Option<usize> {
        Some(2)
    }

    fn evaluate(
        &self,
        store: &ParticleStore,
        tuple: &ParticleTuple,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        check_arity(2, tuple)?;
        let (a, b) = (tuple[0], tuple[1]);
        let (distance, direction) = distance_and_gradient(&store.xyz(a)?, &store.xyz(b)?);
        let (value, slope) = self.function.evaluate_with_derivative(distance);
        if let Some(da) = da {
            let gradient = direction * slope;
            da.add_xyz(a, &gradient);
            da.add_xyz(b, &-gradient);
        }
        Ok(value)
    }
}

/// Applies a unary function to the surface gap `d - r_a - r_b` of a pair.
#[derive(Debug)]
pub struct SphereDistancePairScore<F: UnaryFunction> {
    function: F,
    radius_key: FloatKey,
}

impl<F: UnaryFunction> SphereDistancePairScore<F> {
    pub fn new(function: F, radius_key: FloatKey) -> Self {
        Self {
            function,
            radius_key,
        }
    }
}

impl<F: UnaryFunction> TupleScore for SphereDistancePairScore<F> {
    fn name(&self) -> &str {
        "SphereDistancePairScore"
    }

    fn arity(&self) -> Option<usize> {
        Some(2)
    }

    fn evaluate(
        &self,
        store: &ParticleStore,
        tuple: &ParticleTuple,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        check_arity(2, tuple)?;
        let (a, b) = (tuple[0], tuple[1]);
        let (distance, direction) = distance_and_gradient(&store.xyz(a)?, &store.xyz(b)?);
        let gap = distance - store.float(a, self.radius_key)? - store.float(b, self.radius_key)?;
        let (value, slope) = self.function.evaluate_with_derivative(gap);
        if let Some(da) = da {
            let gradient = direction * slope;
            da.add_xyz(a, &gradient);
            da.add_xyz(b, &-gradient);
        }
        Ok(value)
    }
}

/// Sums the `n` lowest of several scores evaluated on the same tuple.
pub struct MinimumTupleScore {
    scores: Vec<Arc<dyn TupleScore>>,
    n: usize,
}

impl MinimumTupleScore {
    pub fn new(scores: Vec<Arc<dyn TupleScore>>, n: usize) -> Self {
        Self { scores, n }
    }
}

impl TupleScore for MinimumTupleScore {
    fn name(&self) -> &str {
        "MinimumTupleScore"
    }

    fn evaluate(
        &self,
        store: &ParticleStore,
        tuple: &ParticleTuple,
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        let mut values = Vec::with_capacity(self.scores.len());
        for (index, score) in self.scores.iter().enumerate() {
            values.push((score.evaluate(store, tuple, None)?, index));
        }
        values.sort_by(|a, b| a.0.total_cmp(&b.0));
        values.truncate(self.n);

        match da {
            None => Ok(values.iter().map(|(value, _)| value).sum()),
            Some(da) => {
                let mut total = 0.0;
                for (_, index) in values {
                    total += self.scores[index].evaluate(store, tuple, Some(&mut *da))?;
                }
                Ok(total)
            }
        }
    }

    fn inputs(&self, store: &ParticleStore, particles: &[ParticleId]) -> Vec<ModelObject> {
        let mut inputs: Vec<ModelObject> = self
            .scores
            .iter()
            .flat_map(|score| score.inputs(store, particles))
            .collect();
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::functions::{Harmonic, HarmonicLowerBound};
    use crate::core::keys::{KeyRegistry, RADIUS, X, Y, Z};
    use nalgebra::Point3;

    const TOLERANCE: f64 = 1e-9;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    fn pair_store(a: Point3<f64>, b: Point3<f64>, radius: f64) -> (ParticleStore, ParticleTuple) {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let pa = store.add_particle("a");
        let pb = store.add_particle("b");
        store.add_xyz(pa, &a).unwrap();
        store.add_xyz(pb, &b).unwrap();
        store.add_attribute(pa, RADIUS, radius).unwrap();
        store.add_attribute(pb, RADIUS, radius).unwrap();
        (store, ParticleTuple::pair(pa, pb))
    }

    fn assert_gradient_matches_finite_difference(score: &dyn TupleScore, a: Point3<f64>, b: Point3<f64>) {
        let (store, tuple) = pair_store(a, b, 0.5);
        let mut da = DerivativeAccumulator::new();
        score.evaluate(&store, &tuple, Some(&mut da)).unwrap();

        let h = 1e-6;
        for particle in [tuple[0], tuple[1]] {
            for key in [X, Y, Z] {
                let mut plus = store.clone();
                let value = plus.float(particle, key).unwrap();
                plus.set_attribute(particle, key, value + h).unwrap();
                let mut minus = store.clone();
                minus.set_attribute(particle, key, value - h).unwrap();
                let numeric = (score.evaluate(&plus, &tuple, None).unwrap()
                    - score.evaluate(&minus, &tuple, None).unwrap())
                    / (2.0 * h);
                assert!((numeric - da.get(particle, key)).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn distance_score_value_and_derivatives() {
        let score = DistancePairScore::new(Harmonic::new(1.0, 2.0));
        let (store, tuple) = pair_store(Point3::origin(), Point3::new(3.0, 0.0, 0.0), 0.0);
        let mut da = DerivativeAccumulator::new();
        let value = score.evaluate(&store, &tuple, Some(&mut da)).unwrap();
        assert!(f64_approx_equal(value, 4.0));
        assert!(f64_approx_equal(da.get(tuple[0], X), -4.0));
        assert!(f64_approx_equal(da.get(tuple[1], X), 4.0));

        assert_gradient_matches_finite_difference(
            &score,
            Point3::new(0.1, 0.2, 0.3),
            Point3::new(1.4, -0.7, 2.2),
        );
    }

    #[test]
    fn sphere_distance_uses_surface_gap() {
        let score = SphereDistancePairScore::new(HarmonicLowerBound::new(0.0, 1.0), RADIUS);
        let (touching, tuple) = pair_store(Point3::origin(), Point3::new(1.0, 0.0, 0.0), 0.5);
        assert_eq!(score.evaluate(&touching, &tuple, None).unwrap(), 0.0);
        let (overlap, tuple) = pair_store(Point3::origin(), Point3::new(0.5, 0.0, 0.0), 0.5);
        assert!(f64_approx_equal(score.evaluate(&overlap, &tuple, None).unwrap(), 0.125));

        assert_gradient_matches_finite_difference(
            &score,
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.3, 0.4, 0.1),
        );
    }

    #[test]
    fn pair_scores_reject_other_arities() {
        let (store, tuple) = pair_store(Point3::origin(), Point3::new(1.0, 0.0, 0.0), 0.5);
        let score = DistancePairScore::new(Harmonic::new(0.0, 1.0));
        let single = ParticleTuple::single(tuple[0]);
        assert!(matches!(
            score.evaluate(&store, &single, None),
            Err(ModelError::ArityMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn coincident_particles_have_finite_derivatives() {
        let (store, tuple) = pair_store(Point3::origin(), Point3::origin(), 0.0);
        let score = DistancePairScore::new(Harmonic::new(1.0, 1.0));
        let mut da = DerivativeAccumulator::new();
        let value = score.evaluate(&store, &tuple, Some(&mut da)).unwrap();
        assert!(f64_approx_equal(value, 0.5));
        assert!(da.xyz(tuple[0]).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn minimum_score_sums_lowest_n() {
        let (store, tuple) = pair_store(Point3::origin(), Point3::new(2.0, 0.0, 0.0), 0.0);
        let scores: Vec<Arc<dyn TupleScore>> = vec![
            Arc::new(DistancePairScore::new(Harmonic::new(0.0, 1.0))),
            Arc::new(DistancePairScore::new(Harmonic::new(2.0, 1.0))),
            Arc::new(DistancePairScore::new(Harmonic::new(1.0, 1.0))),
        ];
        let minimum = MinimumTupleScore::new(scores, 2);
        let mut da = DerivativeAccumulator::new();
        let value = minimum.evaluate(&store, &tuple, Some(&mut da)).unwrap();
        assert!(f64_approx_equal(value, 0.5));
        assert!(f64_approx_equal(da.get(tuple[1], X), 1.0));
        assert!(f64_approx_equal(minimum.evaluate(&store, &tuple, None).unwrap(), 0.5));
    }
}
