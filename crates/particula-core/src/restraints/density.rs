use crate::core::density::{DensityError, DensitySampler};
use crate::core::error::ModelError;
use crate::core::keys::FloatKey;
use crate::core::models::accumulator::DerivativeAccumulator;
use crate::core::models::ids::ParticleId;
use crate::engine::context::ScoringContext;
use crate::engine::dependency::ModelObject;
use crate::engine::restraint::Restraint;
use std::sync::Arc;
use tracing::trace;

/// Scores the fit of a group of particles to an experimental density map.
///
/// Positions, radii and (optional) per-particle weights are handed to a [`DensitySampler`];
/// the returned per-particle gradients become coordinate derivatives.
pub struct DensityFitRestraint {
    name: String,
    particles: Vec<ParticleId>,
    sampler: Arc<dyn DensitySampler>,
    radius_key: FloatKey,
    weight_key: Option<FloatKey>,
}

impl DensityFitRestraint {
    pub fn new(
        name: &str,
        particles: Vec<ParticleId>,
        sampler: Arc<dyn DensitySampler>,
        radius_key: FloatKey,
        weight_key: Option<FloatKey>,
    ) -> Self {
        Self {
            name: name.to_string(),
            particles,
            sampler,
            radius_key,
            weight_key,
        }
    }
}

impl Restraint for DensityFitRestraint {
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
        da: Option<&mut DerivativeAccumulator>,
    ) -> Result<f64, ModelError> {
        let n = self.particles.len();
        let mut positions = Vec::with_capacity(n);
        let mut radii = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for &particle in &self.particles {
            positions.push(ctx.store.xyz(particle)?);
            radii.push(ctx.store.float(particle, self.radius_key)?);
            weights.push(match self.weight_key {
                Some(key) => ctx.store.float(particle, key)?,
                None => 1.0,
            });
        }

        let sample = self.sampler.sample(&positions, &radii, &weights)?;
        if sample.gradients.len() != n {
            return Err(DensityError::GradientCountMismatch {
                expected: n,
                found: sample.gradients.len(),
            }
            .into());
        }
        trace!(restraint = self.name.as_str(), score = sample.score, "Sampled density.");

        if let Some(da) = da {
            for (&particle, gradient) in self.particles.iter().zip(&sample.gradients) {
                da.add_xyz(particle, gradient);
            }
        }
        Ok(sample.score)
    }

    fn inputs(&self, _ctx: &ScoringContext) -> Vec<ModelObject> {
        self.particles.iter().copied().map(ModelObject::Particle).collect()
    }
}
