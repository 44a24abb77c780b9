use nalgebra::{Point3, Vector3};
use thiserror::Error;

/// Result of comparing a set of particles against a density map.
#[derive(Debug, Clone, PartialEq)]
pub struct DensitySample {
    pub score: f64,
    /// One gradient per sampled particle, in input order.
    pub gradients: Vec<Vector3<f64>>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DensityError {
    #[error("Sampler returned {found} gradients for {expected} particles")]
    GradientCountMismatch { expected: usize, found: usize },
    #[error("Density sampling failed: {0}")]
    Sampling(String),
}

/// Scores particle positions against experimental density.
///
/// Implementations own the map and the convolution numerics; the core only consumes the score
/// and per-particle gradients.
pub trait DensitySampler: Send + Sync {
    fn sample(
        &self,
        positions: &[Point3<f64>],
        radii: &[f64],
        weights: &[f64],
    ) -> Result<DensitySample, DensityError>;
}
