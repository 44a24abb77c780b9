use std::fmt;

/// A scalar function of one variable with an analytic derivative.
pub trait UnaryFunction: fmt::Debug + Send + Sync {
    fn evaluate(&self, feature: f64) -> f64 {
        self.evaluate_with_derivative(feature).0
    }

    /// Returns the value and the first derivative at `feature`.
    fn evaluate_with_derivative(&self, feature: f64) -> (f64, f64);
}

#[inline]
pub fn harmonic(feature: f64, mean: f64, k: f64) -> (f64, f64) {
    let delta = feature - mean;
    (0.5 * k * delta * delta, k * delta)
}

/// `0.5 * k * (x - mean)^2` everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Harmonic {
    pub mean: f64,
    pub k: f64,
}

impl Harmonic {
    pub fn new(mean: f64, k: f64) -> Self {
        Self { mean, k }
    }
}

impl UnaryFunction for Harmonic {
    fn evaluate_with_derivative(&self, feature: f64) -> (f64, f64) {
        harmonic(feature, self.mean, self.k)
    }
}

/// Harmonic above `mean`, zero below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicUpperBound {
    pub mean: f64,
    pub k: f64,
}

impl HarmonicUpperBound {
    pub fn new(mean: f64, k: f64) -> Self {
        Self { mean, k }
    }
}

impl UnaryFunction for HarmonicUpperBound {
    fn evaluate_with_derivative(&self, feature: f64) -> (f64, f64) {
        if feature <= self.mean {
            (0.0, 0.0)
        } else {
            harmonic(feature, self.mean, self.k)
        }
    }
}

/// Harmonic below `mean`, zero above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicLowerBound {
    pub mean: f64,
    pub k: f64,
}

impl HarmonicLowerBound {
    pub fn new(mean: f64, k: f64) -> Self {
        Self { mean, k }
    }
}

impl UnaryFunction for HarmonicLowerBound {
    fn evaluate_with_derivative(&self, feature: f64) -> (f64, f64) {
        if feature >= self.mean {
            (0.0, 0.0)
        } else {
            harmonic(feature, self.mean, self.k)
        }
    }
}
