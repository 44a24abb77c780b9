use super::density::DensityError;
use super::keys::RawKey;
use super::models::ids::{ContainerId, ParticleId, RestraintId, ScoreStateId};
use super::models::tuple::ParticleTuple;
use thiserror::Error;

/// A data-driven lookup failure that callers may handle, for example by skipping a term.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("No {kind} parameters found for atom types [{types}]")]
    NoParameters { kind: &'static str, types: String },

    #[error("No score registered for predicate value {value} (tuple {tuple:?})")]
    UnmatchedPredicate { value: i64, tuple: ParticleTuple },

    #[error("Particle type {type_value} is outside 0..{num_types}")]
    TypeOutOfRange { type_value: i64, num_types: i64 },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Particle {0:?} does not exist in the model")]
    UnknownParticle(ParticleId),

    #[error("Key {0:?} was not created by this model's registry")]
    UnknownKey(RawKey),

    #[error("Attribute '{key}' is already present on particle '{particle}'")]
    AttributeAlreadyPresent { key: String, particle: String },

    #[error("Attribute '{key}' is missing on particle '{particle}'")]
    MissingAttribute { key: String, particle: String },

    #[error("Particle '{particle}' is still referenced by {holder}")]
    ParticleInUse { particle: String, holder: String },

    #[error("Container {0:?} does not exist in the model")]
    UnknownContainer(ContainerId),

    #[error("Container '{container}' is still used by {holder}")]
    ContainerInUse { container: String, holder: String },

    #[error("Container '{container}' is not a {expected} container")]
    ContainerKindMismatch {
        container: String,
        expected: &'static str,
    },

    #[error("Close-pair container '{container}' has an invalid cutoff {cutoff}")]
    InvalidCutoff { container: String, cutoff: f64 },

    #[error("Container set '{0}' has no members")]
    EmptyContainerSet(String),

    #[error("Restraint '{restraint}' is not a {expected}")]
    RestraintKindMismatch {
        restraint: String,
        expected: &'static str,
    },

    #[error("Restraint {0:?} does not exist in the model")]
    UnknownRestraint(RestraintId),

    #[error("Score state {0:?} does not exist in the model")]
    UnknownScoreState(ScoreStateId),

    #[error("Expected tuples of arity {expected}, found arity {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("Dependency cycle detected among: {}", members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("Restraint '{restraint}' built {found} candidate pairs, expected {expected}")]
    CombinatorialMismatch {
        restraint: String,
        expected: usize,
        found: usize,
    },

    #[error("Encoding {arity} types with {num_types} types per position overflows an i64")]
    PredicateOverflow { num_types: i64, arity: usize },

    #[error("Restraint '{restraint}' produced a non-finite score: {score}")]
    NonFiniteScore { restraint: String, score: f64 },

    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Density sampling failed: {0}")]
    Density(#[from] DensityError),
}

impl ModelError {
    /// Whether the error is a domain lookup failure rather than a configuration error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ModelError::Lookup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lookup_errors_are_recoverable() {
        let lookup: ModelError = LookupError::NoParameters {
            kind: "bond",
            types: "C, N".to_string(),
        }
        .into();
        assert!(lookup.is_recoverable());

        let cycle = ModelError::DependencyCycle {
            members: vec!["a".to_string(), "b".to_string()],
        };
        assert!(!cycle.is_recoverable());
        assert_eq!(cycle.to_string(), "Dependency cycle detected among: a -> b");
    }

    #[test]
    fn attribute_errors_mention_key_and_particle() {
        let err = ModelError::MissingAttribute {
            key: "float:radius".to_string(),
            particle: "bead-3".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("float:radius"));
        assert!(message.contains("bead-3"));
    }
}
