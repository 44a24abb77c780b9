use super::config::ModelConfig;
use super::container::{Container, Containers};
use crate::core::error::ModelError;
use crate::core::models::ids::ContainerId;
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;

/// Read-only view of a model handed to restraints during a scoring pass.
///
/// Containers are refreshed before restraints run, so their cached tuples are current.
#[derive(Clone, Copy)]
pub struct ScoringContext<'a> {
    pub store: &'a ParticleStore,
    pub containers: &'a Containers,
    pub config: &'a ModelConfig,
}

impl<'a> ScoringContext<'a> {
    pub fn new(store: &'a ParticleStore, containers: &'a Containers, config: &'a ModelConfig) -> Self {
        Self {
            store,
            containers,
            config,
        }
    }

    pub fn container(&self, id: ContainerId) -> Result<&'a Container, ModelError> {
        self.containers
            .get(id)
            .ok_or(ModelError::UnknownContainer(id))
    }

    pub fn tuples(&self, id: ContainerId) -> Result<&'a [ParticleTuple], ModelError> {
        Ok(self.container(id)?.tuples())
    }
}
