use slotmap::new_key_type;

new_key_type! {
    pub struct ParticleId;
    pub struct ContainerId;
    pub struct RestraintId;
    pub struct ScoreStateId;
}
