use super::close_pairs::ClosePairContainer;
use super::dependency::ModelObject;
use crate::core::attributes::IntAttr;
use crate::core::error::ModelError;
use crate::core::keys::IntKey;
use crate::core::models::ids::{ContainerId, ParticleId};
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use slotmap::SlotMap;
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

pub type Containers = SlotMap<ContainerId, Container>;

/// Decides which upstream tuples a dynamic container keeps.
pub trait TupleFilter: Send + Sync {
    fn accepts(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<bool, ModelError>;

    /// Model objects read by [`Self::accepts`] for any tuple drawn from `particles`.
    fn inputs(&self, _store: &ParticleStore, particles: &[ParticleId]) -> Vec<ModelObject> {
        particles.iter().copied().map(ModelObject::Particle).collect()
    }
}

impl<F> TupleFilter for F
where
    F: Fn(&ParticleStore, &ParticleTuple) -> bool + Send + Sync,
{
    fn accepts(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<bool, ModelError> {
        Ok(self(store, tuple))
    }
}

/// Keeps pairs by comparing an integer attribute of both particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairAttributeFilter {
    key: IntKey,
    keep_equal: bool,
}

impl PairAttributeFilter {
    /// Keeps pairs whose two particles share the attribute value.
    pub fn same(key: IntKey) -> Self {
        Self {
            key,
            keep_equal: true,
        }
    }

    /// Keeps pairs whose two particles have different attribute values.
    pub fn different(key: IntKey) -> Self {
        Self {
            key,
            keep_equal: false,
        }
    }
}

impl TupleFilter for PairAttributeFilter {
    fn accepts(&self, store: &ParticleStore, tuple: &ParticleTuple) -> Result<bool, ModelError> {
        if tuple.arity() != 2 {
            return Err(ModelError::ArityMismatch {
                expected: 2,
                found: tuple.arity(),
            });
        }
        let a = store.get_attribute::<IntAttr>(tuple[0], self.key)?;
        let b = store.get_attribute::<IntAttr>(tuple[1], self.key)?;
        Ok((a == b) == self.keep_equal)
    }
}

/// An explicit, sorted set of tuples of one arity.
///
/// Tuples are kept in ascending order without duplicates so membership tests are binary
/// searches. Any mutation may shift the position of existing tuples.
#[derive(Debug, Clone)]
pub struct ListContainer {
    name: String,
    arity: usize,
    tuples: Vec<ParticleTuple>,
    revision: u64,
}

impl ListContainer {
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: name.to_string(),
            arity,
            tuples: Vec::new(),
            revision: 0,
        }
    }

    fn check_arity(&self, tuple: &ParticleTuple) -> Result<(), ModelError> {
        if tuple.arity() == self.arity {
            Ok(())
        } else {
            Err(ModelError::ArityMismatch {
                expected: self.arity,
                found: tuple.arity(),
            })
        }
    }

    pub fn add(&mut self, tuple: ParticleTuple) -> Result<(), ModelError> {
        self.check_arity(&tuple)?;
        if let Err(position) = self.tuples.binary_search(&tuple) {
            self.tuples.insert(position, tuple);
            self.revision += 1;
        }
        Ok(())
    }

    pub fn add_many<I: IntoIterator<Item = ParticleTuple>>(&mut self, tuples: I) -> Result<(), ModelError> {
        let incoming: Vec<ParticleTuple> = tuples.into_iter().collect();
        for tuple in &incoming {
            self.check_arity(tuple)?;
        }
        self.tuples.extend(incoming);
        self.tuples.sort_unstable();
        self.tuples.dedup();
        self.revision += 1;
        Ok(())
    }

    /// Replaces the whole content.
    pub fn set<I: IntoIterator<Item = ParticleTuple>>(&mut self, tuples: I) -> Result<(), ModelError> {
        let incoming: Vec<ParticleTuple> = tuples.into_iter().collect();
        for tuple in &incoming {
            self.check_arity(tuple)?;
        }
        self.tuples = incoming;
        self.tuples.sort_unstable();
        self.tuples.dedup();
        self.revision += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
        self.revision += 1;
    }

    pub fn contains(&self, tuple: &ParticleTuple) -> bool {
        self.tuples.binary_search(tuple).is_ok()
    }

    pub fn tuples(&self) -> &[ParticleTuple] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

/// Upstream and store revisions a derived container was last computed from.
///
/// `store` is `None` for containers whose content does not read attribute values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStamp {
    pub upstream: Vec<u64>,
    pub store: Option<u64>,
}

/// The content of a derived container computed from its current inputs.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub tuples: Vec<ParticleTuple>,
    pub stamp: RefreshStamp,
}

/// The tuples of an upstream container that pass a filter.
pub struct DynamicContainer {
    name: String,
    upstream: ContainerId,
    arity: usize,
    filter: Box<dyn TupleFilter>,
    tuples: Vec<ParticleTuple>,
    revision: u64,
    stamp: Option<RefreshStamp>,
}

impl fmt::Debug for DynamicContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicContainer")
            .field("name", &self.name)
            .field("upstream", &self.upstream)
            .field("len", &self.tuples.len())
            .field("revision", &self.revision)
            .finish()
    }
}

impl DynamicContainer {
    pub fn new(name: &str, upstream: ContainerId, filter: Box<dyn TupleFilter>) -> Self {
        Self {
            name: name.to_string(),
            upstream,
            arity: 0,
            filter,
            tuples: Vec::new(),
            revision: 0,
            stamp: None,
        }
    }

    pub fn upstream(&self) -> ContainerId {
        self.upstream
    }
}

/// The union of the tuples of several member containers of one arity.
///
/// Duplicates across members are kept once and the content is sorted like a list container.
#[derive(Debug, Clone)]
pub struct ContainerSet {
    name: String,
    members: Vec<ContainerId>,
    arity: usize,
    tuples: Vec<ParticleTuple>,
    revision: u64,
    stamp: Option<RefreshStamp>,
}

impl ContainerSet {
    pub fn new(name: &str, members: Vec<ContainerId>) -> Self {
        Self {
            name: name.to_string(),
            members,
            arity: 0,
            tuples: Vec::new(),
            revision: 0,
            stamp: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[ContainerId] {
        &self.members
    }
}

fn revision_of(id: ContainerId, containers: &Containers) -> Result<u64, ModelError> {
    containers
        .get(id)
        .map(Container::revision)
        .ok_or(ModelError::UnknownContainer(id))
}

pub(crate) fn current_stamp(
    upstream: ContainerId,
    containers: &Containers,
    store: &ParticleStore,
) -> Result<RefreshStamp, ModelError> {
    Ok(RefreshStamp {
        upstream: vec![revision_of(upstream, containers)?],
        store: Some(store.revision()),
    })
}

fn members_stamp(members: &[ContainerId], containers: &Containers) -> Result<RefreshStamp, ModelError> {
    Ok(RefreshStamp {
        upstream: members
            .iter()
            .map(|&member| revision_of(member, containers))
            .collect::<Result<_, _>>()?,
        store: None,
    })
}

/// Any source of tuples held by a model.
#[derive(Debug)]
pub enum Container {
    List(ListContainer),
    Dynamic(DynamicContainer),
    ClosePairs(ClosePairContainer),
    Set(ContainerSet),
}

impl Container {
    pub fn kind(&self) -> &'static str {
        match self {
            Container::List(_) => "list",
            Container::Dynamic(_) => "dynamic",
            Container::ClosePairs(_) => "close-pair",
            Container::Set(_) => "set",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Container::List(c) => &c.name,
            Container::Dynamic(c) => &c.name,
            Container::ClosePairs(c) => c.name(),
            Container::Set(c) => &c.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Container::List(c) => c.arity,
            Container::Dynamic(c) => c.arity,
            Container::ClosePairs(_) => 2,
            Container::Set(c) => c.arity,
        }
    }

    /// The content as of the last refresh.
    pub fn tuples(&self) -> &[ParticleTuple] {
        match self {
            Container::List(c) => &c.tuples,
            Container::Dynamic(c) => &c.tuples,
            Container::ClosePairs(c) => c.tuples(),
            Container::Set(c) => &c.tuples,
        }
    }

    /// A counter that advances whenever the content changes.
    pub fn revision(&self) -> u64 {
        match self {
            Container::List(c) => c.revision,
            Container::Dynamic(c) => c.revision,
            Container::ClosePairs(c) => c.revision(),
            Container::Set(c) => c.revision,
        }
    }

    /// The containers this one derives its content from; empty for list containers.
    pub fn upstreams(&self) -> &[ContainerId] {
        match self {
            Container::List(_) => &[],
            Container::Dynamic(c) => std::slice::from_ref(&c.upstream),
            Container::ClosePairs(c) => c.upstream_slice(),
            Container::Set(c) => &c.members,
        }
    }

    fn stamp(&self) -> Option<&RefreshStamp> {
        match self {
            Container::List(_) => None,
            Container::Dynamic(c) => c.stamp.as_ref(),
            Container::ClosePairs(c) => c.stamp(),
            Container::Set(c) => c.stamp.as_ref(),
        }
    }

    fn expected_stamp(&self, containers: &Containers, store: &ParticleStore) -> Result<RefreshStamp, ModelError> {
        match self {
            Container::Set(c) => members_stamp(&c.members, containers),
            _ => match self.upstreams() {
                [upstream] => current_stamp(*upstream, containers, store),
                _ => Ok(RefreshStamp {
                    upstream: Vec::new(),
                    store: None,
                }),
            },
        }
    }

    pub(crate) fn set_arity(&mut self, arity: usize) {
        match self {
            Container::Dynamic(c) => c.arity = arity,
            Container::Set(c) => c.arity = arity,
            _ => {}
        }
    }

    /// Whether the cached content reflects the current upstream content and attribute values.
    pub fn is_up_to_date(&self, containers: &Containers, store: &ParticleStore) -> bool {
        let upstreams = self.upstreams();
        if upstreams.is_empty() {
            return true;
        }
        let upstream_fresh = upstreams.iter().all(|&upstream| {
            containers
                .get(upstream)
                .is_some_and(|c| c.is_up_to_date(containers, store))
        });
        upstream_fresh
            && self
                .expected_stamp(containers, store)
                .is_ok_and(|stamp| self.stamp() == Some(&stamp))
    }

    /// Recomputes the content of a derived container from its (already fresh) upstreams.
    pub fn compute_refresh(
        &self,
        containers: &Containers,
        store: &ParticleStore,
    ) -> Result<Option<Refreshed>, ModelError> {
        match self {
            Container::List(_) => Ok(None),
            Container::Dynamic(c) => {
                let stamp = current_stamp(c.upstream, containers, store)?;
                let upstream = &containers[c.upstream];
                let mut tuples = Vec::with_capacity(upstream.tuples().len());
                for tuple in upstream.tuples() {
                    if c.filter.accepts(store, tuple)? {
                        tuples.push(*tuple);
                    }
                }
                Ok(Some(Refreshed { tuples, stamp }))
            }
            Container::ClosePairs(c) => c.compute_refresh(containers, store).map(Some),
            Container::Set(c) => {
                let stamp = members_stamp(&c.members, containers)?;
                let mut tuples: Vec<ParticleTuple> = c
                    .members
                    .iter()
                    .flat_map(|&member| containers[member].tuples().iter().copied())
                    .collect();
                tuples.sort_unstable();
                tuples.dedup();
                Ok(Some(Refreshed { tuples, stamp }))
            }
        }
    }

    pub fn apply_refresh(&mut self, refreshed: Refreshed) {
        let Refreshed { tuples, stamp } = refreshed;
        let (current, revision, slot) = match self {
            Container::List(_) => return,
            Container::Dynamic(c) => (&mut c.tuples, &mut c.revision, &mut c.stamp),
            Container::ClosePairs(c) => c.parts_mut(),
            Container::Set(c) => (&mut c.tuples, &mut c.revision, &mut c.stamp),
        };
        if *current != tuples {
            *current = tuples;
            *revision += 1;
        }
        *slot = Some(stamp);
    }

    /// Every particle that could ever appear in this container's tuples.
    pub fn all_possible_particles(&self, containers: &Containers) -> Vec<ParticleId> {
        let unique: BTreeSet<ParticleId> = match self.upstreams() {
            [] => self.tuples().iter().flat_map(|t| t.iter()).collect(),
            upstreams => upstreams
                .iter()
                .filter_map(|&upstream| containers.get(upstream))
                .flat_map(|c| c.all_possible_particles(containers))
                .collect(),
        };
        unique.into_iter().collect()
    }

    /// Model objects this container's content depends on.
    pub fn inputs(&self, containers: &Containers, store: &ParticleStore) -> Vec<ModelObject> {
        let upstreams = self.upstreams();
        if upstreams.is_empty() {
            return Vec::new();
        }
        let mut inputs: Vec<ModelObject> = upstreams.iter().copied().map(ModelObject::Container).collect();
        match self {
            Container::Dynamic(c) => {
                let particles = self.all_possible_particles(containers);
                inputs.extend(c.filter.inputs(store, &particles));
            }
            Container::ClosePairs(_) => {
                let particles = self.all_possible_particles(containers);
                inputs.extend(particles.into_iter().map(ModelObject::Particle));
            }
            _ => {}
        }
        inputs
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListContainer> {
        match self {
            Container::List(c) => Some(c),
            _ => None,
        }
    }
}

/// Brings a container and everything upstream of it up to date.
pub(crate) fn refresh(
    containers: &mut Containers,
    store: &ParticleStore,
    id: ContainerId,
) -> Result<(), ModelError> {
    let upstreams = containers
        .get(id)
        .ok_or(ModelError::UnknownContainer(id))?
        .upstreams()
        .to_vec();
    for upstream in upstreams {
        refresh(containers, store, upstream)?;
    }
    let container = &containers[id];
    if container.is_up_to_date(containers, store) {
        return Ok(());
    }
    if let Some(refreshed) = container.compute_refresh(containers, store)? {
        trace!(
            container = container.name(),
            len = refreshed.tuples.len(),
            "Refreshed derived container."
        );
        containers[id].apply_refresh(refreshed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::KeyRegistry;
    use std::sync::Arc;

    fn setup(n: usize) -> (ParticleStore, Vec<ParticleId>) {
        let mut store = ParticleStore::new(Arc::new(KeyRegistry::new()));
        let ids = (0..n).map(|i| store.add_particle(&format!("p{i}"))).collect();
        (store, ids)
    }

    #[test]
    fn list_container_keeps_sorted_unique_tuples() {
        let (_store, ids) = setup(3);
        let mut list = ListContainer::new("pairs", 2);
        list.add(ParticleTuple::pair(ids[2], ids[0])).unwrap();
        list.add(ParticleTuple::pair(ids[0], ids[1])).unwrap();
        list.add(ParticleTuple::pair(ids[0], ids[1])).unwrap();

        assert_eq!(list.len(), 2);
        assert!(list.tuples().windows(2).all(|w| w[0] < w[1]));
        assert!(list.contains(&ParticleTuple::pair(ids[2], ids[0])));
        assert!(!list.contains(&ParticleTuple::pair(ids[0], ids[2])));
    }

    #[test]
    fn list_container_rejects_wrong_arity() {
        let (_store, ids) = setup(3);
        let mut list = ListContainer::new("pairs", 2);
        let err = list
            .add(ParticleTuple::triplet(ids[0], ids[1], ids[2]))
            .unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { expected: 2, found: 3 }));
        assert!(list.set(vec![ParticleTuple::single(ids[0])]).is_err());
        assert!(list.is_empty());
    }

    #[test]
    fn list_mutations_advance_revision() {
        let (_store, ids) = setup(2);
        let mut list = ListContainer::new("singles", 1);
        let r0 = list.revision;
        list.add_many(ids.iter().map(|&p| ParticleTuple::single(p))).unwrap();
        let r1 = list.revision;
        list.clear();
        assert!(r1 > r0);
        assert!(list.revision > r1);
    }

    #[test]
    fn dynamic_container_refreshes_when_attributes_change() {
        let (mut store, ids) = setup(3);
        let kind = store.key::<IntAttr>("kind");
        for (&id, value) in ids.iter().zip([1, 1, 2]) {
            store.add_attribute(id, kind, value).unwrap();
        }
        let mut containers = Containers::with_key();
        let mut list = ListContainer::new("all pairs", 2);
        list.set(vec![
            ParticleTuple::pair(ids[0], ids[1]),
            ParticleTuple::pair(ids[0], ids[2]),
            ParticleTuple::pair(ids[1], ids[2]),
        ])
        .unwrap();
        let upstream = containers.insert(Container::List(list));
        let mut dynamic = Container::Dynamic(DynamicContainer::new(
            "different kinds",
            upstream,
            Box::new(PairAttributeFilter::different(kind)),
        ));
        dynamic.set_arity(2);
        let id = containers.insert(dynamic);

        assert!(!containers[id].is_up_to_date(&containers, &store));
        refresh(&mut containers, &store, id).unwrap();
        assert!(containers[id].is_up_to_date(&containers, &store));
        assert_eq!(containers[id].tuples().len(), 2);

        store.set_attribute(ids[2], kind, 1).unwrap();
        assert!(!containers[id].is_up_to_date(&containers, &store));
        refresh(&mut containers, &store, id).unwrap();
        assert!(containers[id].tuples().is_empty());
    }

    #[test]
    fn closure_filters_are_accepted() {
        let (store, ids) = setup(2);
        let filter = |_: &ParticleStore, t: &ParticleTuple| t.arity() == 1;
        assert!(filter.accepts(&store, &ParticleTuple::single(ids[0])).unwrap());
        assert!(!filter.accepts(&store, &ParticleTuple::pair(ids[0], ids[1])).unwrap());
    }

    #[test]
    fn derived_inputs_include_upstream_and_particles() {
        let (store, ids) = setup(2);
        let mut containers = Containers::with_key();
        let mut list = ListContainer::new("pairs", 2);
        list.add(ParticleTuple::pair(ids[0], ids[1])).unwrap();
        let upstream = containers.insert(Container::List(list));
        let dynamic = DynamicContainer::new(
            "all",
            upstream,
            Box::new(|_: &ParticleStore, _: &ParticleTuple| true),
        );
        let id = containers.insert(Container::Dynamic(dynamic));

        let inputs = containers[id].inputs(&containers, &store);
        assert!(inputs.contains(&ModelObject::Container(upstream)));
        assert!(inputs.contains(&ModelObject::Particle(ids[0])));
        assert!(inputs.contains(&ModelObject::Particle(ids[1])));
        assert!(containers[upstream].inputs(&containers, &store).is_empty());
    }

    #[test]
    fn container_set_is_the_union_of_its_members() {
        let (store, ids) = setup(3);
        let mut containers = Containers::with_key();
        let mut first = ListContainer::new("first", 2);
        first
            .set(vec![ParticleTuple::pair(ids[0], ids[1]), ParticleTuple::pair(ids[1], ids[2])])
            .unwrap();
        let mut second = ListContainer::new("second", 2);
        second.add(ParticleTuple::pair(ids[1], ids[2])).unwrap();
        let first = containers.insert(Container::List(first));
        let second = containers.insert(Container::List(second));
        let mut set = Container::Set(ContainerSet::new("both", vec![first, second]));
        set.set_arity(2);
        let id = containers.insert(set);

        refresh(&mut containers, &store, id).unwrap();
        assert_eq!(containers[id].tuples().len(), 2);
        assert_eq!(
            containers[id].inputs(&containers, &store),
            vec![ModelObject::Container(first), ModelObject::Container(second)]
        );

        containers[second]
            .as_list_mut()
            .unwrap()
            .add(ParticleTuple::pair(ids[0], ids[2]))
            .unwrap();
        assert!(!containers[id].is_up_to_date(&containers, &store));
        refresh(&mut containers, &store, id).unwrap();
        assert_eq!(containers[id].tuples().len(), 3);
        assert_eq!(containers[id].all_possible_particles(&containers), ids);
    }
}
