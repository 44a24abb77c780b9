use super::container::{Containers, RefreshStamp, Refreshed, current_stamp};
use crate::core::error::ModelError;
use crate::core::keys::FloatKey;
use crate::core::models::ids::{ContainerId, ParticleId};
use crate::core::models::store::ParticleStore;
use crate::core::models::tuple::ParticleTuple;
use itertools::Itertools;
use kiddo::{KdTree, SquaredEuclidean};
use tracing::debug;

/// Leaf bucket size of `KdTree<f64, 3>`.
const KDTREE_BUCKET_SIZE: usize = 32;

/// Whether a k-d tree can split `positions`: no axis may hold more than one bucket of points
/// sharing the same coordinate.
fn kdtree_can_split(positions: &[[f64; 3]]) -> bool {
    (0..3).all(|axis| {
        positions
            .iter()
            .map(|p| (p[axis] + 0.0).to_bits())
            .counts()
            .values()
            .all(|&count| count <= KDTREE_BUCKET_SIZE)
    })
}

/// Pairs of particles from an upstream singleton container that lie within a cutoff.
///
/// Without a radius key the distance between centers is compared with the cutoff. With a
/// radius key the surface gap `d - r_a - r_b` is compared instead. Each unordered pair is
/// reported once, with the particle that comes first upstream in the first slot.
#[derive(Debug)]
pub struct ClosePairContainer {
    name: String,
    upstream: ContainerId,
    cutoff: f64,
    radius_key: Option<FloatKey>,
    tuples: Vec<ParticleTuple>,
    revision: u64,
    stamp: Option<RefreshStamp>,
}

impl ClosePairContainer {
    pub fn new(name: &str, upstream: ContainerId, cutoff: f64, radius_key: Option<FloatKey>) -> Self {
        Self {
            name: name.to_string(),
            upstream,
            cutoff,
            radius_key,
            tuples: Vec::new(),
            revision: 0,
            stamp: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> ContainerId {
        self.upstream
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn tuples(&self) -> &[ParticleTuple] {
        &self.tuples
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn upstream_slice(&self) -> &[ContainerId] {
        std::slice::from_ref(&self.upstream)
    }

    pub(crate) fn stamp(&self) -> Option<&RefreshStamp> {
        self.stamp.as_ref()
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (&mut Vec<ParticleTuple>, &mut u64, &mut Option<RefreshStamp>) {
        (&mut self.tuples, &mut self.revision, &mut self.stamp)
    }

    fn radius(&self, store: &ParticleStore, id: ParticleId) -> Result<f64, ModelError> {
        match self.radius_key {
            Some(key) => store.float(id, key),
            None => Ok(0.0),
        }
    }

    pub(crate) fn compute_refresh(
        &self,
        containers: &Containers,
        store: &ParticleStore,
    ) -> Result<Refreshed, ModelError> {
        let stamp = current_stamp(self.upstream, containers, store)?;
        let upstream = &containers[self.upstream];

        let mut particles = Vec::with_capacity(upstream.tuples().len());
        let mut positions: Vec<[f64; 3]> = Vec::with_capacity(upstream.tuples().len());
        let mut radii = Vec::with_capacity(upstream.tuples().len());
        for tuple in upstream.tuples() {
            let id = tuple[0];
            let p = store.xyz(id)?;
            particles.push(id);
            positions.push([p.x, p.y, p.z]);
            radii.push(self.radius(store, id)?);
        }

        if positions.len() < 2 {
            return Ok(Refreshed {
                tuples: Vec::new(),
                stamp,
            });
        }

        let within = |i: usize, j: usize| {
            let distance = squared_distance(&positions[i], &positions[j]).sqrt();
            distance - radii[i] - radii[j] <= self.cutoff
        };

        if !kdtree_can_split(&positions) {
            debug!(
                container = self.name.as_str(),
                particles = positions.len(),
                "Too many coincident coordinates for a k-d tree; checking all pairs."
            );
            let tuples = (0..positions.len())
                .tuple_combinations::<(usize, usize)>()
                .filter(|&(i, j)| within(i, j))
                .map(|(i, j)| ParticleTuple::pair(particles[i], particles[j]))
                .collect();
            return Ok(Refreshed { tuples, stamp });
        }

        let kdtree: KdTree<f64, 3> = (&positions).into();
        let max_radius = radii.iter().copied().fold(0.0, f64::max);
        let search = self.cutoff + 2.0 * max_radius;
        let search_sq = search * search;

        let mut tuples = Vec::new();
        for (i, query) in positions.iter().enumerate() {
            let mut neighbours: Vec<usize> = kdtree
                .within_unsorted::<SquaredEuclidean>(query, search_sq)
                .into_iter()
                .map(|neighbour| neighbour.item as usize)
                .filter(|&j| j > i && within(i, j))
                .collect();
            neighbours.sort_unstable();
            tuples.extend(
                neighbours
                    .into_iter()
                    .map(|j| ParticleTuple::pair(particles[i], particles[j])),
            );
        }
        Ok(Refreshed { tuples, stamp })
    }
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
