use super::ids::ParticleId;
use std::ops::Index;

/// The largest number of particles a tuple can hold.
pub const MAX_ARITY: usize = 4;

/// An ordered group of one to four particles.
///
/// Tuples are the unit that containers produce and tuple scores consume. The order of the
/// particles inside a tuple is preserved, so `(a, b)` and `(b, a)` are distinct pairs.
/// Tuples are `Copy` and order first by arity and then by particle identifiers, which gives
/// list containers a canonical sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleTuple {
    arity: u8,
    ids: [ParticleId; MAX_ARITY],
}

impl ParticleTuple {
    /// Creates a tuple holding a single particle.
    pub fn single(a: ParticleId) -> Self {
        Self::from_parts(1, [a, ParticleId::default(), ParticleId::default(), ParticleId::default()])
    }

    /// Creates an ordered pair.
    pub fn pair(a: ParticleId, b: ParticleId) -> Self {
        Self::from_parts(2, [a, b, ParticleId::default(), ParticleId::default()])
    }

    /// Creates an ordered triplet.
    pub fn triplet(a: ParticleId, b: ParticleId, c: ParticleId) -> Self {
        Self::from_parts(3, [a, b, c, ParticleId::default()])
    }

    /// Creates an ordered quad.
    pub fn quad(a: ParticleId, b: ParticleId, c: ParticleId, d: ParticleId) -> Self {
        Self::from_parts(4, [a, b, c, d])
    }

    fn from_parts(arity: u8, ids: [ParticleId; MAX_ARITY]) -> Self {
        Self { arity, ids }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    #[inline]
    pub fn as_slice(&self) -> &[ParticleId] {
        &self.ids[..self.arity()]
    }

    pub fn iter(&self) -> impl Iterator<Item = ParticleId> + '_ {
        self.as_slice().iter().copied()
    }

    pub fn contains(&self, particle: ParticleId) -> bool {
        self.as_slice().contains(&particle)
    }
}

impl Index<usize> for ParticleTuple {
    type Output = ParticleId;

    fn index(&self, index: usize) -> &Self::Output {
        &self.as_slice()[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn make_ids(n: usize) -> Vec<ParticleId> {
        let mut arena: SlotMap<ParticleId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn constructors_set_arity_and_order() {
        let ids = make_ids(4);
        assert_eq!(ParticleTuple::single(ids[0]).arity(), 1);
        let pair = ParticleTuple::pair(ids[1], ids[0]);
        assert_eq!(pair.arity(), 2);
        assert_eq!(pair.as_slice(), &[ids[1], ids[0]]);
        assert_eq!(ParticleTuple::triplet(ids[0], ids[1], ids[2]).arity(), 3);
        let quad = ParticleTuple::quad(ids[0], ids[1], ids[2], ids[3]);
        assert_eq!(quad[3], ids[3]);
    }

    #[test]
    fn pair_order_is_significant() {
        let ids = make_ids(2);
        let ab = ParticleTuple::pair(ids[0], ids[1]);
        let ba = ParticleTuple::pair(ids[1], ids[0]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn contains_only_checks_used_slots() {
        let ids = make_ids(2);
        let single = ParticleTuple::single(ids[0]);
        assert!(single.contains(ids[0]));
        assert!(!single.contains(ids[1]));
        assert!(!single.contains(ParticleId::default()));
    }
}
