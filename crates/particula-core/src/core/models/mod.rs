//! # Models Module
//!
//! Stateful data models for particle systems: stable identifiers, particle tuples, the
//! derivative accumulator used during a scoring pass, and the [`store::ParticleStore`] that
//! owns particles together with all of their runtime attributes.
//!
//! ## Key Components
//!
//! - [`ids`] - Generational identifiers for particles and model objects
//! - [`tuple`] - Fixed-capacity particle tuples (singles, pairs, triplets, quads)
//! - [`accumulator`] - Weighted per-pass derivative buffers
//! - [`store`] - Particle arena plus attribute tables, with revision tracking

pub mod accumulator;
pub mod ids;
pub mod store;
pub mod tuple;
