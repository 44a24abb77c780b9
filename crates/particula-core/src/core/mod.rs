//! # Core Module
//!
//! The foundation layer of Particula: typed attribute keys, per-particle attribute storage and
//! the stateless pieces that scoring is built from.
//!
//! ## Architecture
//!
//! - **Keys** ([`keys`]) - The key registry that interns attribute names per type and category
//! - **Attributes** ([`attributes`]) - Dense per-type tables of sparse per-particle values
//! - **Data Models** ([`models`]) - Particle store, identifiers, tuples and derivative buffers
//! - **Errors** ([`error`]) - Configuration and lookup error types shared by every layer
//! - **Scoring Functions** ([`functions`]) - Unary functions with analytic derivatives
//! - **Geometry** ([`geometry`]) - Distance and centroid helpers with degenerate-case handling
//! - **Collaborators** ([`forcefield`], [`density`], [`io`]) - Narrow traits for parameter
//!   lookup, density sampling and trajectory export
//!
//! Nothing in this layer knows about restraints, containers or evaluation order; those live in
//! the [`crate::engine`].

pub mod attributes;
pub mod density;
pub mod error;
pub mod forcefield;
pub mod functions;
pub mod geometry;
pub mod io;
pub mod keys;
pub mod models;
