//! Evaluation machinery: containers, restraints, score states and the model that schedules them.
//!
//! A [`model::Model`] owns every object in slot-map arenas. Each call to
//! [`model::Model::evaluate`] brings the required derived containers and score states up to
//! date in dependency order, scores the requested restraints into per-restraint derivative
//! accumulators and then runs the derivative phase of the score states in reverse order.

pub mod close_pairs;
pub mod config;
pub mod constraint;
pub mod container;
pub mod context;
pub mod dependency;
pub mod model;
pub mod refined;
pub mod restraint;
pub mod score;
