//! # Particula Core Library
//!
//! A scoring core for particle-based structural modeling: particles carry runtime-declared typed
//! attributes, and a graph of containers, restraints and constraints is evaluated against them to
//! produce a total score and its derivatives.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Key registry, attribute tables, the particle store, unary
//!   scoring functions and the collaborator traits for force-field parameters, density maps and
//!   trajectory export.
//!
//! - **[`engine`]: The Evaluation Core.** Owns the [`engine::model::Model`], its containers,
//!   restraints and score states, resolves the dependency order between them and runs scoring
//!   passes with per-pass derivative accumulation.
//!
//! - **[`restraints`]: Selection Restraints.** Higher-level restraints built on the engine
//!   traits: predicate dispatch, minimum-spanning-tree and pair connectivity, exclusion volume,
//!   density fitting and bonded terms built from force-field parameters.

pub mod core;
pub mod engine;
pub mod restraints;
