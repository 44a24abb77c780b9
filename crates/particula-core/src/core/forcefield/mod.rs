//! Force-field parameter providers.
//!
//! The scoring core never evaluates force-field energy formulas itself. It only needs to look up
//! bonded parameters by atom type when building restraints, which is what
//! [`params::ForceFieldParameters`] describes. [`params::ParameterTable`] is a TOML-backed
//! implementation.

pub mod params;
