//! Restraints built on the evaluation engine: predicate dispatch, minimum-selection
//! connectivity, excluded volume, density fitting and force-field bonds.

pub mod bonded;
pub mod connectivity;
pub mod density;
pub mod exclusion;
pub mod pair_connectivity;
pub mod predicate;
