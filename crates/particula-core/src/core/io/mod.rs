//! # I/O Module
//!
//! Export of particle attribute snapshots. Reading structure files is left to callers; this
//! module only records frames and writes them out.

pub mod trajectory;
