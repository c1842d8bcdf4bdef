//! Domain types and pure logic for the shotforge dataset platform.
//!
//! Everything in this crate is free of I/O beyond filesystem metadata
//! lookups, so it can be shared by the persistence layer, the capture
//! engine and the scheduler without pulling in their dependencies.

pub mod error;
pub mod job;
pub mod naming;
pub mod settings;
pub mod shots;
pub mod types;
pub mod validation;
