//! Row structs and domain models.
//!
//! Each submodule pairs a `FromRow` row struct holding SQLite-native
//! column types with the typed domain value it converts into.

pub mod job;
pub mod shot;
pub mod status;
