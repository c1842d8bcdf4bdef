//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&DbPool` as the first argument.

pub mod job_repo;
pub mod shot_repo;

pub use job_repo::JobRepo;
pub use shot_repo::ShotRepo;
