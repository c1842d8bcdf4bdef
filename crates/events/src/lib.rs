//! Shotforge job event bus.
//!
//! [`EventBus`] is an in-process publish/subscribe hub backed by
//! `tokio::sync::broadcast`. The scheduler publishes a [`JobEvent`] for
//! every lifecycle transition and persisted progress update so live
//! observers can follow jobs without polling the store.

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind};
