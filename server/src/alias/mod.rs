//! Alias subsystem: store (C3) and dependency graph / cycle detector (C4).

pub mod graph;
pub mod model;
pub mod store;

pub use graph::MAX_EXPANSION_DEPTH;
pub use store::{AliasStore, JsonFileAliasPersistence};
