//! Versioned response cache with offline support.
//!
//! This module provides:
//! - Named, versioned namespaces of (request key -> response) pairs
//! - SQLite persistence with atomic per-operation writes
//! - Cache-first and network-first strategies that serve stored copies when
//!   the network is unavailable

#[cfg(test)]
pub mod failing;
mod layer;
mod namespace;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use namespace::Namespaces;
pub(crate) use storage::parse_datetime;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::CacheResult;
