//! Vertex-centric query compilation and consistency-wrapped transactions for graph
//! storage on top of key-column-value (KCV) stores.
//!
//! The crate sits between a graph transaction layer and a pluggable KCV backend:
//!
//! - [`query`] compiles vertex-centric traversals into backend slice queries, picks the
//!   best sort-key index per type and direction, and executes the result with in-memory
//!   overlay, limit adjustment and partitioned-vertex fan-out.
//! - [`storage`] defines the KCV store contract, an in-memory reference backend, the
//!   retrying [`storage::BackendOperation`] executor, and the expected-value-checking
//!   manager that routes locked transactions through a consistent write path.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod model;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod storage;
pub mod types;

pub use config::{LockingOptions, QueryOptions, RetryOptions, StorageConfig};
pub use error::{BackendError, GraphError, Result};
pub use model::Relation;
pub use types::{
    Direction, Multiplicity, Order, RelationCategory, RelationId, SchemaStatus, TypeId, Value,
    ValueKind, VertexId,
};
