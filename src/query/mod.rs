#![forbid(unsafe_code)]

//! Vertex-centric query compilation and execution.
//!
//! A query over the relations of one vertex is compiled in stages: constraints are
//! normalized into a condition tree, absorbed into per-key intervals, matched against
//! the sort keys of each type and its relation indexes, and expanded into backend
//! slices. Execution reads those slices, filters what the slices could not express,
//! overlays uncommitted changes and merges partitioned-vertex representatives.

/// Value intervals per key.
pub mod interval;

/// Condition trees and constraint normalization.
///
/// Converts user constraints into a conjunction of leaves and disjunctions that can be
/// evaluated in memory or absorbed by the slice compiler.
pub mod condition;

/// Interval extraction from normalized conditions.
pub mod constraints;

/// Requested result orders.
pub mod order;

/// Sort-key candidate scoring and selection.
pub mod candidate;

/// Backend slice construction and limit adjustment.
pub mod slice;

/// The compiled, vertex-independent query.
pub mod compiled;

/// Transaction state queries run against.
pub mod context;

/// Slice execution with in-memory filtering and overlay.
pub mod processor;

/// Partitioned-vertex merging and vertex id lists.
pub mod partition;

/// Fluent query builder and entry points.
pub mod builder;

pub use builder::{VertexCentricQueryBuilder, NO_LIMIT};
pub use candidate::{select_candidate, CandidateScore, ExtendedSortKey};
pub use compiled::CompiledQuery;
pub use condition::{Cmp, Condition, Constraint, Predicate};
pub use constraints::{compile_constraints, Adjacent, CompiledConstraints};
pub use context::{QueryContext, TransactionContext};
pub use interval::Interval;
pub use order::OrderList;
pub use partition::{KWayMerge, VertexList};
pub use processor::LazyResults;
pub use slice::{adjust_limit_for_tx_modifications, compute_limit, BackendQueryHolder};
