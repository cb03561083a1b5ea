//! Compiled vertex-centric queries.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh64::Xxh64;

use super::condition::Condition;
use super::constraints::Adjacent;
use super::order::OrderList;
use super::slice::BackendQueryHolder;
use crate::types::{Direction, VertexId};

/// A query compiled independently of the vertex it runs against.
///
/// Compiling the same builder state twice yields equal values; [`fingerprint`]
/// condenses that state into a cache key.
///
/// [`fingerprint`]: CompiledQuery::fingerprint
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    condition: Condition,
    direction: Direction,
    queries: Vec<BackendQueryHolder>,
    orders: OrderList,
    limit: usize,
}

impl CompiledQuery {
    pub(crate) fn new(
        condition: Condition,
        direction: Direction,
        queries: Vec<BackendQueryHolder>,
        orders: OrderList,
        limit: usize,
    ) -> Self {
        Self {
            condition,
            direction,
            queries,
            orders,
            limit,
        }
    }

    /// A query that returns nothing without touching the backend.
    pub fn empty() -> Self {
        Self::new(
            Condition::And(Vec::new()),
            Direction::Both,
            Vec::new(),
            OrderList::new(),
            0,
        )
    }

    /// Returns true if the query has no backend slices.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Filter condition, without the vertex-specific parts.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Query direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Backend slices.
    pub fn queries(&self) -> &[BackendQueryHolder] {
        &self.queries
    }

    /// Requested orders.
    pub fn orders(&self) -> &OrderList {
        &self.orders
    }

    /// Result limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// One fitted, ordered slice: results can be read straight from the backend.
    pub fn is_simple(&self) -> bool {
        matches!(self.queries.as_slice(), [only] if only.fitted && only.ordered)
    }

    /// The condition for `vertex`: adds the direction and, for adjacent-vertex
    /// queries, the incidence check.
    pub fn bind(&self, vertex: VertexId, adjacent: Option<Adjacent>) -> Condition {
        if self.is_empty() {
            return self.condition.clone();
        }
        let mut children = match &self.condition {
            Condition::And(children) => children.clone(),
            other => vec![other.clone()],
        };
        children.push(Condition::Direction {
            vertex,
            dir: self.direction,
        });
        if let Some(adjacent) = adjacent {
            children.push(Condition::Incidence {
                vertex,
                adjacent: adjacent.vertex(),
            });
        }
        Condition::And(children)
    }

    /// Stable hash of the compiled state.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hasher.write_u8(match self.direction {
            Direction::Out => 0,
            Direction::In => 1,
            Direction::Both => 2,
        });
        hasher.write_u64(self.limit as u64);
        hasher.write_u32(self.queries.len() as u32);
        for holder in &self.queries {
            hasher.write(holder.query.start());
            hasher.write(holder.query.end());
            hasher.write_u64(holder.query.limit().map_or(u64::MAX, |l| l as u64));
            hasher.write_u8(u8::from(holder.fitted) | (u8::from(holder.ordered) << 1));
        }
        self.orders.hash(&mut hasher);
        self.condition.hash(&mut hasher);
        hasher.finish()
    }
}
