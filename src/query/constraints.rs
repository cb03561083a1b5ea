//! Absorbs QNF conditions into per-key intervals.

use std::ops::Bound;

use rustc_hash::FxHashMap;

use super::condition::{extract_or_condition, Cmp, Condition};
use super::interval::Interval;
use crate::schema::ImplicitKey;
use crate::types::{TypeId, Value, VertexId};

/// Adjacent-vertex restriction of an edge query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Adjacent {
    /// A vertex with a persisted id; pushed down as a point on `~adjacent`.
    Persisted(VertexId),
    /// A vertex created in this transaction; only filtered in memory.
    Uncommitted(VertexId),
}

impl Adjacent {
    /// The vertex id.
    pub fn vertex(self) -> VertexId {
        match self {
            Adjacent::Persisted(v) | Adjacent::Uncommitted(v) => v,
        }
    }
}

/// Result of [`compile_constraints`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledConstraints {
    /// Interval per constrained key.
    pub intervals: FxHashMap<TypeId, Interval>,
    /// True if every condition was absorbed into `intervals`.
    pub fitted: bool,
}

impl CompiledConstraints {
    /// Returns true if some key admits no value, so the query has no results.
    pub fn is_unsatisfiable(&self) -> bool {
        self.intervals.values().any(Interval::is_empty)
    }
}

/// Maps the children of a QNF conjunction onto intervals.
pub fn compile_constraints(conditions: &[Condition], adjacent: Option<Adjacent>) -> CompiledConstraints {
    let mut compiled = CompiledConstraints {
        intervals: FxHashMap::default(),
        fitted: true,
    };
    for condition in conditions {
        let absorbed = match condition {
            Condition::Or(alternatives) => extract_or_condition(alternatives)
                .map(|(key, points)| (key, Interval::points(points))),
            Condition::Predicate { key, cmp, value } => {
                predicate_interval(*cmp, value.as_ref()).map(|interval| (*key, interval))
            }
            _ => None,
        };
        match absorbed {
            Some((key, interval)) => compiled.restrict(key, interval),
            None => compiled.fitted = false,
        }
    }
    match adjacent {
        Some(Adjacent::Persisted(vertex)) => compiled.restrict(
            ImplicitKey::AdjacentId.type_id(),
            Interval::point(Value::Vertex(vertex)),
        ),
        Some(Adjacent::Uncommitted(_)) => compiled.fitted = false,
        None => {}
    }
    compiled
}

impl CompiledConstraints {
    fn restrict(&mut self, key: TypeId, interval: Interval) {
        let merged = match self.intervals.get(&key) {
            Some(existing) => existing.intersect(&interval),
            None => interval,
        };
        self.intervals.insert(key, merged);
    }
}

fn predicate_interval(cmp: Cmp, value: Option<&Value>) -> Option<Interval> {
    let value = value?.clone();
    Some(match cmp {
        Cmp::Eq => Interval::point(value),
        Cmp::Ne => return None,
        Cmp::Lt => Interval::range(Bound::Unbounded, Bound::Excluded(value)),
        Cmp::Le => Interval::range(Bound::Unbounded, Bound::Included(value)),
        Cmp::Gt => Interval::range(Bound::Excluded(value), Bound::Unbounded),
        Cmp::Ge => Interval::range(Bound::Included(value), Bound::Unbounded),
    })
}
