//! Sort-key candidate selection.
//!
//! A type can be read through its own column layout or through any of its relation
//! indexes. Each candidate is scored by how much of the constrained key prefix its
//! extended sort key can answer from the backend.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use super::interval::Interval;
use super::order::OrderList;
use crate::error::{GraphError, Result};
use crate::schema::{ImplicitKey, RelationType, SchemaProvider};
use crate::types::{Direction, SchemaStatus, TypeId};

/// Sort key extended by the implicit keys that make column order total.
pub type ExtendedSortKey = SmallVec<[TypeId; 4]>;

/// The sort key of `candidate`, then `~adjacent` for edges that are not unique in
/// `dir`, then `~id` for unconstrained multiplicities.
pub fn extended_sort_key(candidate: &RelationType, dir: Direction) -> ExtendedSortKey {
    let mut key: ExtendedSortKey = candidate.sort_key.iter().copied().collect();
    let multiplicity = candidate.multiplicity;
    if !multiplicity.is_unique(dir) {
        if candidate.is_edge_label() {
            key.push(ImplicitKey::AdjacentId.type_id());
        }
        if !multiplicity.is_constrained() {
            key.push(ImplicitKey::Id.type_id());
        }
    }
    key
}

/// Score of one candidate plus whether it returns results in the requested order.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CandidateScore {
    /// Higher is better.
    pub score: f64,
    /// The candidate's native order satisfies the query order.
    pub supports_order: bool,
}

/// Scores `candidate` against the constraint intervals and requested orders.
pub fn score_candidate(
    candidate: &RelationType,
    dir: Direction,
    intervals: &FxHashMap<TypeId, Interval>,
    orders: &OrderList,
) -> CandidateScore {
    let supports_order =
        orders.is_empty() || orders.common_order() == Some(candidate.sort_order);
    let mut current_order = 0;
    let mut score = 0.0;
    for key in extended_sort_key(candidate, dir) {
        if current_order < orders.len() && orders.key(current_order) == Some(key) {
            current_order += 1;
        }
        match intervals.get(&key).map(Interval::as_points) {
            Some(Some(points)) => score += 5.0 / points.len() as f64,
            Some(None) => {
                score += 1.0;
                break;
            }
            None => break,
        }
    }
    let supports_order = supports_order && current_order == orders.len();
    if supports_order {
        score += 3.0;
    }
    CandidateScore {
        score,
        supports_order,
    }
}

/// The type followed by its indexes, in definition order.
pub fn candidates(
    ty: &Arc<RelationType>,
    schema: &dyn SchemaProvider,
) -> Result<Vec<Arc<RelationType>>> {
    let mut out = Vec::with_capacity(1 + ty.indexes.len());
    out.push(ty.clone());
    for id in &ty.indexes {
        out.push(
            schema
                .relation_type_by_id(*id)
                .ok_or(GraphError::NotFound("relation index"))?,
        );
    }
    Ok(out)
}

/// Picks the best-scoring eligible candidate for `ty` in `dir`; ties keep the first.
pub fn select_candidate(
    ty: &Arc<RelationType>,
    dir: Direction,
    intervals: &FxHashMap<TypeId, Interval>,
    orders: &OrderList,
    schema: &dyn SchemaProvider,
) -> Result<(Arc<RelationType>, CandidateScore)> {
    let mut best: Option<(Arc<RelationType>, CandidateScore)> = None;
    for candidate in candidates(ty, schema)? {
        if !candidate.is_unidirected(Direction::Both) && !candidate.is_unidirected(dir) {
            continue;
        }
        if candidate.id != ty.id && candidate.status != SchemaStatus::Enabled {
            continue;
        }
        let scored = score_candidate(&candidate, dir, intervals, orders);
        trace!(
            candidate = %candidate.name,
            dir = dir.as_str(),
            score = scored.score,
            supports_order = scored.supports_order,
            "vcq.candidate"
        );
        if best.as_ref().map_or(true, |(_, b)| scored.score > b.score) {
            best = Some((candidate, scored));
        }
    }
    best.ok_or_else(|| GraphError::Unsatisfiable {
        type_name: ty.name.clone(),
    })
}
