//! Backend slice construction and limit adjustment.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::candidate::ExtendedSortKey;
use super::interval::Interval;
use crate::error::Result;
use crate::schema::RelationType;
use crate::storage::{KeyRestriction, RelationCodec, SliceQuery};
use crate::types::{Direction, TypeId};

/// One backend slice of a compiled query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendQueryHolder {
    /// The slice, with its adjusted limit.
    pub query: SliceQuery,
    /// Every relation returned satisfies the query conditions.
    pub fitted: bool,
    /// Results arrive in the query's requested order.
    pub ordered: bool,
}

impl BackendQueryHolder {
    /// Wraps a slice.
    pub fn new(query: SliceQuery, fitted: bool, ordered: bool) -> Self {
        Self {
            query,
            fitted,
            ordered,
        }
    }
}

/// Inflates `limit` for `remaining` unfitted conditions: each may discard about half
/// of the results. Transactions with local modifications ask for a few more.
pub fn adjust_limit_for_tx_modifications(has_modifications: bool, remaining: usize, limit: usize) -> usize {
    let limit = limit.max(1);
    let factor = if remaining >= 31 { 1usize << 31 } else { 1usize << remaining };
    let ceiling = (i32::MAX as usize) / limit;
    let mut adjusted = limit.saturating_mul(factor.min(ceiling).max(1));
    if has_modifications {
        adjusted = adjusted.saturating_add(5);
    }
    adjusted
}

/// `max(base, min(hard_max, adjusted))`; `None` stays unlimited.
pub fn compute_limit(
    remaining: usize,
    base: Option<usize>,
    hard_max: usize,
    has_modifications: bool,
) -> Option<usize> {
    base.map(|b| b.max(hard_max.min(adjust_limit_for_tx_modifications(has_modifications, remaining, b))))
}

/// Inputs shared by every slice built for one candidate and direction.
pub(crate) struct SlicePlan<'a> {
    pub codec: &'a RelationCodec,
    pub candidate: &'a Arc<RelationType>,
    pub dir: Direction,
    pub extended_key: &'a ExtendedSortKey,
    pub intervals: &'a FxHashMap<TypeId, Interval>,
    pub slice_limit: Option<usize>,
    pub fitted_conditions: bool,
    pub supports_order: bool,
    pub hard_max: usize,
    pub has_modifications: bool,
}

impl<'a> SlicePlan<'a> {
    /// Expands point constraints along the extended key into one slice per point
    /// combination, ending at the first range or unconstrained component.
    pub fn construct(&self, queries: &mut Vec<BackendQueryHolder>) -> Result<()> {
        self.expand(0, KeyRestriction::default(), None, queries)
    }

    fn expand(
        &self,
        mut position: usize,
        mut restriction: KeyRestriction,
        mut last: Option<&'a Interval>,
        queries: &mut Vec<BackendQueryHolder>,
    ) -> Result<()> {
        if let Some(key) = self.extended_key.get(position) {
            if let Some(interval) = self.intervals.get(key) {
                position += 1;
                last = Some(interval);
                if let Interval::Points(points) = interval {
                    for point in points {
                        let mut next = restriction.clone();
                        next.points.push(point.clone());
                        self.expand(position, next, last, queries)?;
                    }
                    return Ok(());
                }
                restriction.range = interval.bounds();
            }
        }
        let mut fitted = self.fitted_conditions && position == self.intervals.len();
        // Absent values encode as the largest byte and fall inside open upper ranges.
        if fitted && last.is_some_and(|interval| !interval.has_end()) {
            fitted = false;
        }
        let limit = compute_limit(
            self.intervals.len().saturating_sub(position),
            self.slice_limit,
            self.hard_max,
            self.has_modifications,
        );
        let query = self
            .codec
            .type_slice(self.candidate, self.dir, &restriction)?
            .with_limit(limit);
        queries.push(BackendQueryHolder::new(query, fitted, self.supports_order));
        Ok(())
    }
}
