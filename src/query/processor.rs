//! Executes compiled queries for one vertex row.
//!
//! The simple path reads a single fitted, ordered slice straight from the backend.
//! The general path filters backend results in memory, overlays the transaction's
//! added and removed relations, and re-queries with a larger limit when filtering
//! left too few results.

use std::fmt;

use tracing::debug;

use super::compiled::CompiledQuery;
use super::condition::Condition;
use super::context::QueryContext;
use super::slice::BackendQueryHolder;
use crate::error::Result;
use crate::model::Relation;
use crate::types::VertexId;

/// Results produced on first pull.
///
/// Errors surface as the first item. Restart by recompiling; the sequence cannot
/// resume after an error.
pub struct LazyResults<'a, T> {
    pending: Option<Box<dyn FnOnce() -> Result<Vec<T>> + 'a>>,
    ready: std::vec::IntoIter<T>,
}

impl<'a, T> LazyResults<'a, T> {
    pub(crate) fn new(produce: impl FnOnce() -> Result<Vec<T>> + 'a) -> Self {
        Self {
            pending: Some(Box::new(produce)),
            ready: Vec::new().into_iter(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            pending: None,
            ready: Vec::new().into_iter(),
        }
    }

    /// Collects every result, stopping at the first error.
    pub fn try_collect(self) -> Result<Vec<T>> {
        self.collect()
    }
}

impl<T> Iterator for LazyResults<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if let Some(produce) = self.pending.take() {
            match produce() {
                Ok(items) => self.ready = items.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
        self.ready.next().map(Ok)
    }
}

impl<T> fmt::Debug for LazyResults<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResults")
            .field("started", &self.pending.is_none())
            .field("buffered", &self.ready.len())
            .finish()
    }
}

/// Reads the single slice of a simple query; no overlay and no filtering.
pub(crate) fn execute_simple<C: QueryContext + ?Sized>(
    ctx: &C,
    vertex: VertexId,
    query: &CompiledQuery,
) -> Result<Vec<Relation>> {
    let Some(holder) = query.queries().first() else {
        return Ok(Vec::new());
    };
    let mut relations = ctx.execute_slice(vertex, &holder.query)?;
    relations.truncate(query.limit());
    Ok(relations)
}

/// Runs every slice of `query`, filters by `condition`, merges the transaction
/// overlay, sorts by the requested orders and applies the limit.
pub(crate) fn execute_general<C: QueryContext + ?Sized>(
    ctx: &C,
    vertex: VertexId,
    query: &CompiledQuery,
    condition: &Condition,
) -> Result<Vec<Relation>> {
    let hard_max = ctx.options().hard_max_limit;
    let mut results = Vec::new();
    for holder in query.queries() {
        let sort_later = !holder.ordered && !query.orders().is_empty();
        results.extend(execute_holder(
            ctx, vertex, holder, condition, query.limit(), hard_max, sort_later,
        )?);
    }
    results.extend(
        ctx.added_relations(vertex)
            .into_iter()
            .filter(|rel| condition.evaluate(rel, vertex)),
    );
    let orders = query.orders();
    if !orders.is_empty() {
        results.sort_by(|a, b| orders.compare(a, b, vertex));
    }
    results.truncate(query.limit());
    Ok(results)
}

fn execute_holder<C: QueryContext + ?Sized>(
    ctx: &C,
    vertex: VertexId,
    holder: &BackendQueryHolder,
    condition: &Condition,
    target: usize,
    hard_max: usize,
    sort_later: bool,
) -> Result<Vec<Relation>> {
    // Unordered slices of an ordered query must be read in full before sorting.
    let mut limit = match holder.query.limit() {
        Some(limit) if sort_later => Some(limit.max(hard_max)),
        other => other,
    };
    loop {
        let slice = holder.query.clone().with_limit(limit);
        let raw = ctx.execute_slice(vertex, &slice)?;
        let saturated = limit.is_some_and(|l| raw.len() >= l);
        let kept: Vec<Relation> = raw
            .into_iter()
            .filter(|rel| !ctx.is_removed(rel.id))
            .filter(|rel| holder.fitted || condition.evaluate(rel, vertex))
            .collect();
        match limit {
            Some(current) if saturated && kept.len() < target && current < hard_max => {
                let next = current.saturating_mul(2).min(hard_max);
                debug!(
                    vertex = vertex.0,
                    kept = kept.len(),
                    from = current,
                    to = next,
                    "vcq.requery"
                );
                limit = Some(next);
            }
            _ => return Ok(kept),
        }
    }
}

/// Adjacent vertices of edge results, in result order.
pub(crate) fn adjacent_vertices(relations: &[Relation], base: VertexId) -> Vec<VertexId> {
    relations
        .iter()
        .filter_map(|rel| rel.other_vertex(base))
        .collect()
}
