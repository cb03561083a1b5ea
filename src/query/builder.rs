//! Fluent vertex-centric query builder.
//!
//! A builder collects types, direction, constraints, orders and a limit, compiles them
//! into a [`CompiledQuery`] that does not depend on the vertex, and runs the result
//! against any vertex of the transaction:
//!
//! ```ignore
//! let friends = VertexCentricQueryBuilder::new(&tx)
//!     .types(&["knows"])
//!     .direction(Direction::Out)
//!     .has_cmp("since", Cmp::Ge, 2010i64)
//!     .order_by("since", Order::Desc)
//!     .limit(10)
//!     .vertex_ids(VertexId(1))?;
//! ```

use rustc_hash::FxHashSet;
use tracing::debug;

use super::candidate::{extended_sort_key, select_candidate};
use super::compiled::CompiledQuery;
use super::condition::{constraints_to_qnf, simplify_qnf, Cmp, Condition, Constraint, Predicate};
use super::constraints::{compile_constraints, Adjacent};
use super::context::QueryContext;
use super::order::OrderList;
use super::partition::{KWayMerge, VertexList};
use super::processor::{adjacent_vertices, execute_general, execute_simple, LazyResults};
use super::slice::{compute_limit, BackendQueryHolder, SlicePlan};
use crate::error::{GraphError, Result};
use crate::model::Relation;
use crate::schema::ImplicitKey;
use crate::storage::KeyRestriction;
use crate::types::{Direction, Order, RelationCategory, RelationId, Value, VertexId};

/// Limit of a query without an explicit [`limit`](VertexCentricQueryBuilder::limit).
pub const NO_LIMIT: usize = usize::MAX;

/// Builds and runs vertex-centric queries against a [`QueryContext`].
pub struct VertexCentricQueryBuilder<'a, C: QueryContext + ?Sized> {
    ctx: &'a C,
    types: Vec<String>,
    dir: Direction,
    constraints: Vec<Constraint>,
    orders: OrderList,
    limit: usize,
    adjacent: Option<Adjacent>,
    system: bool,
    only_loaded: bool,
    only_given_vertex: bool,
    restrict_to_partitions: bool,
    error: Option<String>,
}

impl<'a, C: QueryContext + ?Sized> VertexCentricQueryBuilder<'a, C> {
    /// Starts an unconstrained query over both directions.
    pub fn new(ctx: &'a C) -> Self {
        Self {
            ctx,
            types: Vec::new(),
            dir: Direction::Both,
            constraints: Vec::new(),
            orders: OrderList::new(),
            limit: NO_LIMIT,
            adjacent: None,
            system: false,
            only_loaded: false,
            only_given_vertex: false,
            restrict_to_partitions: ctx.options().restrict_to_partitions,
            error: None,
        }
    }

    fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// Restricts the query to relations of the named types.
    pub fn types(mut self, names: &[&str]) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.types.extend(names.iter().map(|name| (*name).to_owned()));
        self
    }

    /// Sets the direction relative to the queried vertex.
    pub fn direction(mut self, dir: Direction) -> Self {
        self.dir = dir;
        self
    }

    /// Adds a constraint.
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        if self.error.is_some() {
            return self;
        }
        if constraint.key.is_empty() {
            self.record_error("constraint key must not be empty".into());
            return self;
        }
        self.constraints.push(constraint);
        self
    }

    /// `key == value`.
    pub fn has(self, key: &str, value: impl Into<Value>) -> Self {
        self.constraint(Constraint::eq(key, value))
    }

    /// `key <cmp> value`.
    pub fn has_cmp(self, key: &str, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.constraint(Constraint::cmp(key, cmp, Some(value.into())))
    }

    /// The relation carries `key`.
    pub fn has_key(self, key: &str) -> Self {
        self.constraint(Constraint::cmp(key, Cmp::Ne, None))
    }

    /// The relation does not carry `key`.
    pub fn has_not(self, key: &str) -> Self {
        self.constraint(Constraint::cmp(key, Cmp::Eq, None))
    }

    /// `key` is one of `values`.
    pub fn has_in(self, key: &str, values: impl IntoIterator<Item = Value>) -> Self {
        self.constraint(Constraint {
            key: key.to_owned(),
            predicate: Predicate::In(values.into_iter().collect()),
        })
    }

    /// `key` is none of `values`.
    pub fn has_not_in(self, key: &str, values: impl IntoIterator<Item = Value>) -> Self {
        self.constraint(Constraint {
            key: key.to_owned(),
            predicate: Predicate::NotIn(values.into_iter().collect()),
        })
    }

    /// `start <= key < end`.
    pub fn interval(self, key: &str, start: impl Into<Value>, end: impl Into<Value>) -> Self {
        self.has_cmp(key, Cmp::Ge, start).has_cmp(key, Cmp::Lt, end)
    }

    /// Only edges whose other endpoint is the persisted vertex `vertex`.
    pub fn adjacent(mut self, vertex: VertexId) -> Self {
        self.adjacent = Some(Adjacent::Persisted(vertex));
        self
    }

    /// Only edges whose other endpoint is `vertex`, created in this transaction.
    pub fn adjacent_uncommitted(mut self, vertex: VertexId) -> Self {
        self.adjacent = Some(Adjacent::Uncommitted(vertex));
        self
    }

    /// Orders results by the property key `key`. All keys share one direction.
    pub fn order_by(mut self, key: &str, order: Order) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(ty) = self.ctx.schema().relation_type(key) else {
            self.record_error(format!("unknown order key {key}"));
            return self;
        };
        if !ty.is_property_key() || ty.implicit {
            self.record_error(format!("order key {key} must be a property key"));
            return self;
        }
        if !self.orders.add(ty.id, order) {
            self.record_error("all order keys must share one direction".into());
        }
        self
    }

    /// Returns at most `limit` results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Queries system relations instead of normal ones.
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Reads persisted state only; the compiled query must be simple.
    pub fn query_only_loaded(mut self) -> Self {
        self.only_loaded = true;
        self
    }

    /// Queries the given vertex row even if the vertex is partitioned.
    pub fn query_only_given_vertex(mut self) -> Self {
        self.only_given_vertex = true;
        self
    }

    /// Fans out to every representative, not just local partitions.
    pub fn no_partition_restriction(mut self) -> Self {
        self.restrict_to_partitions = false;
        self
    }

    /// Compiles the query for relations of `category`.
    pub fn compile(&self, category: RelationCategory) -> Result<CompiledQuery> {
        if let Some(message) = &self.error {
            return Err(GraphError::InvalidOwned(message.clone()));
        }
        if self.adjacent.is_some() && category != RelationCategory::Edge {
            return Err(GraphError::Invalid(
                "adjacent vertex constraints need an edge query",
            ));
        }
        let query = self.construct(category)?;
        self.ctx.metrics().query_compiled(query.queries().len());
        debug!(
            category = category.as_str(),
            types = self.types.len(),
            backend_queries = query.queries().len(),
            simple = query.is_simple(),
            fingerprint = query.fingerprint(),
            "vcq.compile"
        );
        Ok(query)
    }

    fn construct(&self, mut category: RelationCategory) -> Result<CompiledQuery> {
        let mut dir = self.dir;
        if self.limit == 0 {
            return Ok(CompiledQuery::empty());
        }
        if category == RelationCategory::Property {
            if dir == Direction::In {
                return Ok(CompiledQuery::empty());
            }
            dir = Direction::Out;
        }
        let schema = self.ctx.schema();
        let Some(mut conditions) = constraints_to_qnf(&self.constraints, schema)? else {
            return Ok(CompiledQuery::empty());
        };
        let codec = self.ctx.codec();
        let hard_max = self.ctx.options().hard_max_limit;
        let has_modifications = self.ctx.has_modifications();
        let slice_limit = (self.limit != NO_LIMIT).then_some(self.limit);
        let mut queries = Vec::new();

        if self.types.is_empty() {
            let fitted = (dir == Direction::Both
                || (category == RelationCategory::Property && dir == Direction::Out))
                && conditions.is_empty()
                && self.adjacent.is_none();
            let mut limit = slice_limit;
            // The keyspace slice spans both directions; half of it is filtered away.
            if dir != Direction::Both
                && matches!(category, RelationCategory::Edge | RelationCategory::Relation)
            {
                limit = limit.map(|l| if l < (i32::MAX / 3) as usize { l * 2 } else { l });
            }
            let remaining = conditions.len() + usize::from(self.adjacent.is_some());
            let limit = compute_limit(remaining, limit, hard_max, has_modifications);
            let slice = codec.category_slice(category, self.system)?.with_limit(limit);
            queries.push(BackendQueryHolder::new(slice, fitted, self.orders.is_empty()));
            conditions.push(Condition::Category(category));
            conditions.push(Condition::Visibility {
                system: self.system,
            });
        } else {
            let compiled = compile_constraints(&conditions, self.adjacent);
            if compiled.is_unsatisfiable() {
                return Ok(CompiledQuery::empty());
            }
            let mut type_ids = Vec::with_capacity(self.types.len());
            for name in &self.types {
                let Some(ty) = schema.relation_type(name) else {
                    continue;
                };
                if self.system && !ty.is_system() {
                    return Err(GraphError::InvalidOwned(format!(
                        "can only query for system types: {name}"
                    )));
                }
                if ty.implicit {
                    return Err(GraphError::Unsupported(format!(
                        "implicit key {name} cannot be combined with other types or constraints"
                    )));
                }
                let mut type_dir = dir;
                if ty.is_property_key() {
                    if category == RelationCategory::Edge {
                        return Err(GraphError::CategoryMismatch {
                            requested: "edges",
                            actual: ty.kind.as_str(),
                            type_name: ty.name.clone(),
                        });
                    }
                    if dir == Direction::In {
                        continue;
                    }
                    category = RelationCategory::Property;
                    type_dir = Direction::Out;
                } else {
                    if category == RelationCategory::Property {
                        return Err(GraphError::CategoryMismatch {
                            requested: "properties",
                            actual: ty.kind.as_str(),
                            type_name: ty.name.clone(),
                        });
                    }
                    category = RelationCategory::Edge;
                }
                if !ty.is_unidirected(Direction::Both) {
                    if type_dir == Direction::Both {
                        type_dir = if ty.is_unidirected(Direction::Out) {
                            Direction::Out
                        } else {
                            Direction::In
                        };
                    } else if !ty.is_unidirected(type_dir) {
                        continue;
                    }
                }
                type_ids.push(ty.id);

                if ty.is_edge_label()
                    && type_dir == Direction::Both
                    && compiled.intervals.is_empty()
                    && self.orders.is_empty()
                {
                    let slice = codec
                        .type_slice(&ty, Direction::Both, &KeyRestriction::default())?
                        .with_limit(slice_limit);
                    queries.push(BackendQueryHolder::new(slice, compiled.fitted, true));
                    continue;
                }
                let dirs: &[Direction] = if type_dir == Direction::Both {
                    &Direction::PROPER
                } else {
                    std::slice::from_ref(&type_dir)
                };
                for &slice_dir in dirs {
                    let (best, score) = select_candidate(
                        &ty,
                        slice_dir,
                        &compiled.intervals,
                        &self.orders,
                        schema,
                    )?;
                    let extended_key = extended_sort_key(&best, slice_dir);
                    SlicePlan {
                        codec,
                        candidate: &best,
                        dir: slice_dir,
                        extended_key: &extended_key,
                        intervals: &compiled.intervals,
                        slice_limit,
                        fitted_conditions: compiled.fitted,
                        supports_order: score.supports_order,
                        hard_max,
                        has_modifications,
                    }
                    .construct(&mut queries)?;
                }
            }
            if queries.is_empty() {
                return Ok(CompiledQuery::empty());
            }
            conditions.push(Condition::RelationType(type_ids));
        }
        Ok(CompiledQuery::new(
            simplify_qnf(Condition::And(conditions)),
            dir,
            queries,
            self.orders.clone(),
            self.limit,
        ))
    }

    /// Returns true if every resolvable type keeps at most one relation per vertex
    /// in the query direction, so a partitioned vertex is answered by its canonical
    /// representative alone.
    fn has_all_canonical_types(&self) -> bool {
        if self.types.is_empty() {
            return false;
        }
        let schema = self.ctx.schema();
        self.types
            .iter()
            .filter_map(|name| schema.relation_type(name))
            .all(|ty| {
                let dir = if ty.is_property_key() {
                    Direction::Out
                } else {
                    self.dir
                };
                ty.multiplicity.is_unique(dir)
            })
    }

    fn implicit_key(&self, category: RelationCategory) -> Option<ImplicitKey> {
        if category == RelationCategory::Edge
            || self.types.len() != 1
            || !self.constraints.is_empty()
        {
            return None;
        }
        let ty = self.ctx.schema().relation_type(&self.types[0])?;
        if !ty.implicit {
            return None;
        }
        ImplicitKey::from_type_id(ty.id)
    }

    fn implicit_relations(&self, vertex: VertexId, key: ImplicitKey) -> Vec<Relation> {
        if self.dir == Direction::In || self.limit < 1 {
            return Vec::new();
        }
        let value = match key {
            ImplicitKey::Id => Some(Value::Int(vertex.0 as i64)),
            ImplicitKey::Label => self.ctx.vertex_label(vertex).map(Value::String),
            ImplicitKey::AdjacentId => None,
        };
        value
            .map(|value| Relation::property(RelationId(0), key.type_id(), vertex, value))
            .into_iter()
            .collect()
    }

    fn execution(&self) -> Execution<'a, C> {
        Execution {
            ctx: self.ctx,
            adjacent: self.adjacent,
            only_loaded: self.only_loaded,
            only_given_vertex: self.only_given_vertex,
            restrict_to_partitions: self.restrict_to_partitions,
            canonical_types: self.has_all_canonical_types(),
            dedup: self.ctx.options().partition_dedup,
        }
    }

    fn compile_for_execution(&self, category: RelationCategory) -> Result<CompiledQuery> {
        let query = self.compile(category)?;
        if self.only_loaded && !query.is_empty() && !query.is_simple() {
            return Err(GraphError::Invalid(
                "query_only_loaded needs a single fitted, ordered slice",
            ));
        }
        Ok(query)
    }

    fn lazy_relations(
        &self,
        vertex: VertexId,
        category: RelationCategory,
    ) -> Result<LazyResults<'a, Relation>> {
        if let Some(key) = self.implicit_key(category) {
            let computed = self.implicit_relations(vertex, key);
            return Ok(LazyResults::new(move || Ok(computed)));
        }
        let query = self.compile_for_execution(category)?;
        if query.is_empty() {
            return Ok(LazyResults::empty());
        }
        let execution = self.execution();
        Ok(LazyResults::new(move || execution.relations(vertex, &query)))
    }

    /// Edges and properties of `vertex`.
    pub fn relations(&self, vertex: VertexId) -> Result<LazyResults<'a, Relation>> {
        self.lazy_relations(vertex, RelationCategory::Relation)
    }

    /// Edges of `vertex`.
    pub fn edges(&self, vertex: VertexId) -> Result<LazyResults<'a, Relation>> {
        self.lazy_relations(vertex, RelationCategory::Edge)
    }

    /// Properties of `vertex`.
    pub fn properties(&self, vertex: VertexId) -> Result<LazyResults<'a, Relation>> {
        self.lazy_relations(vertex, RelationCategory::Property)
    }

    /// Vertices adjacent to `vertex` along the matching edges.
    pub fn vertices(&self, vertex: VertexId) -> Result<LazyResults<'a, VertexId>> {
        let query = self.compile_for_execution(RelationCategory::Edge)?;
        if query.is_empty() {
            return Ok(LazyResults::empty());
        }
        let execution = self.execution();
        Ok(LazyResults::new(move || execution.vertices(vertex, &query)))
    }

    /// Ids of the vertices adjacent to `vertex`, read eagerly.
    pub fn vertex_ids(&self, vertex: VertexId) -> Result<VertexList> {
        let query = self.compile_for_execution(RelationCategory::Edge)?;
        if query.is_empty() {
            return Ok(VertexList::new());
        }
        self.execution().vertex_ids(vertex, &query)
    }

    /// Number of matching relations of `vertex`.
    pub fn count(&self, vertex: VertexId) -> Result<usize> {
        let mut count = 0;
        for relation in self.relations(vertex)? {
            relation?;
            count += 1;
        }
        Ok(count)
    }
}

/// Execution settings captured from a builder; owned by lazy result closures.
struct Execution<'a, C: QueryContext + ?Sized> {
    ctx: &'a C,
    adjacent: Option<Adjacent>,
    only_loaded: bool,
    only_given_vertex: bool,
    restrict_to_partitions: bool,
    canonical_types: bool,
    dedup: bool,
}

impl<C: QueryContext + ?Sized> Execution<'_, C> {
    fn is_fanned_out(&self, vertex: VertexId) -> bool {
        !self.only_given_vertex && !self.canonical_types && self.ctx.is_partitioned(vertex)
    }

    /// The row a partitioned vertex with canonical types is read from.
    fn row_of(&self, vertex: VertexId) -> VertexId {
        if !self.only_given_vertex && self.ctx.is_partitioned(vertex) {
            self.ctx.canonical_representative(vertex)
        } else {
            vertex
        }
    }

    fn relations(&self, vertex: VertexId, query: &CompiledQuery) -> Result<Vec<Relation>> {
        if self.is_fanned_out(vertex) {
            return Ok(self
                .merged_relations(vertex, query)?
                .into_iter()
                .map(|(_, rel)| rel)
                .collect());
        }
        self.individual_relations(self.row_of(vertex), query)
    }

    fn individual_relations(&self, vertex: VertexId, query: &CompiledQuery) -> Result<Vec<Relation>> {
        if query.is_simple() && (self.only_loaded || self.ctx.is_loaded(vertex)) {
            return execute_simple(self.ctx, vertex, query);
        }
        let condition = query.bind(vertex, self.adjacent);
        execute_general(self.ctx, vertex, query, &condition)
    }

    /// Relations of every representative, each paired with the row it came from,
    /// merged by the query order and cut at the limit.
    fn merged_relations(
        &self,
        vertex: VertexId,
        query: &CompiledQuery,
    ) -> Result<Vec<(VertexId, Relation)>> {
        let representatives = self.ctx.representatives(vertex, self.restrict_to_partitions);
        let mut streams = Vec::with_capacity(representatives.len());
        for rep in representatives {
            let relations = self.individual_relations(rep, query)?;
            streams.push(relations.into_iter().map(move |rel| (rep, rel)));
        }
        let orders = query.orders();
        let merge = KWayMerge::new(streams, |a: &(VertexId, Relation), b: &(VertexId, Relation)| {
            orders.compare(&a.1, &b.1, vertex)
        });
        let mut seen = FxHashSet::default();
        let merged: Vec<(VertexId, Relation)> = merge
            .filter(|(_, rel)| !self.dedup || seen.insert(rel.id))
            .take(query.limit())
            .collect();
        debug!(
            vertex = vertex.0,
            returned = merged.len(),
            dedup = self.dedup,
            "vcq.partition.merge"
        );
        Ok(merged)
    }

    fn vertices(&self, vertex: VertexId, query: &CompiledQuery) -> Result<Vec<VertexId>> {
        if !self.is_fanned_out(vertex) {
            let row = self.row_of(vertex);
            let relations = self.individual_relations(row, query)?;
            return Ok(adjacent_vertices(&relations, row));
        }
        if !query.orders().is_empty() {
            return Ok(self
                .merged_relations(vertex, query)?
                .into_iter()
                .filter_map(|(rep, rel)| rel.other_vertex(rep))
                .collect());
        }
        let representatives = self.ctx.representatives(vertex, self.restrict_to_partitions);
        let mut streams = Vec::with_capacity(representatives.len());
        for rep in representatives {
            let mut ids = adjacent_vertices(&self.individual_relations(rep, query)?, rep);
            ids.sort_unstable();
            streams.push(ids.into_iter());
        }
        let mut seen = FxHashSet::default();
        Ok(KWayMerge::new(streams, |a: &VertexId, b: &VertexId| a.cmp(b))
            .filter(|id| !self.dedup || seen.insert(*id))
            .take(query.limit())
            .collect())
    }

    fn vertex_ids(&self, vertex: VertexId, query: &CompiledQuery) -> Result<VertexList> {
        if !self.is_fanned_out(vertex) {
            let row = self.row_of(vertex);
            let relations = self.individual_relations(row, query)?;
            return Ok(VertexList::from_ids(adjacent_vertices(&relations, row)));
        }
        if !query.orders().is_empty() {
            return Ok(self
                .merged_relations(vertex, query)?
                .into_iter()
                .filter_map(|(rep, rel)| rel.other_vertex(rep))
                .collect());
        }
        let mut list = VertexList::new();
        let mut seen = FxHashSet::default();
        for rep in self.ctx.representatives(vertex, self.restrict_to_partitions) {
            let relations = self.individual_relations(rep, query)?;
            for id in adjacent_vertices(&relations, rep) {
                if !self.dedup || seen.insert(id) {
                    list.add(id);
                }
            }
            if list.len() >= query.limit() {
                break;
            }
        }
        list.truncate(query.limit());
        Ok(list)
    }
}
