#![allow(missing_docs)]

use std::sync::Arc;

use sombra_kcv::{
    query::{Cmp, TransactionContext, VertexCentricQueryBuilder},
    schema::{InMemorySchema, TypeDef},
    storage::{CounterMetrics, InMemoryStoreManager},
    Direction, Order, RelationCategory, Result, SchemaStatus, StorageConfig, Value, ValueKind,
    VertexId,
};

fn schema() -> Result<InMemorySchema> {
    let schema = InMemorySchema::new()
        .with_type(TypeDef::property_key("a", ValueKind::Int))?
        .with_type(TypeDef::property_key("b", ValueKind::Int))?
        .with_type(TypeDef::property_key("x", ValueKind::Int))?
        .with_type(TypeDef::edge_label("rated"))?
        .with_type(TypeDef::edge_label("t").sort_key(&["x"]))?;
    schema.define_index("rated", "rated_ab", &["a", "b"], Direction::Both, Order::Asc, SchemaStatus::Enabled)?;
    Ok(schema)
}

fn context(metrics: Arc<CounterMetrics>) -> Result<TransactionContext> {
    Ok(TransactionContext::open(
        Arc::new(InMemoryStoreManager::new()),
        "edgestore",
        Arc::new(schema()?),
        StorageConfig::default(),
    )?
    .with_metrics(metrics))
}

#[test]
fn empty_interval_compiles_to_no_backend_queries() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = context(metrics.clone())?;
    let builder = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated"])
        .direction(Direction::Out)
        .has_cmp("a", Cmp::Gt, 10i64)
        .has_cmp("a", Cmp::Lt, 5i64);
    let query = builder.compile(RelationCategory::Edge)?;
    assert!(query.is_empty());
    assert_eq!(builder.edges(VertexId(1))?.count(), 0);
    assert_eq!(metrics.slices(), 0, "no backend call for an empty query");
    Ok(())
}

#[test]
fn open_upper_range_on_index_is_never_fitted() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated"])
        .direction(Direction::Out)
        .has("a", 5i64)
        .has_cmp("b", Cmp::Gt, 10i64)
        .limit(10)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 1);
    assert!(!query.queries()[0].fitted);
    assert!(!query.is_simple());
    Ok(())
}

#[test]
fn closed_range_on_index_is_fitted() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated"])
        .direction(Direction::Out)
        .has("a", 5i64)
        .interval("b", 10i64, 20i64)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 1);
    assert!(query.queries()[0].fitted);
    Ok(())
}

#[test]
fn untyped_query_has_exactly_one_backend_query() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    for limit in [1usize, 7, 1000] {
        for dir in [Direction::Out, Direction::In, Direction::Both] {
            let query = VertexCentricQueryBuilder::new(&ctx)
                .direction(dir)
                .limit(limit)
                .compile(RelationCategory::Relation)?;
            assert_eq!(query.queries().len(), 1, "limit {limit} dir {dir:?}");
        }
    }
    Ok(())
}

#[test]
fn compiling_twice_is_idempotent() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let builder = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated", "t"])
        .has_in("a", [Value::Int(1), Value::Int(2)])
        .order_by("a", Order::Asc)
        .limit(25);
    let first = builder.compile(RelationCategory::Edge)?;
    let second = builder.compile(RelationCategory::Edge)?;
    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());
    Ok(())
}

#[test]
fn point_on_single_sort_key_is_one_fitted_ordered_slice() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = context(metrics.clone())?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["t"])
        .direction(Direction::Out)
        .has("x", 3i64)
        .limit(10)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 1);
    let holder = &query.queries()[0];
    assert!(holder.fitted);
    assert!(holder.ordered);
    assert_eq!(holder.query.limit(), Some(10));
    assert_eq!(
        metrics
            .backend_queries_compiled
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    Ok(())
}

#[test]
fn point_set_expands_into_one_slice_per_point() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated"])
        .direction(Direction::Out)
        .has_in("a", [Value::Int(1), Value::Int(2), Value::Int(3)])
        .has("b", 4i64)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 3);
    assert!(query.queries().iter().all(|holder| holder.fitted));
    Ok(())
}

#[test]
fn both_directions_with_constraints_split_per_direction() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["t"])
        .has("x", 3i64)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 2);
    assert_eq!(query.direction(), Direction::Both);
    Ok(())
}

#[test]
fn disabled_index_falls_back_to_the_type() -> Result<()> {
    let schema = schema()?;
    schema.set_status("rated_ab", SchemaStatus::Disabled)?;
    let ctx = TransactionContext::open(
        Arc::new(InMemoryStoreManager::new()),
        "edgestore",
        Arc::new(schema),
        StorageConfig::default(),
    )?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .types(&["rated"])
        .direction(Direction::Out)
        .has("a", 5i64)
        .compile(RelationCategory::Edge)?;
    assert_eq!(query.queries().len(), 1);
    assert!(!query.queries()[0].fitted, "the type's own layout cannot answer a == 5");
    Ok(())
}

#[test]
fn property_queries_never_look_inward() -> Result<()> {
    let ctx = context(Arc::new(CounterMetrics::default()))?;
    let query = VertexCentricQueryBuilder::new(&ctx)
        .direction(Direction::In)
        .compile(RelationCategory::Property)?;
    assert!(query.is_empty());
    let query = VertexCentricQueryBuilder::new(&ctx).compile(RelationCategory::Property)?;
    assert_eq!(query.direction(), Direction::Out);
    assert!(query.is_simple());
    Ok(())
}
