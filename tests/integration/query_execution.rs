#![allow(missing_docs)]

use std::sync::{Arc, Once};

use sombra_kcv::{
    query::{Cmp, QueryContext, TransactionContext, VertexCentricQueryBuilder},
    schema::{InMemorySchema, SchemaProvider, TypeDef},
    storage::{CounterMetrics, InMemoryStoreManager},
    Direction, GraphError, Order, Relation, RelationId, Result, StorageConfig, TypeId, Value,
    ValueKind, VertexId,
};
use tracing_subscriber::EnvFilter;

const OWNER: VertexId = VertexId(1);

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_kcv::query=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

struct Fixture {
    manager: Arc<InMemoryStoreManager>,
    schema: Arc<InMemorySchema>,
}

impl Fixture {
    fn new() -> Result<Self> {
        init_tracing();
        let schema = Arc::new(
            InMemorySchema::new()
                .with_type(TypeDef::property_key("name", ValueKind::String))?
                .with_type(TypeDef::property_key("since", ValueKind::Int))?
                .with_type(TypeDef::property_key("w", ValueKind::Int))?
                .with_type(TypeDef::edge_label("knows").sort_key(&["since"]))?,
        );
        let fixture = Self {
            manager: Arc::new(InMemoryStoreManager::new()),
            schema,
        };
        fixture.seed()?;
        Ok(fixture)
    }

    fn id(&self, name: &str) -> TypeId {
        self.schema
            .relation_type(name)
            .map(|ty| ty.id)
            .unwrap_or_else(|| panic!("{name} is defined"))
    }

    fn knows(&self, i: u64) -> Relation {
        Relation::edge(RelationId(1000 + i), self.id("knows"), OWNER, VertexId(100 + i))
            .with_property(self.id("since"), i as i64)
            .with_property(self.id("w"), i64::from(i >= 10))
    }

    fn seed(&self) -> Result<()> {
        let writer = self.open()?;
        for i in 0..20 {
            writer.add_relation(self.knows(i));
        }
        writer.add_relation(Relation::property(
            RelationId(1),
            self.id("name"),
            OWNER,
            Value::from("alice"),
        ));
        writer.commit()
    }

    fn open(&self) -> Result<TransactionContext> {
        TransactionContext::open(
            self.manager.clone(),
            "edgestore",
            self.schema.clone(),
            StorageConfig::default(),
        )
    }
}

#[test]
fn point_query_reads_one_edge() -> Result<()> {
    let fixture = Fixture::new()?;
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = fixture.open()?.with_metrics(metrics.clone());
    let edges = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .has("since", 7i64)
        .edges(OWNER)?
        .try_collect()?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].in_vertex, Some(VertexId(107)));
    assert_eq!(metrics.slices(), 1);
    Ok(())
}

#[test]
fn filtered_results_trigger_requery_with_larger_limit() -> Result<()> {
    let fixture = Fixture::new()?;
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = fixture.open()?.with_metrics(metrics.clone());
    let edges = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .has("w", 1i64)
        .limit(3)
        .edges(OWNER)?
        .try_collect()?;
    let since: Vec<Value> = edges
        .iter()
        .filter_map(|rel| rel.properties.get(&fixture.id("since")).cloned())
        .collect();
    assert_eq!(since, vec![Value::Int(10), Value::Int(11), Value::Int(12)]);
    // 6, then 12, then 24 columns requested.
    assert_eq!(metrics.slices(), 3);
    Ok(())
}

#[test]
fn uncommitted_changes_overlay_backend_results() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    ctx.remove_relation(&fixture.knows(0));
    ctx.add_relation(fixture.knows(50));
    assert!(!ctx.is_loaded(OWNER));
    let ids = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .vertex_ids(OWNER)?;
    assert_eq!(ids.len(), 20);
    assert!(!ids.ids().contains(&VertexId(100)));
    assert!(ids.ids().contains(&VertexId(150)));
    Ok(())
}

#[test]
fn order_against_native_order_sorts_in_memory() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    let edges = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .order_by("since", Order::Desc)
        .limit(3)
        .edges(OWNER)?
        .try_collect()?;
    let targets: Vec<_> = edges.iter().filter_map(|rel| rel.in_vertex).collect();
    assert_eq!(targets, vec![VertexId(119), VertexId(118), VertexId(117)]);
    Ok(())
}

#[test]
fn range_constraint_and_vertices() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    let vertices: Vec<VertexId> = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .interval("since", 3i64, 6i64)
        .vertices(OWNER)?
        .collect::<Result<_>>()?;
    assert_eq!(vertices, vec![VertexId(103), VertexId(104), VertexId(105)]);
    let inbound = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::In)
        .vertex_ids(VertexId(104))?;
    assert_eq!(inbound.ids(), &[OWNER]);
    Ok(())
}

#[test]
fn adjacent_vertex_restricts_edges() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    let edges = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .adjacent(VertexId(105))
        .edges(OWNER)?
        .try_collect()?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].id, RelationId(1005));

    ctx.add_relation(
        Relation::edge(RelationId(9000), fixture.id("knows"), OWNER, VertexId(999))
            .with_property(fixture.id("since"), 1i64),
    );
    let counted = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .adjacent_uncommitted(VertexId(999))
        .count(OWNER);
    assert!(counted.is_err(), "adjacency needs an edge query");
    let fresh = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .adjacent_uncommitted(VertexId(999))
        .edges(OWNER)?
        .count();
    assert_eq!(fresh, 1);
    Ok(())
}

#[test]
fn properties_and_untyped_relations() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    let props = VertexCentricQueryBuilder::new(&ctx).properties(OWNER)?.try_collect()?;
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].value, Some(Value::from("alice")));
    let all = VertexCentricQueryBuilder::new(&ctx).count(OWNER)?;
    assert_eq!(all, 21);
    let few = VertexCentricQueryBuilder::new(&ctx)
        .direction(Direction::Out)
        .has_cmp("since", Cmp::Lt, 2i64)
        .edges(OWNER)?
        .try_collect()?;
    assert_eq!(few.len(), 2);
    Ok(())
}

#[test]
fn only_loaded_requires_a_simple_query() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?;
    let err = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .has("w", 1i64)
        .query_only_loaded()
        .edges(OWNER)
        .unwrap_err();
    assert!(matches!(err, GraphError::Invalid(_)));

    ctx.add_relation(fixture.knows(60));
    let persisted = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .query_only_loaded()
        .edges(OWNER)?
        .count();
    assert_eq!(persisted, 20, "loaded-only reads skip the overlay");
    Ok(())
}

#[test]
fn implicit_label_key_is_computed() -> Result<()> {
    let fixture = Fixture::new()?;
    let ctx = fixture.open()?.with_vertex_label(OWNER, "person");
    let label = VertexCentricQueryBuilder::new(&ctx)
        .types(&["~label"])
        .properties(OWNER)?
        .try_collect()?;
    assert_eq!(label.len(), 1);
    assert_eq!(label[0].value, Some(Value::from("person")));
    assert_eq!(ctx.vertex_label(VertexId(2)), None);
    Ok(())
}
