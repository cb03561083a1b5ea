#![allow(missing_docs)]

use std::sync::Arc;

use sombra_kcv::{
    config::QueryOptions,
    query::{TransactionContext, VertexCentricQueryBuilder},
    schema::{InMemorySchema, SchemaProvider, TypeDef},
    storage::{CounterMetrics, InMemoryStoreManager},
    types::Cardinality,
    Direction, Multiplicity, Order, Relation, RelationId, Result, StorageConfig, TypeId, Value,
    ValueKind, VertexId,
};

const PARTITIONED: VertexId = VertexId(100);
const REPRESENTATIVES: [VertexId; 3] = [VertexId(101), VertexId(102), VertexId(103)];

struct Graph {
    manager: Arc<InMemoryStoreManager>,
    schema: Arc<InMemorySchema>,
}

impl Graph {
    /// Nine `knows` edges spread round-robin over the representatives, `since` 1..=9,
    /// pointing at `200 + since`.
    fn new() -> Result<Self> {
        let schema = Arc::new(
            InMemorySchema::new()
                .with_type(TypeDef::property_key("since", ValueKind::Int))?
                .with_type(TypeDef::property_key("tag", ValueKind::String).cardinality(Cardinality::List))?
                .with_type(TypeDef::property_key("nick", ValueKind::String))?
                .with_type(TypeDef::edge_label("knows").sort_key(&["since"]))?
                .with_type(TypeDef::edge_label("spouse").multiplicity(Multiplicity::OneToOne))?
                .with_type(TypeDef::edge_label("mirror"))?,
        );
        let graph = Self {
            manager: Arc::new(InMemoryStoreManager::new()),
            schema,
        };
        let writer = graph.open(StorageConfig::default())?;
        for since in 1..=9u64 {
            let rep = REPRESENTATIVES[((since - 1) % 3) as usize];
            writer.add_relation(
                Relation::edge(RelationId(1000 + since), graph.id("knows"), rep, VertexId(200 + since))
                    .with_property(graph.id("since"), since as i64),
            );
        }
        writer.add_relation(Relation::edge(RelationId(2000), graph.id("spouse"), VertexId(101), VertexId(300)));
        writer.add_relation(Relation::edge(RelationId(2001), graph.id("spouse"), VertexId(102), VertexId(301)));
        // The same relation materialized on two representatives.
        for rep in [VertexId(101), VertexId(102)] {
            writer.add_relation(Relation::edge(RelationId(3000), graph.id("mirror"), rep, VertexId(400)));
        }
        writer.add_relation(Relation::property(RelationId(4000), graph.id("tag"), VertexId(101), Value::from("red")));
        writer.add_relation(Relation::property(RelationId(4001), graph.id("tag"), VertexId(102), Value::from("blue")));
        writer.add_relation(Relation::property(RelationId(4002), graph.id("nick"), VertexId(101), Value::from("al")));
        writer.commit()?;
        Ok(graph)
    }

    fn id(&self, name: &str) -> TypeId {
        self.schema
            .relation_type(name)
            .map(|ty| ty.id)
            .unwrap_or_else(|| panic!("{name} is defined"))
    }

    fn open(&self, config: StorageConfig) -> Result<TransactionContext> {
        TransactionContext::open(self.manager.clone(), "edgestore", self.schema.clone(), config)
    }

    fn partitioned(&self, config: StorageConfig) -> Result<TransactionContext> {
        Ok(self
            .open(config)?
            .with_partitioned_vertex(PARTITIONED, REPRESENTATIVES))
    }
}

fn since_values(graph: &Graph, edges: &[Relation]) -> Vec<i64> {
    edges
        .iter()
        .filter_map(|rel| match rel.properties.get(&graph.id("since")) {
            Some(Value::Int(since)) => Some(*since),
            _ => None,
        })
        .collect()
}

#[test]
fn ordered_merge_is_monotonic_and_limited() -> Result<()> {
    let graph = Graph::new()?;
    let ctx = graph.partitioned(StorageConfig::default())?;
    for limit in 0..12 {
        let edges = VertexCentricQueryBuilder::new(&ctx)
            .types(&["knows"])
            .direction(Direction::Out)
            .order_by("since", Order::Asc)
            .limit(limit)
            .edges(PARTITIONED)?
            .try_collect()?;
        let since = since_values(&graph, &edges);
        assert_eq!(since.len(), limit.min(9), "limit {limit}");
        assert!(since.windows(2).all(|pair| pair[0] <= pair[1]), "{since:?}");
    }
    let targets: Vec<VertexId> = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .order_by("since", Order::Desc)
        .limit(3)
        .vertices(PARTITIONED)?
        .collect::<Result<_>>()?;
    assert_eq!(targets, vec![VertexId(209), VertexId(208), VertexId(207)]);
    Ok(())
}

#[test]
fn canonical_types_read_the_canonical_representative_only() -> Result<()> {
    let graph = Graph::new()?;
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = graph
        .partitioned(StorageConfig::default())?
        .with_metrics(metrics.clone());
    let spouses = VertexCentricQueryBuilder::new(&ctx)
        .types(&["spouse"])
        .direction(Direction::Out)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(spouses.ids(), &[VertexId(300)]);
    assert_eq!(metrics.slices(), 1);
    Ok(())
}

#[test]
fn fan_out_respects_local_partitions() -> Result<()> {
    let graph = Graph::new()?;
    let ctx = graph
        .partitioned(StorageConfig::default())?
        .with_local_partitions([VertexId(101), VertexId(103)]);
    let local = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(local.len(), 6);
    assert!(!local.ids().contains(&VertexId(202)));
    let everywhere = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .no_partition_restriction()
        .vertex_ids(PARTITIONED)?;
    assert_eq!(everywhere.len(), 9);

    let unrestricted = graph
        .partitioned(StorageConfig::default().query(QueryOptions::default().restrict_to_partitions(false)))?
        .with_local_partitions([VertexId(101)]);
    let all = VertexCentricQueryBuilder::new(&unrestricted)
        .types(&["knows"])
        .direction(Direction::Out)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(all.len(), 9);
    Ok(())
}

#[test]
fn given_vertex_is_read_without_fan_out() -> Result<()> {
    let graph = Graph::new()?;
    let ctx = graph.partitioned(StorageConfig::default())?;
    let direct = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .query_only_given_vertex()
        .edges(PARTITIONED)?
        .count();
    assert_eq!(direct, 0, "the partitioned id has no row of its own");
    let rep = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .query_only_given_vertex()
        .edges(VertexId(102))?
        .try_collect()?;
    assert_eq!(since_values(&graph, &rep), vec![2, 5, 8]);
    Ok(())
}

#[test]
fn unordered_vertex_ids_concatenate_representatives() -> Result<()> {
    let graph = Graph::new()?;
    let ctx = graph.partitioned(StorageConfig::default())?;
    let ids = VertexCentricQueryBuilder::new(&ctx)
        .types(&["knows"])
        .direction(Direction::Out)
        .limit(4)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(
        ids.ids(),
        &[VertexId(201), VertexId(204), VertexId(207), VertexId(202)]
    );
    assert!(!ids.is_sorted());
    Ok(())
}

#[test]
fn duplicates_across_representatives_are_optionally_dropped() -> Result<()> {
    let graph = Graph::new()?;
    let plain = graph.partitioned(StorageConfig::default())?;
    let twice = VertexCentricQueryBuilder::new(&plain)
        .types(&["mirror"])
        .direction(Direction::Out)
        .edges(PARTITIONED)?
        .count();
    assert_eq!(twice, 2);

    let dedup = graph
        .partitioned(StorageConfig::default().query(QueryOptions::default().partition_dedup(true)))?;
    let once = VertexCentricQueryBuilder::new(&dedup)
        .types(&["mirror"])
        .direction(Direction::Out)
        .edges(PARTITIONED)?
        .count();
    assert_eq!(once, 1);
    let adjacent: Vec<VertexId> = VertexCentricQueryBuilder::new(&dedup)
        .types(&["mirror"])
        .direction(Direction::Out)
        .vertices(PARTITIONED)?
        .collect::<Result<_>>()?;
    assert_eq!(adjacent, vec![VertexId(400)]);
    let ids = VertexCentricQueryBuilder::new(&dedup)
        .types(&["mirror"])
        .direction(Direction::Out)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(ids.ids(), &[VertexId(400)]);
    let repeated = VertexCentricQueryBuilder::new(&plain)
        .types(&["mirror"])
        .direction(Direction::Out)
        .vertex_ids(PARTITIONED)?;
    assert_eq!(repeated.ids(), &[VertexId(400), VertexId(400)]);
    Ok(())
}

#[test]
fn multi_valued_properties_fan_out_over_all_representatives() -> Result<()> {
    let graph = Graph::new()?;
    let metrics = Arc::new(CounterMetrics::default());
    let ctx = graph
        .partitioned(StorageConfig::default())?
        .with_metrics(metrics.clone());
    let tags = VertexCentricQueryBuilder::new(&ctx)
        .types(&["tag"])
        .properties(PARTITIONED)?
        .try_collect()?;
    let mut values: Vec<Value> = tags.into_iter().filter_map(|rel| rel.value).collect();
    values.sort_by_key(|value| format!("{value:?}"));
    assert_eq!(values, vec![Value::from("blue"), Value::from("red")]);
    assert_eq!(metrics.slices(), 3);

    let single = Arc::new(CounterMetrics::default());
    let ctx = graph
        .partitioned(StorageConfig::default())?
        .with_metrics(single.clone());
    let nick = VertexCentricQueryBuilder::new(&ctx)
        .types(&["nick"])
        .properties(PARTITIONED)?
        .try_collect()?;
    assert_eq!(nick.len(), 1);
    assert_eq!(single.slices(), 1);
    Ok(())
}
