//! Transaction state a vertex-centric query executes against.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::config::{QueryOptions, StorageConfig};
use crate::error::{GraphError, Result};
use crate::model::Relation;
use crate::primitives::time::{system_timestamps, TimestampProvider};
use crate::schema::SchemaProvider;
use crate::storage::{
    default_metrics, BackendOperation, KeyColumnValueStore, KeyColumnValueStoreManager,
    KeySliceQuery, MutationBatch, RelationCodec, RetryPolicy, SliceQuery, StorageMetrics,
    StoreTransaction, TransactionConfig,
};
use crate::types::{RelationId, VertexId};

/// What the query layer needs from the enclosing graph transaction.
pub trait QueryContext {
    /// Type lookup.
    fn schema(&self) -> &dyn SchemaProvider;

    /// Column layout used to build slices and decode entries.
    fn codec(&self) -> &RelationCodec;

    /// Query tunables.
    fn options(&self) -> &QueryOptions;

    /// Sink for compile and slice counters.
    fn metrics(&self) -> &dyn StorageMetrics;

    /// Returns true if the transaction added or removed any relation.
    fn has_modifications(&self) -> bool;

    /// Returns true if `vertex` has no uncommitted changes in this transaction.
    fn is_loaded(&self, vertex: VertexId) -> bool;

    /// Returns true if `vertex` is split across representatives.
    fn is_partitioned(&self, vertex: VertexId) -> bool;

    /// Representatives of a partitioned vertex; `restrict` keeps local partitions only.
    fn representatives(&self, vertex: VertexId, restrict: bool) -> Vec<VertexId>;

    /// The representative that holds unique relations of a partitioned vertex.
    fn canonical_representative(&self, vertex: VertexId) -> VertexId;

    /// Label of `vertex`, if known.
    fn vertex_label(&self, vertex: VertexId) -> Option<String>;

    /// Reads `slice` from the row of `vertex` in the backend.
    fn execute_slice(&self, vertex: VertexId, slice: &SliceQuery) -> Result<Vec<Relation>>;

    /// Relations added in this transaction and incident on `vertex`.
    fn added_relations(&self, vertex: VertexId) -> Vec<Relation>;

    /// Returns true if the relation was removed in this transaction.
    fn is_removed(&self, relation: RelationId) -> bool;
}

#[derive(Default)]
struct LocalState {
    added: Vec<Relation>,
    removed: FxHashMap<RelationId, Relation>,
    modified: FxHashSet<VertexId>,
}

/// [`QueryContext`] over one store of a KCV manager.
///
/// Added and removed relations stay in memory until [`commit`](Self::commit) writes
/// them through the manager, so locking managers see a single mutation batch.
pub struct TransactionContext {
    manager: Arc<dyn KeyColumnValueStoreManager>,
    store: Arc<dyn KeyColumnValueStore>,
    store_name: String,
    tx: Mutex<Option<Box<dyn StoreTransaction>>>,
    schema: Arc<dyn SchemaProvider>,
    codec: RelationCodec,
    config: StorageConfig,
    clock: Arc<dyn TimestampProvider>,
    metrics: Arc<dyn StorageMetrics>,
    local: Mutex<LocalState>,
    partitions: FxHashMap<VertexId, Vec<VertexId>>,
    local_partitions: Option<FxHashSet<VertexId>>,
    labels: FxHashMap<VertexId, String>,
}

impl TransactionContext {
    /// Opens `store_name` and begins a transaction on `manager`.
    pub fn open(
        manager: Arc<dyn KeyColumnValueStoreManager>,
        store_name: &str,
        schema: Arc<dyn SchemaProvider>,
        config: StorageConfig,
    ) -> Result<Self> {
        config.validate()?;
        let store = manager.open_database(store_name)?;
        let tx = manager.begin_transaction(TransactionConfig::new())?;
        debug!(store = store_name, tx = tx.id(), "tx.open");
        Ok(Self {
            manager,
            store,
            store_name: store_name.to_owned(),
            tx: Mutex::new(Some(tx)),
            schema,
            codec: RelationCodec::new(),
            config,
            clock: system_timestamps(),
            metrics: default_metrics(),
            local: Mutex::new(LocalState::default()),
            partitions: FxHashMap::default(),
            local_partitions: None,
            labels: FxHashMap::default(),
        })
    }

    /// Sets the clock used by backend retries.
    pub fn with_clock(mut self, clock: Arc<dyn TimestampProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Declares `vertex` partitioned over `representatives`; the first is canonical.
    pub fn with_partitioned_vertex(
        mut self,
        vertex: VertexId,
        representatives: impl IntoIterator<Item = VertexId>,
    ) -> Self {
        self.partitions
            .insert(vertex, representatives.into_iter().collect());
        self
    }

    /// Limits restricted fan-out to representatives in `local`.
    pub fn with_local_partitions(mut self, local: impl IntoIterator<Item = VertexId>) -> Self {
        self.local_partitions = Some(local.into_iter().collect());
        self
    }

    /// Records the label of `vertex`.
    pub fn with_vertex_label(mut self, vertex: VertexId, label: impl Into<String>) -> Self {
        self.labels.insert(vertex, label.into());
        self
    }

    /// The underlying store transaction's id.
    pub fn tx_id(&self) -> Result<u64> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(GraphError::Invalid("transaction is closed"))?;
        Ok(tx.id())
    }

    /// Adds `relation` to the transaction.
    pub fn add_relation(&self, relation: Relation) {
        let mut local = self.local.lock();
        local.modified.insert(relation.out_vertex);
        if let Some(inn) = relation.in_vertex {
            local.modified.insert(inn);
        }
        local.added.push(relation);
    }

    /// Removes `relation`; relations added in this transaction are simply dropped.
    pub fn remove_relation(&self, relation: &Relation) {
        let mut local = self.local.lock();
        local.modified.insert(relation.out_vertex);
        if let Some(inn) = relation.in_vertex {
            local.modified.insert(inn);
        }
        let before = local.added.len();
        local.added.retain(|added| added.id != relation.id);
        if local.added.len() == before {
            local.removed.insert(relation.id, relation.clone());
        }
    }

    /// Writes the local changes as one batch and commits the store transaction.
    pub fn commit(&self) -> Result<()> {
        let mut guard = self.tx.lock();
        let tx = guard.as_mut().ok_or(GraphError::Invalid("transaction is closed"))?;
        let batch = self.mutation_batch()?;
        if !batch.is_empty() {
            let rows: usize = batch.values().map(|rows| rows.len()).sum();
            BackendOperation::new(format!("{}.mutate", self.store_name), self.config.retry.write_wait())
                .policy(RetryPolicy::from(&self.config.retry))
                .clock(self.clock.clone())
                .metrics(self.metrics.clone())
                .execute(|| self.manager.mutate_many(&batch, tx.as_mut()))?;
            debug!(store = %self.store_name, rows, "tx.mutate");
        }
        tx.commit()?;
        debug!(tx = tx.id(), "tx.commit");
        *guard = None;
        *self.local.lock() = LocalState::default();
        Ok(())
    }

    /// Discards local changes and rolls back the store transaction.
    pub fn rollback(&self) -> Result<()> {
        let mut guard = self.tx.lock();
        let mut tx = guard.take().ok_or(GraphError::Invalid("transaction is closed"))?;
        *self.local.lock() = LocalState::default();
        debug!(tx = tx.id(), "tx.rollback");
        tx.rollback()
    }

    fn mutation_batch(&self) -> Result<MutationBatch> {
        let local = self.local.lock();
        let mut batch = MutationBatch::new();
        let rows = batch.entry(self.store_name.clone()).or_default();
        for relation in local.removed.values() {
            for (key, entry) in self.codec.entries_for(relation, self.schema.as_ref())? {
                rows.entry(key).or_default().deletion(entry.column);
            }
        }
        for relation in &local.added {
            for (key, entry) in self.codec.entries_for(relation, self.schema.as_ref())? {
                rows.entry(key).or_default().addition(entry);
            }
        }
        for mutation in rows.values_mut() {
            mutation.consolidate();
        }
        if rows.is_empty() {
            batch.clear();
        }
        Ok(batch)
    }
}

impl QueryContext for TransactionContext {
    fn schema(&self) -> &dyn SchemaProvider {
        self.schema.as_ref()
    }

    fn codec(&self) -> &RelationCodec {
        &self.codec
    }

    fn options(&self) -> &QueryOptions {
        &self.config.query
    }

    fn metrics(&self) -> &dyn StorageMetrics {
        self.metrics.as_ref()
    }

    fn has_modifications(&self) -> bool {
        let local = self.local.lock();
        !local.added.is_empty() || !local.removed.is_empty()
    }

    fn is_loaded(&self, vertex: VertexId) -> bool {
        !self.local.lock().modified.contains(&vertex)
    }

    fn is_partitioned(&self, vertex: VertexId) -> bool {
        self.partitions.contains_key(&vertex)
    }

    fn representatives(&self, vertex: VertexId, restrict: bool) -> Vec<VertexId> {
        let Some(all) = self.partitions.get(&vertex) else {
            return vec![vertex];
        };
        match (&self.local_partitions, restrict) {
            (Some(local), true) => all.iter().copied().filter(|r| local.contains(r)).collect(),
            _ => all.clone(),
        }
    }

    fn canonical_representative(&self, vertex: VertexId) -> VertexId {
        self.partitions
            .get(&vertex)
            .and_then(|reps| reps.first().copied())
            .unwrap_or(vertex)
    }

    fn vertex_label(&self, vertex: VertexId) -> Option<String> {
        self.labels.get(&vertex).cloned()
    }

    fn execute_slice(&self, vertex: VertexId, slice: &SliceQuery) -> Result<Vec<Relation>> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(GraphError::Invalid("transaction is closed"))?;
        let query = KeySliceQuery::new(self.codec.row_key(vertex), slice.clone());
        let entries = BackendOperation::new(
            format!("{}.get_slice", self.store_name),
            self.config.retry.read_wait(),
        )
        .policy(RetryPolicy::from(&self.config.retry))
        .clock(self.clock.clone())
        .metrics(self.metrics.clone())
        .execute(|| self.store.get_slice(&query, tx.as_ref()))?;
        self.metrics.slice_executed();
        trace!(
            vertex = vertex.0,
            limit = ?slice.limit(),
            returned = entries.len(),
            "tx.get_slice"
        );
        entries.iter().map(|entry| self.codec.decode(entry)).collect()
    }

    fn added_relations(&self, vertex: VertexId) -> Vec<Relation> {
        self.local
            .lock()
            .added
            .iter()
            .filter(|rel| rel.is_incident_on(vertex))
            .cloned()
            .collect()
    }

    fn is_removed(&self, relation: RelationId) -> bool {
        self.local.lock().removed.contains_key(&relation)
    }
}
