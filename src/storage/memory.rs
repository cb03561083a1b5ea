//! Ordered in-memory backend implementing the KCV contract.
//!
//! Mutations apply immediately; transactions only carry identity and configuration.
//! There is no native locking, so locks must come from a wrapping manager.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::kcv::{
    Entry, KeyColumnValueStore, KeyColumnValueStoreManager, KeySliceQuery, MutationBatch,
    StaticBuffer, StoreFeatures, StoreTransaction, TransactionConfig,
};
use crate::error::{BackendError, GraphError, Result};

type Row = BTreeMap<StaticBuffer, StaticBuffer>;

/// A single in-memory column family.
pub struct InMemoryStore {
    name: String,
    rows: RwLock<BTreeMap<StaticBuffer, Row>>,
}

impl InMemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    fn apply(&self, key: &StaticBuffer, additions: &[Entry], deletions: &[StaticBuffer]) {
        let mut rows = self.rows.write();
        let row = rows.entry(key.clone()).or_default();
        for column in deletions {
            row.remove(column);
        }
        for entry in additions {
            row.insert(entry.column.clone(), entry.value.clone());
        }
        if row.is_empty() {
            rows.remove(key);
        }
    }

    /// Number of columns currently stored in `key`.
    pub fn row_len(&self, key: &[u8]) -> usize {
        self.rows.read().get(key).map_or(0, BTreeMap::len)
    }
}

impl KeyColumnValueStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_slice(&self, query: &KeySliceQuery, _tx: &dyn StoreTransaction) -> Result<Vec<Entry>> {
        let slice = &query.slice;
        if slice.start() >= slice.end() || slice.limit() == Some(0) {
            return Ok(Vec::new());
        }
        let rows = self.rows.read();
        let Some(row) = rows.get(query.key.as_ref()) else {
            return Ok(Vec::new());
        };
        let range = row.range::<[u8], _>((
            Bound::Included(slice.start().as_ref()),
            Bound::Excluded(slice.end().as_ref()),
        ));
        let limit = slice.limit().unwrap_or(usize::MAX);
        let entries: Vec<Entry> = range
            .take(limit)
            .map(|(column, value)| Entry::new(column.clone(), value.clone()))
            .collect();
        trace!(store = %self.name, returned = entries.len(), "memory.get_slice");
        Ok(entries)
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        _tx: &mut dyn StoreTransaction,
    ) -> Result<()> {
        self.apply(key, additions, deletions);
        Ok(())
    }

    fn acquire_lock(
        &self,
        _key: &StaticBuffer,
        _column: &StaticBuffer,
        _expected: Option<&StaticBuffer>,
        _tx: &mut dyn StoreTransaction,
    ) -> Result<()> {
        Err(BackendError::permanent("in-memory store does not support native locking").into())
    }
}

/// Transaction handle issued by [`InMemoryStoreManager`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    id: u64,
    config: TransactionConfig,
    closed: bool,
}

impl InMemoryTransaction {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(GraphError::Invalid("transaction already closed"));
        }
        self.closed = true;
        Ok(())
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn id(&self) -> u64 {
        self.id
    }

    fn config(&self) -> &TransactionConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut TransactionConfig {
        &mut self.config
    }

    fn commit(&mut self) -> Result<()> {
        self.close()
    }

    fn rollback(&mut self) -> Result<()> {
        self.close()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Store manager over in-memory column families.
pub struct InMemoryStoreManager {
    stores: Mutex<BTreeMap<String, Arc<InMemoryStore>>>,
    next_tx: AtomicU64,
    features: StoreFeatures,
}

impl InMemoryStoreManager {
    /// Creates an empty manager advertising ordered scans and batch mutation.
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(BTreeMap::new()),
            next_tx: AtomicU64::new(1),
            features: StoreFeatures::default()
                .ordered_scan(true)
                .batch_mutation(true)
                .key_consistent(true),
        }
    }

    /// Replaces the advertised features.
    pub fn with_features(mut self, features: StoreFeatures) -> Self {
        self.features = features;
        self
    }

    /// Returns the concrete store, opening it if needed.
    pub fn store(&self, name: &str) -> Arc<InMemoryStore> {
        self.stores
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(InMemoryStore::new(name)))
            .clone()
    }
}

impl Default for InMemoryStoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyColumnValueStoreManager for InMemoryStoreManager {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>> {
        Ok(self.store(name))
    }

    fn mutate_many(&self, batch: &MutationBatch, _tx: &mut dyn StoreTransaction) -> Result<()> {
        for (store_name, rows) in batch {
            let store = self.store(store_name);
            for (key, mutation) in rows {
                store.apply(key, mutation.additions(), mutation.deletions());
            }
        }
        Ok(())
    }

    fn begin_transaction(&self, config: TransactionConfig) -> Result<Box<dyn StoreTransaction>> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemoryTransaction {
            id,
            config,
            closed: false,
        }))
    }

    fn features(&self) -> StoreFeatures {
        self.features.clone()
    }

    fn close(&self) -> Result<()> {
        self.stores.lock().clear();
        Ok(())
    }
}
