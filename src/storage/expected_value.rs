//! Expected-value-checking locking layer.
//!
//! Wraps a store manager whose transactions only offer tunable consistency and adds
//! compare-and-set semantics: a transaction locks `(key, column)` pairs together with
//! the value it expects to find there. Before the first mutation is issued the locks
//! are verified and every expected value is re-read through a key-consistent
//! transaction. From then on, a transaction that attempted any lock sends *all* its
//! writes through the consistent transaction; transactions without locks use the
//! cheaper inconsistent one.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::backend_op::{BackendOperation, RetryPolicy};
use super::kcv::{
    Entry, KeyColumnValueStore, KeyColumnValueStoreManager, KeySliceQuery, MutationBatch,
    SliceQuery, StaticBuffer, StoreFeatures, StoreTransaction, TransactionConfig,
};
use super::locking::{KeyColumn, Locker, LockerProvider};
use super::metrics::{default_metrics, StorageMetrics};
use crate::config::StorageConfig;
use crate::error::{acquire_lock, BackendError, GraphError, Result};
use crate::primitives::time::{system_timestamps, TimestampProvider};

/// Store manager adding expected-value-checking locks to `inner`.
pub struct ExpectedValueCheckingStoreManager {
    inner: Arc<dyn KeyColumnValueStoreManager>,
    locker_provider: Arc<dyn LockerProvider>,
    lock_suffix: String,
    max_read_time: Duration,
    policy: RetryPolicy,
    stores: Mutex<HashMap<String, Arc<ExpectedValueCheckingStore>>>,
    features: StoreFeatures,
    clock: Arc<dyn TimestampProvider>,
    metrics: Arc<dyn StorageMetrics>,
}

impl ExpectedValueCheckingStoreManager {
    /// Wraps `inner`, taking lockers from `locker_provider`.
    pub fn new(
        inner: Arc<dyn KeyColumnValueStoreManager>,
        locker_provider: Arc<dyn LockerProvider>,
        config: &StorageConfig,
    ) -> Self {
        let features = inner.features().locking(true);
        Self {
            inner,
            locker_provider,
            lock_suffix: config.locking.lock_store_suffix.clone(),
            max_read_time: config.retry.read_wait(),
            policy: RetryPolicy::from(&config.retry),
            stores: Mutex::new(HashMap::new()),
            features,
            clock: system_timestamps(),
            metrics: default_metrics(),
        }
    }

    /// Sets the clock used by expected-value re-reads.
    pub fn with_clock(mut self, clock: Arc<dyn TimestampProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the metrics sink for routing decisions.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The wrapped manager.
    pub fn inner(&self) -> &Arc<dyn KeyColumnValueStoreManager> {
        &self.inner
    }

    /// Opens the wrapper for `name`; concurrent callers observe the same instance.
    pub fn open_checked(&self, name: &str) -> Result<Arc<ExpectedValueCheckingStore>> {
        let mut stores = acquire_lock(&self.stores)?;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        let inner = self.inner.open_database(name)?;
        let locker_name = format!("{name}{}", self.lock_suffix);
        let locker = self.locker_provider.locker(&locker_name);
        let store = Arc::new(ExpectedValueCheckingStore {
            name: name.to_owned(),
            inner,
            locker,
        });
        stores.insert(name.to_owned(), store.clone());
        debug!(store = name, locker = %locker_name, "evc.open_database");
        Ok(store)
    }

    /// Begins a transaction pairing an inconsistent and a consistent backend transaction.
    pub fn begin(&self, config: TransactionConfig) -> Result<ExpectedValueCheckingTransaction> {
        let inconsistent = self.inner.begin_transaction(config.clone())?;
        let consistent_config = config.merged_with(&self.inner.features().key_consistent_tx_config);
        let consistent = match self.inner.begin_transaction(consistent_config) {
            Ok(tx) => tx,
            Err(err) => {
                let mut inconsistent = inconsistent;
                if let Err(rollback) = inconsistent.rollback() {
                    warn!(error = %rollback, "evc.begin.rollback_failed");
                }
                return Err(err);
            }
        };
        debug!(
            inconsistent = inconsistent.id(),
            consistent = consistent.id(),
            "evc.begin"
        );
        Ok(ExpectedValueCheckingTransaction {
            config,
            inconsistent,
            consistent,
            expected: BTreeMap::new(),
            stores: BTreeMap::new(),
            lock_attempted: false,
            mutations_started: false,
            state: TxState::Active,
            max_read_time: self.max_read_time,
            policy: self.policy,
            clock: self.clock.clone(),
        })
    }
}

impl KeyColumnValueStoreManager for ExpectedValueCheckingStoreManager {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>> {
        Ok(self.open_checked(name)?)
    }

    fn mutate_many(&self, batch: &MutationBatch, tx: &mut dyn StoreTransaction) -> Result<()> {
        let tx = ExpectedValueCheckingTransaction::downcast(tx)?;
        let consistent = tx.prepare_for_mutations()?;
        self.metrics.mutation_routed(consistent);
        if consistent {
            debug!(stores = batch.len(), tx = tx.consistent.id(), "evc.mutate.consistent");
            self.inner.mutate_many(batch, tx.consistent.as_mut())
        } else {
            debug!(stores = batch.len(), tx = tx.inconsistent.id(), "evc.mutate.inconsistent");
            self.inner.mutate_many(batch, tx.inconsistent.as_mut())
        }
    }

    fn begin_transaction(&self, config: TransactionConfig) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(self.begin(config)?))
    }

    fn features(&self) -> StoreFeatures {
        self.features.clone()
    }

    fn close(&self) -> Result<()> {
        acquire_lock(&self.stores)?.clear();
        self.inner.close()
    }
}

/// A store wrapped with an expected-value-checking locker.
pub struct ExpectedValueCheckingStore {
    name: String,
    inner: Arc<dyn KeyColumnValueStore>,
    locker: Arc<dyn Locker>,
}

impl ExpectedValueCheckingStore {
    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn KeyColumnValueStore> {
        &self.inner
    }
}

impl KeyColumnValueStore for ExpectedValueCheckingStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_slice(&self, query: &KeySliceQuery, tx: &dyn StoreTransaction) -> Result<Vec<Entry>> {
        let tx = ExpectedValueCheckingTransaction::downcast_ref(tx)?;
        self.inner.get_slice(query, tx.inconsistent.as_ref())
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        tx: &mut dyn StoreTransaction,
    ) -> Result<()> {
        let tx = ExpectedValueCheckingTransaction::downcast(tx)?;
        if tx.prepare_for_mutations()? {
            self.inner
                .mutate(key, additions, deletions, tx.consistent.as_mut())
        } else {
            self.inner
                .mutate(key, additions, deletions, tx.inconsistent.as_mut())
        }
    }

    fn acquire_lock(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        expected: Option<&StaticBuffer>,
        tx: &mut dyn StoreTransaction,
    ) -> Result<()> {
        let tx = ExpectedValueCheckingTransaction::downcast(tx)?;
        tx.ensure_active()?;
        if tx.mutations_started {
            return Err(BackendError::permanent(
                "attempted to obtain a lock after mutations had been persisted",
            )
            .into());
        }
        tx.lock_attempted = true;
        let target = KeyColumn::new(key.clone(), column.clone());
        self.locker.write_lock(&target, tx.consistent.as_ref())?;
        tx.stores.entry(self.name.clone()).or_insert_with(|| StoreHandle {
            store: self.inner.clone(),
            locker: self.locker.clone(),
        });
        tx.expected
            .insert((self.name.clone(), target), expected.cloned());
        debug!(store = %self.name, tx = tx.consistent.id(), "evc.lock");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

struct StoreHandle {
    store: Arc<dyn KeyColumnValueStore>,
    locker: Arc<dyn Locker>,
}

/// Joint transaction handle issued by [`ExpectedValueCheckingStoreManager`].
pub struct ExpectedValueCheckingTransaction {
    config: TransactionConfig,
    inconsistent: Box<dyn StoreTransaction>,
    consistent: Box<dyn StoreTransaction>,
    expected: BTreeMap<(String, KeyColumn), Option<StaticBuffer>>,
    stores: BTreeMap<String, StoreHandle>,
    lock_attempted: bool,
    mutations_started: bool,
    state: TxState,
    max_read_time: Duration,
    policy: RetryPolicy,
    clock: Arc<dyn TimestampProvider>,
}

impl ExpectedValueCheckingTransaction {
    fn downcast(tx: &mut dyn StoreTransaction) -> Result<&mut Self> {
        tx.as_any_mut().downcast_mut::<Self>().ok_or(GraphError::Invalid(
            "transaction was not opened by the expected-value-checking manager",
        ))
    }

    fn downcast_ref(tx: &dyn StoreTransaction) -> Result<&Self> {
        tx.as_any().downcast_ref::<Self>().ok_or(GraphError::Invalid(
            "transaction was not opened by the expected-value-checking manager",
        ))
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(GraphError::Invalid("transaction already committed")),
            TxState::RolledBack => Err(GraphError::Invalid("transaction already rolled back")),
        }
    }

    /// The transaction used when no locks are held.
    pub fn inconsistent(&self) -> &dyn StoreTransaction {
        self.inconsistent.as_ref()
    }

    /// The key-consistent transaction used once locks are involved.
    pub fn consistent(&self) -> &dyn StoreTransaction {
        self.consistent.as_ref()
    }

    /// Returns true once a lock was attempted, even if the attempt failed.
    pub fn has_any_locks(&self) -> bool {
        self.lock_attempted || !self.expected.is_empty()
    }

    /// Returns true once mutations were prepared.
    pub fn mutations_started(&self) -> bool {
        self.mutations_started
    }

    /// Verifies locks and expected values before the first mutation.
    ///
    /// Idempotent: only the first call checks. Returns whether writes must use the
    /// consistent transaction.
    pub fn prepare_for_mutations(&mut self) -> Result<bool> {
        self.ensure_active()?;
        if !self.mutations_started {
            self.check_all_locks()?;
            self.check_all_expected_values()?;
            self.mutations_started = true;
        }
        Ok(self.has_any_locks())
    }

    fn check_all_locks(&self) -> Result<()> {
        for handle in self.stores.values() {
            handle.locker.check_locks(self.consistent.as_ref())?;
        }
        Ok(())
    }

    fn check_all_expected_values(&self) -> Result<()> {
        for ((store_name, target), expected) in &self.expected {
            let handle = self
                .stores
                .get(store_name)
                .ok_or(GraphError::NotFound("locked store"))?;
            let mut end = target.column.to_vec();
            end.push(0x00);
            let query = KeySliceQuery::new(
                target.key.clone(),
                SliceQuery::new(target.column.clone(), end).with_limit(Some(1)),
            );
            let consistent = self.consistent.as_ref();
            let entries = BackendOperation::new(
                format!("{store_name}.check_expected_value"),
                self.max_read_time,
            )
            .policy(self.policy)
            .clock(self.clock.clone())
            .execute(|| handle.store.get_slice(&query, consistent))?;
            let actual = entries
                .into_iter()
                .find(|entry| entry.column == target.column)
                .map(|entry| entry.value);
            if actual.as_ref() != expected.as_ref() {
                return Err(BackendError::permanent(format!(
                    "expected value mismatch in {store_name} for {}:{}",
                    hex::encode(&target.key),
                    hex::encode(&target.column)
                ))
                .into());
            }
        }
        Ok(())
    }

    fn delete_all_locks(&self) -> Result<()> {
        let mut first_err = None;
        for handle in self.stores.values() {
            if let Err(err) = handle.locker.delete_locks(self.consistent.as_ref()) {
                warn!(error = %err, "evc.delete_locks_failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ExpectedValueCheckingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpectedValueCheckingTransaction")
            .field("inconsistent", &self.inconsistent.id())
            .field("consistent", &self.consistent.id())
            .field("expected", &self.expected.len())
            .field("lock_attempted", &self.lock_attempted)
            .field("mutations_started", &self.mutations_started)
            .field("state", &self.state)
            .finish()
    }
}

impl StoreTransaction for ExpectedValueCheckingTransaction {
    fn id(&self) -> u64 {
        self.inconsistent.id()
    }

    fn config(&self) -> &TransactionConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut TransactionConfig {
        &mut self.config
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.inconsistent.commit()?;
        self.delete_all_locks()?;
        self.consistent.commit()?;
        self.state = TxState::Committed;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxState::RolledBack;
        let locks = self.delete_all_locks();
        let inconsistent = self.inconsistent.rollback();
        let consistent = self.consistent.rollback();
        locks.and(inconsistent).and(consistent)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
