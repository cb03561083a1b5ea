#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use sombra_kcv::{
    primitives::time::system_timestamps,
    storage::{
        CounterMetrics, Entry, ExpectedValueCheckingStoreManager, InMemoryStoreManager,
        KcvMutation, KeyColumnValueStore, KeyColumnValueStoreManager, KeySliceQuery,
        LocalLockerProvider, MutationBatch, SliceQuery, StaticBuffer, StoreFeatures,
        StoreTransaction, TransactionConfig,
    },
    Result, StorageConfig,
};

/// Delegates to an in-memory manager and records which transaction each batch used.
struct SpyManager {
    inner: InMemoryStoreManager,
    batches: Mutex<Vec<u64>>,
}

impl SpyManager {
    fn new() -> Self {
        Self {
            inner: InMemoryStoreManager::new(),
            batches: Mutex::new(Vec::new()),
        }
    }

    fn batches(&self) -> Vec<u64> {
        self.batches.lock().clone()
    }
}

impl KeyColumnValueStoreManager for SpyManager {
    fn name(&self) -> &str {
        "spy"
    }

    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>> {
        self.inner.open_database(name)
    }

    fn mutate_many(&self, batch: &MutationBatch, tx: &mut dyn StoreTransaction) -> Result<()> {
        self.batches.lock().push(tx.id());
        self.inner.mutate_many(batch, tx)
    }

    fn begin_transaction(&self, config: TransactionConfig) -> Result<Box<dyn StoreTransaction>> {
        self.inner.begin_transaction(config)
    }

    fn features(&self) -> StoreFeatures {
        self.inner.features()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn buf(bytes: &[u8]) -> StaticBuffer {
    StaticBuffer::copy_from_slice(bytes)
}

fn batch(key: &[u8], column: &[u8], value: &[u8]) -> MutationBatch {
    let mut rows = std::collections::BTreeMap::new();
    rows.insert(
        buf(key),
        KcvMutation::new(vec![Entry::new(buf(column), buf(value))], Vec::new()),
    );
    let mut batch = MutationBatch::new();
    batch.insert("edgestore".to_owned(), rows);
    batch
}

fn setup() -> (Arc<SpyManager>, Arc<LocalLockerProvider>, Arc<CounterMetrics>, ExpectedValueCheckingStoreManager) {
    let spy = Arc::new(SpyManager::new());
    let config = StorageConfig::default();
    let lockers = Arc::new(LocalLockerProvider::from_options(&config.locking, system_timestamps()));
    let metrics = Arc::new(CounterMetrics::default());
    let manager = ExpectedValueCheckingStoreManager::new(spy.clone(), lockers.clone(), &config)
        .with_metrics(metrics.clone());
    (spy, lockers, metrics, manager)
}

fn read(manager: &ExpectedValueCheckingStoreManager, key: &[u8]) -> Result<Vec<Entry>> {
    let store = manager.open_checked("edgestore")?;
    let tx = manager.begin(TransactionConfig::new())?;
    store.get_slice(
        &KeySliceQuery::new(buf(key), SliceQuery::new(buf(&[0x00]), buf(&[0xFF]))),
        &tx,
    )
}

#[test]
fn lock_free_transactions_write_through_the_inconsistent_transaction() -> Result<()> {
    let (spy, _, metrics, manager) = setup();
    let mut tx = manager.begin(TransactionConfig::new())?;
    manager.mutate_many(&batch(b"row", b"c", b"v"), &mut tx)?;
    assert_eq!(spy.batches(), vec![tx.inconsistent().id()]);
    assert_ne!(tx.inconsistent().id(), tx.consistent().id());
    assert_eq!(
        metrics
            .inconsistent_mutations
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    tx.commit()?;
    assert_eq!(read(&manager, b"row")?.len(), 1);
    Ok(())
}

#[test]
fn locked_transactions_write_through_the_consistent_transaction() -> Result<()> {
    let (spy, lockers, _, manager) = setup();
    let store = manager.open_checked("edgestore")?;
    let mut tx = manager.begin(TransactionConfig::new())?;
    store.acquire_lock(&buf(b"row"), &buf(b"c"), None, &mut tx)?;
    assert_eq!(lockers.local("edgestore_lock_").held_count(), 1);
    manager.mutate_many(&batch(b"row", b"c", b"v"), &mut tx)?;
    manager.mutate_many(&batch(b"row", b"d", b"v"), &mut tx)?;
    let consistent = tx.consistent().id();
    assert_eq!(spy.batches(), vec![consistent, consistent]);
    tx.commit()?;
    assert_eq!(lockers.local("edgestore_lock_").held_count(), 0);
    Ok(())
}

#[test]
fn failed_lock_attempts_still_route_consistently() -> Result<()> {
    let (spy, _, _, manager) = setup();
    let store = manager.open_checked("edgestore")?;
    let mut holder = manager.begin(TransactionConfig::new())?;
    store.acquire_lock(&buf(b"row"), &buf(b"c"), None, &mut holder)?;

    let mut contender = manager.begin(TransactionConfig::new())?;
    let err = store
        .acquire_lock(&buf(b"row"), &buf(b"c"), None, &mut contender)
        .unwrap_err();
    assert!(err.is_temporary(), "contention is retryable: {err}");
    assert!(contender.has_any_locks());
    manager.mutate_many(&batch(b"other", b"c", b"v"), &mut contender)?;
    assert_eq!(spy.batches(), vec![contender.consistent().id()]);
    contender.rollback()?;
    holder.rollback()?;
    Ok(())
}

#[test]
fn matching_expected_value_allows_the_write() -> Result<()> {
    let (_, _, _, manager) = setup();
    let mut seed = manager.begin(TransactionConfig::new())?;
    manager.mutate_many(&batch(b"row", b"c", b"v1"), &mut seed)?;
    seed.commit()?;

    let store = manager.open_checked("edgestore")?;
    let mut tx = manager.begin(TransactionConfig::new())?;
    store.acquire_lock(&buf(b"row"), &buf(b"c"), Some(&buf(b"v1")), &mut tx)?;
    manager.mutate_many(&batch(b"row", b"c", b"v2"), &mut tx)?;
    assert!(tx.mutations_started());
    tx.commit()?;
    let entries = read(&manager, b"row")?;
    assert_eq!(entries, vec![Entry::new(buf(b"c"), buf(b"v2"))]);

    let mut stale = manager.begin(TransactionConfig::new())?;
    store.acquire_lock(&buf(b"row"), &buf(b"c"), Some(&buf(b"v1")), &mut stale)?;
    let err = manager
        .mutate_many(&batch(b"row", b"c", b"v3"), &mut stale)
        .unwrap_err();
    assert!(!err.is_temporary());
    stale.rollback()?;
    Ok(())
}

#[test]
fn wrapper_reports_locking_and_is_shared_across_threads() -> Result<()> {
    let (_, _, _, manager) = setup();
    assert!(manager.features().locking);
    assert!(!manager.inner().features().locking);
    let opened: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| manager.open_checked("edgestore")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("opener panicked"))
            .collect::<Result<_>>()
    })?;
    assert!(opened.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    Ok(())
}
