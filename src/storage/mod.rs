//! Key-column-value storage layer.
//!
//! Defines the store contract consumed by the query layer, an ordered in-memory
//! backend, the relation codec, the retrying backend executor and the
//! expected-value-checking manager that adds consistent locking on top of any store.

/// Store, transaction and mutation contracts.
///
/// Everything above this layer talks to backends only through these traits.
pub mod kcv;

/// Ordered in-memory reference backend.
pub mod memory;

/// Retry-with-backoff execution of backend calls.
pub mod backend_op;

/// Lockers over `(key, column)` pairs.
pub mod locking;

/// Expected-value-checking locking layer.
pub mod expected_value;

/// Column layout and relation serialization.
pub mod codec;

mod metrics;

pub use backend_op::{
    execute_transactional, Attempt, BackendOperation, ManagerTransactions, RetryPolicy,
    TransactionalProvider,
};
pub use codec::{KeyRestriction, RelationCodec};
pub use expected_value::{
    ExpectedValueCheckingStore, ExpectedValueCheckingStoreManager,
    ExpectedValueCheckingTransaction,
};
pub use kcv::{
    Entry, KcvMutation, KeyColumnValueStore, KeyColumnValueStoreManager, KeySliceQuery,
    MutationBatch, SliceQuery, StaticBuffer, StoreFeatures, StoreTransaction, TransactionConfig,
};
pub use locking::{KeyColumn, LocalLocker, LocalLockerProvider, Locker, LockerProvider};
pub use memory::{InMemoryStore, InMemoryStoreManager};

/// Metrics for backend traffic.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};
