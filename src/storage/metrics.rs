use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking backend traffic generated by the query and locking layers.
///
/// Implementations count slice reads, retried backend calls, mutation routing
/// decisions and compiled backend sub-queries. Tests use the counters to prove that a
/// query never reached the backend.
pub trait StorageMetrics: Send + Sync {
    /// Records a slice query sent to the backend.
    fn slice_executed(&self);

    /// Records a retry of a transiently failed backend call.
    fn backend_retry(&self);

    /// Records where a mutation batch was routed.
    ///
    /// # Parameters
    /// * `consistent` - `true` when the batch went through the consistent transaction.
    fn mutation_routed(&self, consistent: bool);

    /// Records a compiled vertex-centric query and the number of backend sub-queries it needs.
    fn query_compiled(&self, backend_queries: usize);
}

/// A no-op implementation of [`StorageMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn slice_executed(&self) {}
    fn backend_retry(&self) {}
    fn mutation_routed(&self, _consistent: bool) {}
    fn query_compiled(&self, _backend_queries: usize) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of slice queries sent to the backend.
    pub slices_executed: AtomicU64,

    /// Number of retries performed by the backend executor.
    pub backend_retries: AtomicU64,

    /// Mutation batches routed through the consistent transaction.
    pub consistent_mutations: AtomicU64,

    /// Mutation batches routed through the inconsistent transaction.
    pub inconsistent_mutations: AtomicU64,

    /// Number of compiled queries.
    pub queries_compiled: AtomicU64,

    /// Total backend sub-queries across compiled queries.
    pub backend_queries_compiled: AtomicU64,
}

impl CounterMetrics {
    /// Current number of slice reads.
    pub fn slices(&self) -> u64 {
        self.slices_executed.load(Ordering::Relaxed)
    }

    /// Current number of retries.
    pub fn retries(&self) -> u64 {
        self.backend_retries.load(Ordering::Relaxed)
    }
}

impl StorageMetrics for CounterMetrics {
    fn slice_executed(&self) {
        self.slices_executed.fetch_add(1, Ordering::Relaxed);
    }

    fn backend_retry(&self) {
        self.backend_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn mutation_routed(&self, consistent: bool) {
        if consistent {
            self.consistent_mutations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inconsistent_mutations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn query_compiled(&self, backend_queries: usize) {
        self.queries_compiled.fetch_add(1, Ordering::Relaxed);
        self.backend_queries_compiled
            .fetch_add(backend_queries as u64, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which discards all recorded metrics.
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
