//! Retry-with-backoff executor for backend calls.
//!
//! Every attempt is classified into an [`Attempt`]: success, transient failure (retried
//! after a jittered exponential wait) or permanent failure (returned at once). The
//! innermost [`BackendError`] in the error's cause chain decides the class; failures
//! that carry no backend error at all are permanent.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use super::kcv::{KeyColumnValueStoreManager, StoreTransaction, TransactionConfig};
use super::metrics::StorageMetrics;
use crate::config::RetryOptions;
use crate::error::{innermost_backend_error, BackendError, GraphError, Result};
use crate::primitives::concurrency::Interrupt;
use crate::primitives::time::{system_timestamps, TimestampProvider};

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Nominal wait before the first retry; doubles after each retry.
    pub base_wait: Duration,
    /// Symmetric multiplicative jitter; each wait lies in `[1 - jitter, 1 + jitter] x nominal`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryOptions::default())
    }
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self {
            base_wait: options.base_wait(),
            jitter: options.jitter,
        }
    }
}

/// Outcome of one attempt.
pub enum Attempt<V> {
    /// The call returned a value.
    Success(V),
    /// The call failed with a temporary innermost cause.
    Transient(GraphError),
    /// The call failed in a way retrying cannot fix.
    Permanent(BackendError),
}

impl<V> Attempt<V> {
    /// Classifies the result of one backend call.
    pub fn classify(result: Result<V>) -> Self {
        let err = match result {
            Ok(value) => return Attempt::Success(value),
            Err(err) => err,
        };
        let temporary = innermost_backend_error(&err).map(BackendError::is_temporary);
        match temporary {
            Some(true) => Attempt::Transient(err),
            Some(false) => match err {
                GraphError::Backend(backend) => Attempt::Permanent(backend),
                other => Attempt::Permanent(BackendError::permanent_caused(
                    "permanent failure in storage backend",
                    other,
                )),
            },
            None => Attempt::Permanent(BackendError::permanent_caused(
                "permanent failure in storage backend",
                err,
            )),
        }
    }
}

/// A named backend operation with a total wait budget.
///
/// ```ignore
/// let entries = BackendOperation::new("edgestore.get_slice", Duration::from_secs(10))
///     .execute(|| store.get_slice(&query, tx))?;
/// ```
pub struct BackendOperation {
    name: String,
    total_wait: Duration,
    policy: RetryPolicy,
    clock: Arc<dyn TimestampProvider>,
    interrupt: Interrupt,
    rng: ChaCha8Rng,
    metrics: Option<Arc<dyn StorageMetrics>>,
}

impl BackendOperation {
    /// Creates an operation using the system clock and default policy.
    pub fn new(name: impl Into<String>, total_wait: Duration) -> Self {
        Self {
            name: name.into(),
            total_wait,
            policy: RetryPolicy::default(),
            clock: system_timestamps(),
            interrupt: Interrupt::new(),
            rng: ChaCha8Rng::from_entropy(),
            metrics: None,
        }
    }

    /// Sets the backoff policy.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the clock used for deadlines and sleeping.
    pub fn clock(mut self, clock: Arc<dyn TimestampProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the interrupt handle observed while sleeping.
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Seeds the jitter generator for reproducible waits.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Records retries into `metrics`.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Operation name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `op`, retrying transient failures, and names the operation in terminal errors.
    pub fn execute<V, F>(&mut self, op: F) -> Result<V>
    where
        F: FnMut() -> Result<V>,
    {
        if self.total_wait.is_zero() {
            return Err(GraphError::Invalid("total wait time must be positive"));
        }
        self.execute_direct(op).map_err(|source| GraphError::Operation {
            operation: self.name.clone(),
            source,
        })
    }

    /// Runs `op`, retrying transient failures, and returns the raw backend error.
    pub fn execute_direct<V, F>(&mut self, mut op: F) -> std::result::Result<V, BackendError>
    where
        F: FnMut() -> Result<V>,
    {
        if self.total_wait.is_zero() {
            return Err(BackendError::permanent("total wait time must be positive"));
        }
        let deadline = self.clock.now() + self.total_wait;
        let mut nominal = self.policy.base_wait;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last = match Attempt::classify(op()) {
                Attempt::Success(value) => return Ok(value),
                Attempt::Permanent(err) => return Err(err),
                Attempt::Transient(err) => err,
            };
            let wait = self.jittered(nominal);
            if self.clock.now() + wait >= deadline {
                return Err(BackendError::temporary_caused(
                    format!(
                        "could not successfully complete {} after {attempt} attempts",
                        self.name
                    ),
                    last,
                ));
            }
            info!(
                operation = %self.name,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %last,
                "backend_op.retry"
            );
            if let Some(metrics) = &self.metrics {
                metrics.backend_retry();
            }
            self.clock.sleep(wait, &self.interrupt)?;
            nominal = nominal.saturating_mul(2);
        }
    }

    /// Runs a transactional callback under retry; each attempt opens a fresh transaction.
    pub fn execute_transactional<V, F>(
        &mut self,
        mut exe: F,
        provider: &dyn TransactionalProvider,
        times: &dyn TimestampProvider,
    ) -> Result<V>
    where
        F: FnMut(&mut dyn StoreTransaction) -> Result<V>,
    {
        self.execute(|| execute_transactional(|tx| exe(tx), provider, times))
    }

    fn jittered(&mut self, nominal: Duration) -> Duration {
        let jitter = self.policy.jitter;
        if jitter <= 0.0 {
            return nominal;
        }
        nominal.mul_f64(self.rng.gen_range((1.0 - jitter)..=(1.0 + jitter)))
    }
}

/// Opens transactions for [`execute_transactional`].
pub trait TransactionalProvider {
    /// Opens a new transaction.
    fn open_tx(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Adapts a store manager into a [`TransactionalProvider`].
pub struct ManagerTransactions {
    manager: Arc<dyn KeyColumnValueStoreManager>,
    config: TransactionConfig,
}

impl ManagerTransactions {
    /// Opens every transaction with `config`.
    pub fn new(manager: Arc<dyn KeyColumnValueStoreManager>, config: TransactionConfig) -> Self {
        Self { manager, config }
    }
}

impl TransactionalProvider for ManagerTransactions {
    fn open_tx(&self) -> Result<Box<dyn StoreTransaction>> {
        self.manager.begin_transaction(self.config.clone())
    }
}

/// Runs `exe` inside a transaction: commit on success, roll back on failure.
///
/// The commit time is stamped from `times` only if the transaction has none yet.
pub fn execute_transactional<V, F>(
    exe: F,
    provider: &dyn TransactionalProvider,
    times: &dyn TimestampProvider,
) -> Result<V>
where
    F: FnOnce(&mut dyn StoreTransaction) -> Result<V>,
{
    let mut tx = provider.open_tx()?;
    if !tx.config().has_commit_time() {
        tx.config_mut().set_commit_time(times.time_micros());
    }
    match exe(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback() {
                warn!(tx = tx.id(), error = %rollback, "backend_op.rollback_failed");
            }
            Err(err)
        }
    }
}
