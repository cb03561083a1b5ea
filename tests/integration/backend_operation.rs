#![allow(missing_docs)]

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use sombra_kcv::{
    primitives::time::{ManualClock, TimestampProvider},
    storage::{
        execute_transactional, BackendOperation, CounterMetrics, InMemoryStoreManager,
        ManagerTransactions, RetryPolicy, StoreTransaction, TransactionConfig,
        TransactionalProvider,
    },
    BackendError, GraphError, Result,
};

#[test]
fn transient_failures_are_retried_until_success() -> Result<()> {
    let clock = Arc::new(ManualClock::new());
    let metrics = Arc::new(CounterMetrics::default());
    let mut calls = 0;
    let value = BackendOperation::new("edgestore.get_slice", Duration::from_secs(10))
        .clock(clock.clone())
        .metrics(metrics.clone())
        .seed(7)
        .execute(|| {
            calls += 1;
            if calls <= 3 {
                Err(BackendError::temporary("timeout").into())
            } else {
                Ok("row")
            }
        })?;
    assert_eq!(value, "row");
    assert_eq!(calls, 4);
    assert_eq!(clock.sleeps().len(), 3);
    assert_eq!(metrics.retries(), 3);
    Ok(())
}

#[test]
fn permanent_failure_names_the_operation() {
    let mut calls = 0;
    let err = BackendOperation::new("edgestore.mutate", Duration::from_secs(10))
        .clock(Arc::new(ManualClock::new()))
        .execute(|| -> Result<()> {
            calls += 1;
            Err(BackendError::permanent("schema mismatch").into())
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert!(!err.is_temporary());
    assert!(matches!(err, GraphError::Operation { ref operation, .. } if operation == "edgestore.mutate"));
}

#[test]
fn exhausted_budget_surfaces_a_temporary_failure() {
    let clock = Arc::new(ManualClock::new());
    let err = BackendOperation::new("op", Duration::from_millis(300))
        .clock(clock.clone())
        .policy(RetryPolicy {
            base_wait: Duration::from_millis(50),
            jitter: 0.0,
        })
        .execute(|| -> Result<()> { Err(BackendError::temporary("busy").into()) })
        .unwrap_err();
    assert!(err.is_temporary());
    // 50 + 100 fit the budget; the next 200 ms wait would cross it.
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(50), Duration::from_millis(100)]
    );
}

proptest! {
    #[test]
    fn waits_stay_within_jitter_bounds(seed in any::<u64>()) {
        let clock = Arc::new(ManualClock::new());
        let mut calls = 0;
        let result = BackendOperation::new("op", Duration::from_secs(100))
            .clock(clock.clone())
            .policy(RetryPolicy { base_wait: Duration::from_millis(50), jitter: 0.2 })
            .seed(seed)
            .execute(|| -> Result<u32> {
                calls += 1;
                if calls <= 5 {
                    Err(BackendError::temporary("busy").into())
                } else {
                    Ok(calls)
                }
            });
        prop_assert_eq!(result.ok(), Some(6));
        let sleeps = clock.sleeps();
        prop_assert_eq!(sleeps.len(), 5);
        for (k, wait) in sleeps.iter().enumerate() {
            let nominal = 0.05 * f64::from(1u32 << k);
            let secs = wait.as_secs_f64();
            prop_assert!(secs >= nominal * 0.8 - 1e-9, "wait {} below bound {}", secs, nominal * 0.8);
            prop_assert!(secs <= nominal * 1.2 + 1e-9, "wait {} above bound {}", secs, nominal * 1.2);
        }
    }
}

#[derive(Debug)]
struct RecordingTx {
    id: u64,
    config: TransactionConfig,
    log: Arc<Mutex<Vec<(u64, &'static str)>>>,
}

impl StoreTransaction for RecordingTx {
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
        self.log.lock().push((self.id, "commit"));
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.log.lock().push((self.id, "rollback"));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct RecordingProvider {
    opened: Mutex<u64>,
    config: TransactionConfig,
    log: Arc<Mutex<Vec<(u64, &'static str)>>>,
}

impl TransactionalProvider for RecordingProvider {
    fn open_tx(&self) -> Result<Box<dyn StoreTransaction>> {
        let mut opened = self.opened.lock();
        *opened += 1;
        Ok(Box::new(RecordingTx {
            id: *opened,
            config: self.config.clone(),
            log: self.log.clone(),
        }))
    }
}

#[test]
fn transactional_callbacks_commit_or_roll_back() -> Result<()> {
    let clock = ManualClock::new();
    let provider = RecordingProvider::default();
    let stamped = execute_transactional(|tx| Ok(tx.config().get_commit_time()), &provider, &clock)?;
    assert_eq!(stamped, Some(clock.time_micros()));

    let err = execute_transactional(
        |_| -> Result<()> { Err(GraphError::Corruption("bad row".into())) },
        &provider,
        &clock,
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::Corruption(_)));
    assert_eq!(*provider.log.lock(), vec![(1, "commit"), (2, "rollback")]);

    let preset = RecordingProvider {
        config: TransactionConfig::new().commit_time(42),
        ..RecordingProvider::default()
    };
    let kept = execute_transactional(|tx| Ok(tx.config().get_commit_time()), &preset, &clock)?;
    assert_eq!(kept, Some(42));
    Ok(())
}

#[test]
fn transactional_retries_open_a_fresh_transaction_per_attempt() -> Result<()> {
    let clock = Arc::new(ManualClock::new());
    let provider = RecordingProvider::default();
    let mut attempts = 0;
    BackendOperation::new("edgestore.mutate", Duration::from_secs(10))
        .clock(clock.clone())
        .execute_transactional(
            |_| {
                attempts += 1;
                if attempts == 1 {
                    Err(BackendError::temporary("lock contention").into())
                } else {
                    Ok(())
                }
            },
            &provider,
            &*clock,
        )?;
    assert_eq!(*provider.log.lock(), vec![(1, "rollback"), (2, "commit")]);

    let managed = ManagerTransactions::new(Arc::new(InMemoryStoreManager::new()), TransactionConfig::new());
    let id = execute_transactional(|tx| Ok(tx.id()), &managed, &*clock)?;
    assert_eq!(id, 1);
    Ok(())
}
