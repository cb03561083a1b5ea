//! Lockers: named mutual-exclusion resources over `(row key, column)` pairs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::kcv::{StaticBuffer, StoreTransaction};
use crate::config::LockingOptions;
use crate::error::{BackendError, Result};
use crate::primitives::time::{system_timestamps, TimestampProvider};

/// A lockable `(key, column)` target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyColumn {
    /// Row key.
    pub key: StaticBuffer,
    /// Column key.
    pub column: StaticBuffer,
}

impl KeyColumn {
    /// Creates a target.
    pub fn new(key: StaticBuffer, column: StaticBuffer) -> Self {
        Self { key, column }
    }
}

/// Lock service for one store; locks are owned by a transaction id.
pub trait Locker: Send + Sync {
    /// Takes (or refreshes) the write lock on `target` for `tx`.
    fn write_lock(&self, target: &KeyColumn, tx: &dyn StoreTransaction) -> Result<()>;
    /// Verifies that every lock requested by `tx` is still held.
    fn check_locks(&self, tx: &dyn StoreTransaction) -> Result<()>;
    /// Releases every lock requested by `tx`.
    fn delete_locks(&self, tx: &dyn StoreTransaction) -> Result<()>;
}

/// Hands out one locker per name.
pub trait LockerProvider: Send + Sync {
    /// Returns the locker called `name`.
    fn locker(&self, name: &str) -> Arc<dyn Locker>;
}

#[derive(Debug, Clone, Copy)]
struct LockRecord {
    owner: u64,
    expires: Instant,
}

#[derive(Default)]
struct LockTable {
    held: HashMap<KeyColumn, LockRecord>,
    requested: FxHashMap<u64, Vec<KeyColumn>>,
}

/// In-process locker with lease expiry.
///
/// Contention with an unexpired lock owned by another transaction is a temporary
/// failure. A lock that expired or was taken over before [`Locker::check_locks`] is a
/// permanent one.
pub struct LocalLocker {
    name: String,
    expiry: Duration,
    clock: Arc<dyn TimestampProvider>,
    table: Mutex<LockTable>,
}

impl LocalLocker {
    /// Creates a locker whose leases last `expiry`.
    pub fn new(name: impl Into<String>, expiry: Duration, clock: Arc<dyn TimestampProvider>) -> Self {
        Self {
            name: name.into(),
            expiry,
            clock,
            table: Mutex::new(LockTable::default()),
        }
    }

    /// Locker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of locks currently recorded, expired or not.
    pub fn held_count(&self) -> usize {
        self.table.lock().held.len()
    }
}

impl Locker for LocalLocker {
    fn write_lock(&self, target: &KeyColumn, tx: &dyn StoreTransaction) -> Result<()> {
        let now = self.clock.now();
        let owner = tx.id();
        let mut table = self.table.lock();
        if let Some(existing) = table.held.get(target) {
            if existing.owner != owner && existing.expires > now {
                debug!(locker = %self.name, owner, holder = existing.owner, "lock.contention");
                return Err(BackendError::temporary(format!(
                    "lock on {}:{} held by transaction {}",
                    hex::encode(&target.key),
                    hex::encode(&target.column),
                    existing.owner
                ))
                .into());
            }
        }
        table.held.insert(
            target.clone(),
            LockRecord {
                owner,
                expires: now + self.expiry,
            },
        );
        let requested = table.requested.entry(owner).or_default();
        if !requested.contains(target) {
            requested.push(target.clone());
        }
        debug!(locker = %self.name, owner, "lock.acquired");
        Ok(())
    }

    fn check_locks(&self, tx: &dyn StoreTransaction) -> Result<()> {
        let now = self.clock.now();
        let owner = tx.id();
        let table = self.table.lock();
        let Some(requested) = table.requested.get(&owner) else {
            return Ok(());
        };
        for target in requested {
            let valid = table
                .held
                .get(target)
                .is_some_and(|record| record.owner == owner && record.expires > now);
            if !valid {
                return Err(BackendError::permanent(format!(
                    "lock on {}:{} expired or was lost",
                    hex::encode(&target.key),
                    hex::encode(&target.column)
                ))
                .into());
            }
        }
        Ok(())
    }

    fn delete_locks(&self, tx: &dyn StoreTransaction) -> Result<()> {
        let owner = tx.id();
        let mut table = self.table.lock();
        if let Some(requested) = table.requested.remove(&owner) {
            for target in requested {
                if table.held.get(&target).is_some_and(|r| r.owner == owner) {
                    table.held.remove(&target);
                }
            }
        }
        Ok(())
    }
}

/// Memoizing provider of [`LocalLocker`]s sharing one clock and lease.
pub struct LocalLockerProvider {
    expiry: Duration,
    clock: Arc<dyn TimestampProvider>,
    lockers: Mutex<HashMap<String, Arc<LocalLocker>>>,
}

impl LocalLockerProvider {
    /// Creates a provider using the system clock.
    pub fn new(expiry: Duration) -> Self {
        Self::with_clock(expiry, system_timestamps())
    }

    /// Creates a provider using `clock`.
    pub fn with_clock(expiry: Duration, clock: Arc<dyn TimestampProvider>) -> Self {
        Self {
            expiry,
            clock,
            lockers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a provider whose lease is `options.lock_expiry()`.
    pub fn from_options(options: &LockingOptions, clock: Arc<dyn TimestampProvider>) -> Self {
        Self::with_clock(options.lock_expiry(), clock)
    }

    /// Lease applied to every lock this provider hands out.
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Returns the concrete locker called `name`.
    pub fn local(&self, name: &str) -> Arc<LocalLocker> {
        self.lockers
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(LocalLocker::new(name, self.expiry, self.clock.clone())))
            .clone()
    }
}

impl LockerProvider for LocalLockerProvider {
    fn locker(&self, name: &str) -> Arc<dyn Locker> {
        self.local(name)
    }
}
