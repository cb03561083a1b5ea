//! The key-column-value store contract consumed by the query and locking layers.
//!
//! Rows are keyed by byte strings; columns within a row are kept in byte order. A
//! [`SliceQuery`] reads the half-open column range `[start, end)` of one row.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Immutable, cheaply cloneable byte buffer.
pub type StaticBuffer = Bytes;

/// One column/value pair of a row.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Column key.
    pub column: StaticBuffer,
    /// Column value.
    pub value: StaticBuffer,
}

impl Entry {
    /// Creates an entry.
    pub fn new(column: impl Into<StaticBuffer>, value: impl Into<StaticBuffer>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("column", &hex::encode(&self.column))
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// Ordered column range `[start, end)` plus an optional result limit.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SliceQuery {
    start: StaticBuffer,
    end: StaticBuffer,
    limit: Option<usize>,
}

impl SliceQuery {
    /// Creates an unlimited slice.
    pub fn new(start: impl Into<StaticBuffer>, end: impl Into<StaticBuffer>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            limit: None,
        }
    }

    /// Returns a copy with `limit` applied (`None` removes the limit).
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Inclusive lower column bound.
    pub fn start(&self) -> &StaticBuffer {
        &self.start
    }

    /// Exclusive upper column bound.
    pub fn end(&self) -> &StaticBuffer {
        &self.end
    }

    /// Maximum number of entries to return.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns true when a limit is set.
    pub fn has_limit(&self) -> bool {
        self.limit.is_some()
    }

    /// Returns true when `column` falls inside the range.
    pub fn contains(&self, column: &[u8]) -> bool {
        self.start.as_ref() <= column && column < self.end.as_ref()
    }

    /// Returns true when every entry `other` can return is also returned by `self`.
    pub fn subsumes(&self, other: &SliceQuery) -> bool {
        if self.start > other.start || other.end > self.end {
            return false;
        }
        match (self.limit, other.limit) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => theirs <= mine,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Debug for SliceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceQuery")
            .field("start", &hex::encode(&self.start))
            .field("end", &hex::encode(&self.end))
            .field("limit", &self.limit)
            .finish()
    }
}

/// A slice query against one row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeySliceQuery {
    /// Row key.
    pub key: StaticBuffer,
    /// Column range.
    pub slice: SliceQuery,
}

impl KeySliceQuery {
    /// Creates a keyed slice.
    pub fn new(key: impl Into<StaticBuffer>, slice: SliceQuery) -> Self {
        Self {
            key: key.into(),
            slice,
        }
    }
}

/// Additions and deletions for one row. Deletions apply before additions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KcvMutation {
    additions: Vec<Entry>,
    deletions: Vec<StaticBuffer>,
}

impl KcvMutation {
    /// Creates a mutation from explicit lists.
    pub fn new(additions: Vec<Entry>, deletions: Vec<StaticBuffer>) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    /// Queues an addition.
    pub fn addition(&mut self, entry: Entry) {
        self.additions.push(entry);
    }

    /// Queues a deletion.
    pub fn deletion(&mut self, column: StaticBuffer) {
        self.deletions.push(column);
    }

    /// Entries to add.
    pub fn additions(&self) -> &[Entry] {
        &self.additions
    }

    /// Columns to delete.
    pub fn deletions(&self) -> &[StaticBuffer] {
        &self.deletions
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    /// Appends another mutation's additions and deletions.
    pub fn merge(&mut self, other: KcvMutation) {
        self.additions.extend(other.additions);
        self.deletions.extend(other.deletions);
    }

    /// Keeps the last addition per column and drops deletions of re-added columns.
    pub fn consolidate(&mut self) {
        let mut last: BTreeMap<StaticBuffer, Entry> = BTreeMap::new();
        for entry in self.additions.drain(..) {
            last.insert(entry.column.clone(), entry);
        }
        let mut deletions: Vec<StaticBuffer> = self
            .deletions
            .drain(..)
            .filter(|col| !last.contains_key(col))
            .collect();
        deletions.sort();
        deletions.dedup();
        self.additions = last.into_values().collect();
        self.deletions = deletions;
    }

    /// Returns true when no column is both added and deleted or added twice.
    pub fn is_consolidated(&self) -> bool {
        let mut added: Vec<&StaticBuffer> = self.additions.iter().map(|e| &e.column).collect();
        added.sort();
        let before = added.len();
        added.dedup();
        before == added.len()
            && self
                .deletions
                .iter()
                .all(|col| added.binary_search(&col).is_err())
    }
}

/// Store name -> row key -> mutation.
pub type MutationBatch = BTreeMap<String, BTreeMap<StaticBuffer, KcvMutation>>;

/// Options a transaction is opened with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    commit_time: Option<u64>,
    group_name: Option<String>,
    custom_options: BTreeMap<String, String>,
}

impl TransactionConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the commit time in microseconds.
    pub fn commit_time(mut self, micros: u64) -> Self {
        self.commit_time = Some(micros);
        self
    }

    /// Sets the metrics group name.
    pub fn group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }

    /// Adds a backend-specific option.
    pub fn custom_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_options.insert(key.into(), value.into());
        self
    }

    /// Returns the commit time, if set.
    pub fn get_commit_time(&self) -> Option<u64> {
        self.commit_time
    }

    /// Returns true when a commit time is set.
    pub fn has_commit_time(&self) -> bool {
        self.commit_time.is_some()
    }

    /// Sets the commit time in place.
    pub fn set_commit_time(&mut self, micros: u64) {
        self.commit_time = Some(micros);
    }

    /// Returns the metrics group name, if set.
    pub fn get_group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    /// Returns a backend-specific option.
    pub fn get_custom_option(&self, key: &str) -> Option<&str> {
        self.custom_options.get(key).map(String::as_str)
    }

    /// All backend-specific options.
    pub fn custom_options(&self) -> &BTreeMap<String, String> {
        &self.custom_options
    }

    /// Returns a copy whose custom options are overridden by `required`.
    pub fn merged_with(&self, required: &BTreeMap<String, String>) -> Self {
        let mut merged = self.clone();
        for (key, value) in required {
            merged.custom_options.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Capabilities advertised by a store manager.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreFeatures {
    /// Ordered column scans are supported.
    pub ordered_scan: bool,
    /// Unordered scans are supported.
    pub unordered_scan: bool,
    /// `mutate_many` applies a whole batch in one call.
    pub batch_mutation: bool,
    /// Consistent locking is supported.
    pub locking: bool,
    /// Key-consistent transactions are supported.
    pub key_consistent: bool,
    /// Options a transaction must carry to be key-consistent.
    pub key_consistent_tx_config: BTreeMap<String, String>,
}

impl StoreFeatures {
    /// Sets ordered-scan support.
    pub fn ordered_scan(mut self, enabled: bool) -> Self {
        self.ordered_scan = enabled;
        self
    }

    /// Sets unordered-scan support.
    pub fn unordered_scan(mut self, enabled: bool) -> Self {
        self.unordered_scan = enabled;
        self
    }

    /// Sets batch-mutation support.
    pub fn batch_mutation(mut self, enabled: bool) -> Self {
        self.batch_mutation = enabled;
        self
    }

    /// Sets locking support.
    pub fn locking(mut self, enabled: bool) -> Self {
        self.locking = enabled;
        self
    }

    /// Sets key-consistency support.
    pub fn key_consistent(mut self, enabled: bool) -> Self {
        self.key_consistent = enabled;
        self
    }

    /// Adds an option required for key-consistent transactions.
    pub fn key_consistent_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_consistent_tx_config.insert(key.into(), value.into());
        self
    }
}

/// A backend transaction handle.
pub trait StoreTransaction: Send + fmt::Debug {
    /// Identifier unique within the issuing manager.
    fn id(&self) -> u64;
    /// Configuration the transaction was opened with.
    fn config(&self) -> &TransactionConfig;
    /// Mutable access to the configuration, used to stamp commit times.
    fn config_mut(&mut self) -> &mut TransactionConfig;
    /// Commits the transaction.
    fn commit(&mut self) -> Result<()>;
    /// Rolls the transaction back.
    fn rollback(&mut self) -> Result<()>;
    /// Upcast for downcasting to a concrete transaction type.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting to a concrete transaction type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One named column family.
pub trait KeyColumnValueStore: Send + Sync {
    /// Store name.
    fn name(&self) -> &str;

    /// Reads a column range of one row in column order.
    fn get_slice(&self, query: &KeySliceQuery, tx: &dyn StoreTransaction) -> Result<Vec<Entry>>;

    /// Applies deletions then additions to one row.
    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        tx: &mut dyn StoreTransaction,
    ) -> Result<()>;

    /// Locks `(key, column)` for `tx`, expecting the column to hold `expected` (absent when `None`).
    fn acquire_lock(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        expected: Option<&StaticBuffer>,
        tx: &mut dyn StoreTransaction,
    ) -> Result<()>;
}

/// Opens stores and transactions of one backend.
pub trait KeyColumnValueStoreManager: Send + Sync {
    /// Manager name, for logs.
    fn name(&self) -> &str;

    /// Opens (or returns the already open) store called `name`.
    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>>;

    /// Applies a batch of mutations across stores.
    fn mutate_many(&self, batch: &MutationBatch, tx: &mut dyn StoreTransaction) -> Result<()>;

    /// Starts a transaction.
    fn begin_transaction(&self, config: TransactionConfig) -> Result<Box<dyn StoreTransaction>>;

    /// Advertised capabilities.
    fn features(&self) -> StoreFeatures;

    /// Releases backend resources.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> StaticBuffer {
        StaticBuffer::copy_from_slice(bytes)
    }

    #[test]
    fn consolidate_drops_deletions_of_added_columns() {
        let mut mutation = KcvMutation::new(
            vec![Entry::new(buf(b"a"), buf(b"1")), Entry::new(buf(b"a"), buf(b"2"))],
            vec![buf(b"a"), buf(b"b"), buf(b"b")],
        );
        assert!(!mutation.is_consolidated());
        mutation.consolidate();
        assert!(mutation.is_consolidated());
        assert_eq!(mutation.additions(), &[Entry::new(buf(b"a"), buf(b"2"))]);
        assert_eq!(mutation.deletions(), &[buf(b"b")]);
    }

    #[test]
    fn subsumes_respects_range_and_limit() {
        let wide = SliceQuery::new(buf(&[0x00]), buf(&[0x10]));
        let narrow = SliceQuery::new(buf(&[0x02]), buf(&[0x05])).with_limit(Some(5));
        assert!(wide.subsumes(&narrow));
        assert!(!narrow.subsumes(&wide));
        let limited = wide.clone().with_limit(Some(3));
        assert!(!limited.subsumes(&narrow));
        assert!(wide.contains(&[0x0F, 0xFF]));
        assert!(!wide.contains(&[0x10]));
    }

    #[test]
    fn merged_config_prefers_required_options() {
        let required: BTreeMap<String, String> =
            [("consistency".to_string(), "quorum".to_string())].into();
        let config = TransactionConfig::new()
            .custom_option("consistency", "one")
            .custom_option("timeout", "5");
        let merged = config.merged_with(&required);
        assert_eq!(merged.get_custom_option("consistency"), Some("quorum"));
        assert_eq!(merged.get_custom_option("timeout"), Some("5"));
    }
}
