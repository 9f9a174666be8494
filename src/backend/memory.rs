//! # In-process transactional backend
//!
//! `MemoryBackend` keeps every committed version of every key in a lock-free
//! skip list and gives each transaction a snapshot of the store as of its
//! begin timestamp.
//!
//! ## Version ordering
//!
//! Entries are keyed by [`VersionedKey`], ordered by:
//! 1. user key (ascending)
//! 2. commit timestamp (descending - newer first)
//!
//! so a lookup for `(key, ts)` lands on the newest version visible at `ts`.
//! Deletions are stored as `None` tombstones.
//!
//! ## Commit protocol
//!
//! Writes are buffered in the transaction. On commit, under a single commit
//! lock, every written key is checked for a version newer than the
//! transaction's start (first committer wins), the writes are inserted at
//! the next timestamp, and only then is that timestamp published. Readers
//! never see a half-applied commit.
//!
//! ## Version pruning
//!
//! Every open transaction and cursor pins its read timestamp. After each
//! commit, versions of the written keys that no pinned reader can see are
//! removed, and so are tombstones with nothing left underneath them. A key
//! overwritten many times keeps one version once its readers are gone.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use super::{CommitMode, RawIterator, Transaction, TxnClient};
use crate::error::to_hex;
use crate::{Error, Result};

/// A user key tagged with the timestamp of the commit that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionedKey {
    key: Vec<u8>,
    version: u64,
}

impl VersionedKey {
    fn new(key: Vec<u8>, version: u64) -> Self {
        Self { key, version }
    }

    /// Sorts before every stored version of `key`.
    fn newest(key: Vec<u8>) -> Self {
        Self::new(key, u64::MAX)
    }

    /// Sorts after every stored version of `key`.
    fn oldest(key: Vec<u8>) -> Self {
        Self::new(key, 0)
    }
}

impl PartialOrd for VersionedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => other.version.cmp(&self.version),
            other_ordering => other_ordering,
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    /// All versions; `None` marks a deletion.
    data: SkipMap<VersionedKey, Option<Vec<u8>>>,

    /// Timestamp of the last published commit.
    committed: AtomicU64,

    /// Serializes conflict checks and publication.
    commit_lock: Mutex<()>,

    /// Pinned read timestamps and their reference counts.
    readers: Mutex<BTreeMap<u64, usize>>,
}

impl Store {
    fn read_ts(&self) -> u64 {
        self.committed.load(AtomicOrdering::SeqCst)
    }

    /// Pins the latest published timestamp for a new reader.
    fn pin_latest(self: &Arc<Self>) -> ReadPin {
        let mut readers = self.readers.lock();
        let ts = self.read_ts();
        *readers.entry(ts).or_insert(0) += 1;
        ReadPin { store: Arc::clone(self), ts }
    }

    /// Oldest timestamp any reader may still read at.
    fn watermark(&self) -> u64 {
        let readers = self.readers.lock();
        readers.keys().next().copied().unwrap_or_else(|| self.read_ts())
    }

    /// Drops the versions of `key` that are invisible at `watermark` and
    /// every later timestamp. Must be called with the commit lock held.
    fn prune(&self, key: &[u8], watermark: u64) {
        let probe = VersionedKey::new(key.to_vec(), watermark);
        let Some(base) = self.data.lower_bound(Bound::Included(&probe)) else {
            return;
        };
        if base.key().key != key {
            return;
        }

        let older = (
            Bound::Excluded(base.key().clone()),
            Bound::Included(VersionedKey::oldest(key.to_vec())),
        );
        let stale: Vec<VersionedKey> = self.data.range(older).map(|e| e.key().clone()).collect();
        for version in &stale {
            self.data.remove(version);
        }
        if base.value().is_none() {
            base.remove();
        }
    }

    /// Returns the value of `key` visible at `ts`.
    fn read_at(&self, key: &[u8], ts: u64) -> Option<Vec<u8>> {
        let probe = VersionedKey::new(key.to_vec(), ts);
        let entry = self.data.lower_bound(Bound::Included(&probe))?;
        if entry.key().key != key {
            return None;
        }
        entry.value().clone()
    }

    /// Returns the timestamp of the newest version of `key`, tombstones
    /// included.
    fn latest_version(&self, key: &[u8]) -> Option<u64> {
        let probe = VersionedKey::newest(key.to_vec());
        let entry = self.data.lower_bound(Bound::Included(&probe))?;
        (entry.key().key == key).then(|| entry.key().version)
    }

    /// Returns the first live entry at or after `from` and below `upper`.
    fn first_visible(
        &self,
        from: Bound<VersionedKey>,
        upper: &[u8],
        ts: u64,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut bound = from;
        loop {
            let entry = self.data.lower_bound(bound.as_ref())?;
            let key = entry.key().key.clone();
            if key.as_slice() >= upper {
                return None;
            }
            if let Some(value) = self.read_at(&key, ts) {
                return Some((key, value));
            }
            bound = Bound::Excluded(VersionedKey::oldest(key));
        }
    }

    /// Returns the last live entry strictly below `upper`.
    fn last_visible(&self, upper: &[u8], ts: u64) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut bound = VersionedKey::newest(upper.to_vec());
        loop {
            let entry = self.data.upper_bound(Bound::Excluded(&bound))?;
            let key = entry.key().key.clone();
            if let Some(value) = self.read_at(&key, ts) {
                return Some((key, value));
            }
            bound = VersionedKey::newest(key);
        }
    }
}

/// A read timestamp held open by a transaction or cursor.
///
/// Versions visible at `ts` are kept until the pin is dropped.
#[derive(Debug)]
struct ReadPin {
    store: Arc<Store>,
    ts: u64,
}

impl ReadPin {
    fn share(&self) -> ReadPin {
        let mut readers = self.store.readers.lock();
        *readers.entry(self.ts).or_insert(0) += 1;
        ReadPin { store: Arc::clone(&self.store), ts: self.ts }
    }
}

impl Drop for ReadPin {
    fn drop(&mut self) {
        let mut readers = self.store.readers.lock();
        if let Some(count) = readers.get_mut(&self.ts) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&self.ts);
            }
        }
    }
}

/// An in-process, multi-version transactional key-value store.
///
/// Clones share the same store, so several databases can be opened over
/// one keyspace exactly as they would over a TiKV cluster.
///
/// # Example
///
/// ```rust
/// use prefixkv::backend::{CommitMode, MemoryBackend, TxnClient};
///
/// # fn main() -> Result<(), prefixkv::Error> {
/// let backend = MemoryBackend::new();
/// let mut txn = backend.begin(CommitMode::Sync)?;
/// txn.set(b"k".to_vec(), b"v".to_vec())?;
/// txn.commit()?;
///
/// let mut txn = backend.begin(CommitMode::Sync)?;
/// assert_eq!(txn.get(b"k")?, Some(b"v".to_vec()));
/// txn.commit()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Store>,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the timestamp of the last commit that wrote data.
    ///
    /// Read-only and empty transactions do not advance it.
    pub fn last_commit_ts(&self) -> u64 {
        self.store.read_ts()
    }

    /// Returns the number of stored versions, tombstones included.
    ///
    /// Versions no open reader can see are pruned on commit, so this stays
    /// close to the number of live keys.
    pub fn version_count(&self) -> usize {
        self.store.data.len()
    }
}

impl TxnClient for MemoryBackend {
    fn begin(&self, _mode: CommitMode) -> Result<Box<dyn Transaction>> {
        let pin = self.store.pin_latest();
        Ok(Box::new(MemoryTransaction { pin, writes: BTreeMap::new() }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    /// Snapshot the transaction reads at.
    pin: ReadPin,
    /// Pending writes, last write per key wins.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Transaction for MemoryTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.pin.store.read_at(key, self.pin.ts))
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.writes.insert(key, None);
        Ok(())
    }

    fn iter(&mut self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn RawIterator>> {
        let current = self.pin.store.first_visible(
            Bound::Included(VersionedKey::newest(lower.to_vec())),
            upper,
            self.pin.ts,
        );
        Ok(Box::new(MemoryCursor { pin: self.pin.share(), upper: Some(upper.to_vec()), current }))
    }

    fn iter_reverse(&mut self, upper: &[u8]) -> Result<Box<dyn RawIterator>> {
        let current = self.pin.store.last_visible(upper, self.pin.ts);
        Ok(Box::new(MemoryCursor { pin: self.pin.share(), upper: None, current }))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { pin, writes } = *self;
        if writes.is_empty() {
            return Ok(());
        }
        let store = Arc::clone(&pin.store);
        let start_ts = pin.ts;

        let _guard = store.commit_lock.lock();

        for key in writes.keys() {
            if let Some(version) = store.latest_version(key) {
                if version > start_ts {
                    return Err(Error::Conflict(format!(
                        "key {} was committed at {} after start {}",
                        to_hex(key),
                        version,
                        start_ts
                    )));
                }
            }
        }

        let commit_ts = store.read_ts() + 1;
        let count = writes.len();
        let keys: Vec<Vec<u8>> = writes.keys().cloned().collect();
        for (key, value) in writes {
            store.data.insert(VersionedKey::new(key, commit_ts), value);
        }
        store.committed.store(commit_ts, AtomicOrdering::SeqCst);

        drop(pin);
        let watermark = store.watermark();
        for key in &keys {
            store.prune(key, watermark);
        }

        log::debug!("Committed {} writes at ts {}", count, commit_ts);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Lazily walks the store at a fixed read timestamp.
///
/// Forward cursors carry their exclusive upper bound; reverse cursors walk
/// down to the start of the keyspace.
#[derive(Debug)]
struct MemoryCursor {
    pin: ReadPin,
    upper: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl RawIterator for MemoryCursor {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(key, _)| key.as_slice())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(_, value)| value.as_slice())
    }

    fn next(&mut self) -> Result<()> {
        let Some((key, _)) = self.current.take() else {
            return Ok(());
        };
        self.current = match &self.upper {
            Some(upper) => self.pin.store.first_visible(
                Bound::Excluded(VersionedKey::oldest(key)),
                upper,
                self.pin.ts,
            ),
            None => self.pin.store.last_visible(&key, self.pin.ts),
        };
        Ok(())
    }

    fn close(&mut self) {
        self.current = None;
    }
}
