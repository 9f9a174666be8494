//! # prefixkv - Namespaced Databases over a Shared Transactional KV Store
//!
//! prefixkv turns one shared, ordered, transactional keyspace (a TiKV
//! cluster, or the bundled in-process [`MemoryBackend`](backend::MemoryBackend))
//! into many independent databases. Each database owns the keys under its
//! own prefix, `"<dir>/<name>/"`, and claims that prefix exclusively through
//! a sentinel key while it is open.
//!
//! ## Architecture
//!
//! - **Namespace codec** ([`keys`]): logical keys to physical keys, sentinel
//!   keys, namespace bounds
//! - **Backend** ([`backend`]): the transactional client traits and their
//!   implementations
//! - **Operation runner**: every point operation is one begin/commit unit
//! - **Iterator** ([`DBIterator`]): forward and reverse range scans confined
//!   to the namespace
//! - **Batch** ([`WriteBatch`]): ordered writes applied in one transaction
//!
//! ## Example Usage
//!
//! ```rust
//! use prefixkv::{Options, DB};
//!
//! # fn main() -> Result<(), prefixkv::Error> {
//! // Open (and claim) the namespace "chain/state"
//! let db = DB::open("state", "chain", Options::default())?;
//!
//! // Write operations
//! db.set(b"key1", b"value1")?;
//! db.set_sync(b"key2", b"value2")?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Delete operations
//! db.delete(b"key1")?;
//!
//! // Release the namespace
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod backend;
pub mod config;
pub mod error;
pub mod iterator;
pub mod keys;
mod txn;
pub mod write_batch;

// Re-exports
pub use config::{BackendKind, Options};
pub use error::{Error, Result};
pub use iterator::{DBIterator, Direction};
pub use write_batch::{WriteBatch, WriteOp};

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use backend::{CommitMode, TxnClient};
use error::to_hex;
use keys::Namespace;
use parking_lot::RwLock;
use txn::TxnRunner;

/// The main database handle.
///
/// A `DB` owns one namespace of the shared keyspace from a successful
/// [`open`](DB::open) until [`close`](DB::close).
///
/// # Thread Safety
///
/// `DB` is designed to be thread-safe and can be safely shared across threads
/// using `Arc<DB>`. Point operations run concurrently; `close` takes an
/// exclusive lock so it never races with itself.
///
/// # Panics
///
/// Every operation other than `close` panics once the database is closed.
pub struct DB {
    /// Key codec for this database's namespace
    namespace: Namespace,

    /// Backend handle, `None` once closed
    runner: RwLock<Option<TxnRunner>>,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("namespace", &self.namespace.label())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DB {
    /// Opens the database `name` under `dir`, connecting to the backend
    /// selected in `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` or `dir` is empty or contains `/`, or the options are invalid
    /// - the backend cannot be reached
    /// - the namespace is held by another open database ([`Error::AlreadyInUse`])
    ///
    /// # Example
    ///
    /// ```rust
    /// use prefixkv::{Options, DB};
    ///
    /// # fn main() -> Result<(), prefixkv::Error> {
    /// let db = DB::open("accounts", "ledger", Options::default())?;
    /// # db.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(name: &str, dir: &str, options: Options) -> Result<Self> {
        let client = backend::connect(&options)?;
        Self::open_with_client(name, dir, client)
    }

    /// Opens the database `name` under `dir` on an existing client.
    ///
    /// Several databases may share one client; each still claims its own
    /// namespace.
    pub fn open_with_client(name: &str, dir: &str, client: Arc<dyn TxnClient>) -> Result<Self> {
        for (what, value) in [("name", name), ("dir", dir)] {
            if value.is_empty() {
                let msg = format!("database {} must not be empty", what);
                return Err(Error::invalid_argument(msg));
            }
            // A '/' would nest one namespace's prefix inside another's.
            if value.contains('/') {
                return Err(Error::invalid_argument(format!(
                    "database {} '{}' must not contain '/'",
                    what, value
                )));
            }
        }

        let namespace = Namespace::new(dir, name);
        let runner = TxnRunner::new(client);
        runner.claim(&namespace)?;

        log::info!(
            "Opened database {} on {} backend",
            namespace.label(),
            runner.client().name()
        );

        Ok(DB { namespace, runner: RwLock::new(Some(runner)) })
    }

    /// Returns the runner, panicking if the database is closed.
    pub(crate) fn runner(&self) -> TxnRunner {
        match self.runner.read().as_ref() {
            Some(runner) => runner.clone(),
            None => panic!("database {} is closed", self.namespace.label()),
        }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    /// Returns the database directory.
    pub fn dir(&self) -> &str {
        self.namespace.dir()
    }

    /// Returns the physical key prefix, `"<dir>/<name>/"`.
    pub fn prefix(&self) -> &[u8] {
        self.namespace.prefix()
    }

    /// Returns true once [`close`](DB::close) has succeeded.
    pub fn is_closed(&self) -> bool {
        self.runner.read().is_none()
    }

    /// Retrieves the value for a key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use prefixkv::{Options, DB};
    /// # fn main() -> Result<(), prefixkv::Error> {
    /// # let db = DB::open("n", "d", Options::default())?;
    /// db.set(b"key", b"value")?;
    /// assert_eq!(db.get(b"key")?, Some(b"value".to_vec()));
    /// assert_eq!(db.get(b"missing")?, None);
    /// # db.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.runner().get(&self.namespace, key)
    }

    /// Returns true if the key exists.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.runner().has(&self.namespace, key)
    }

    /// Writes a key-value pair using the best-effort commit path.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.runner().set(&self.namespace, key, value, CommitMode::Async)
    }

    /// Writes a key-value pair and waits for a fully acknowledged commit.
    pub fn set_sync(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.runner().set(&self.namespace, key, value, CommitMode::Sync)
    }

    /// Deletes a key using the best-effort commit path.
    ///
    /// Deleting a missing key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.runner().delete(&self.namespace, key, CommitMode::Async)
    }

    /// Deletes a key and waits for a fully acknowledged commit.
    pub fn delete_sync(&self, key: &[u8]) -> Result<()> {
        self.runner().delete(&self.namespace, key, CommitMode::Sync)
    }

    /// Creates an ascending iterator over `[start, end)`.
    ///
    /// `None` leaves that side unbounded. An empty bound is rejected with
    /// [`Error::EmptyBound`].
    pub fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<DBIterator> {
        DBIterator::new(&self.runner(), &self.namespace, start, end, Direction::Forward)
    }

    /// Creates a descending iterator over `[start, end)`.
    pub fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<DBIterator> {
        DBIterator::new(&self.runner(), &self.namespace, start, end, Direction::Reverse)
    }

    /// Creates an empty batch bound to this database.
    pub fn new_batch(&self) -> WriteBatch<'_> {
        // Fail fast on a closed database.
        drop(self.runner());
        WriteBatch::new(self)
    }

    /// Returns backend and namespace information.
    pub fn stats(&self) -> HashMap<String, String> {
        let runner = self.runner();
        let mut stats = HashMap::new();
        stats.insert("database.type".to_string(), runner.client().name().to_string());
        stats.insert(
            "database.prefix".to_string(),
            String::from_utf8_lossy(self.namespace.prefix()).into_owned(),
        );
        stats
    }

    /// Writes every entry of the namespace to `out`, one
    /// `[KEY]:\t[VALUE]` line per entry with both sides in upper-case hex.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "prefix: {}", String::from_utf8_lossy(self.namespace.prefix()))?;

        let mut iter = self.iterator(None, None)?;
        while iter.valid() {
            writeln!(
                out,
                "[{}]:\t[{}]",
                to_hex(iter.key()).to_uppercase(),
                to_hex(iter.value()).to_uppercase()
            )?;
            iter.next();
        }
        match iter.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Releases the namespace and the backend handle.
    ///
    /// The sentinel key is deleted with a synchronous commit. If that fails
    /// the database stays open and `close` can be retried. Closing an
    /// already closed database is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.runner.write();
        let Some(runner) = guard.as_ref() else {
            log::debug!("Database {} already closed", self.namespace.label());
            return Ok(());
        };

        runner.release(&self.namespace)?;
        *guard = None;

        log::info!("Database {} closed successfully", self.namespace.label());
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if self.runner.get_mut().is_some() {
            log::warn!(
                "Database {} dropped without close; its namespace stays claimed",
                self.namespace.label()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{MemoryBackend, RawIterator, Transaction};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn shared() -> Arc<dyn TxnClient> {
        Arc::new(MemoryBackend::new())
    }

    /// Memory backend whose commits fail while `fail_commits` is set.
    struct FaultyBackend {
        inner: MemoryBackend,
        fail_commits: Arc<AtomicBool>,
    }

    struct FaultyTxn {
        inner: Box<dyn Transaction>,
        fail_commits: Arc<AtomicBool>,
    }

    impl TxnClient for FaultyBackend {
        fn begin(&self, mode: CommitMode) -> Result<Box<dyn Transaction>> {
            Ok(Box::new(FaultyTxn {
                inner: self.inner.begin(mode)?,
                fail_commits: Arc::clone(&self.fail_commits),
            }))
        }

        fn name(&self) -> &'static str {
            "faulty"
        }
    }

    impl Transaction for FaultyTxn {
        fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
            self.inner.set(key, value)
        }
        fn delete(&mut self, key: Vec<u8>) -> Result<()> {
            self.inner.delete(key)
        }
        fn iter(&mut self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn RawIterator>> {
            self.inner.iter(lower, upper)
        }
        fn iter_reverse(&mut self, upper: &[u8]) -> Result<Box<dyn RawIterator>> {
            self.inner.iter_reverse(upper)
        }
        fn commit(self: Box<Self>) -> Result<()> {
            if self.fail_commits.load(Ordering::SeqCst) {
                self.inner.rollback()?;
                return Err(Error::backend("commit rejected"));
            }
            self.inner.commit()
        }
        fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback()
        }
    }

    fn faulty() -> (MemoryBackend, Arc<AtomicBool>, Arc<dyn TxnClient>) {
        let inner = MemoryBackend::new();
        let fail_commits = Arc::new(AtomicBool::new(false));
        let client =
            FaultyBackend { inner: inner.clone(), fail_commits: Arc::clone(&fail_commits) };
        (inner, fail_commits, Arc::new(client))
    }

    #[test]
    fn test_db_open() {
        let result = DB::open("n", "d", Options::default());
        assert!(result.is_ok());
        result.unwrap().close().unwrap();
    }

    #[test]
    fn test_db_open_invalid_names() {
        assert!(matches!(DB::open("", "d", Options::default()), Err(Error::InvalidArgument(_))));
        assert!(matches!(DB::open("n", "", Options::default()), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_db_open_rejects_nested_names() {
        let client = shared();
        let outer = DB::open_with_client("n", "d", Arc::clone(&client)).unwrap();

        let nested = DB::open_with_client("n/x", "d", Arc::clone(&client));
        assert!(matches!(nested, Err(Error::InvalidArgument(_))));
        let nested = DB::open_with_client("x", "d/n", Arc::clone(&client));
        assert!(matches!(nested, Err(Error::InvalidArgument(_))));

        let iter = outer.iterator(None, None).unwrap();
        assert!(!iter.valid());
        drop(iter);
        outer.close().unwrap();
    }

    #[test]
    fn test_db_open_dash_split_names_share_sentinel() {
        let client = shared();
        let first = DB::open_with_client("c", "a-b", Arc::clone(&client)).unwrap();

        let second = DB::open_with_client("b-c", "a", Arc::clone(&client));
        assert!(matches!(second, Err(Error::AlreadyInUse(_))));

        first.close().unwrap();
        let second = DB::open_with_client("b-c", "a", client).unwrap();
        second.close().unwrap();
    }

    #[test]
    fn test_db_set_and_get() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();

        db.set(b"key1", b"value1").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));

        // Test non-existent key
        assert_eq!(db.get(b"key2").unwrap(), None);
        assert!(!db.has(b"key2").unwrap());
        db.close().unwrap();
    }

    #[test]
    fn test_db_exclusive_namespace() {
        let client = shared();
        let first = DB::open_with_client("n", "d", Arc::clone(&client)).unwrap();
        let second = DB::open_with_client("n", "d", Arc::clone(&client));
        assert!(matches!(second, Err(Error::AlreadyInUse(_))));

        // A different name in the same dir is independent.
        let other = DB::open_with_client("m", "d", Arc::clone(&client)).unwrap();

        first.close().unwrap();
        let reopened = DB::open_with_client("n", "d", client).unwrap();
        reopened.close().unwrap();
        other.close().unwrap();
    }

    #[test]
    fn test_db_close_twice() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
        db.close().unwrap();
    }

    #[test]
    fn test_db_close_retry_after_failed_release() {
        let (_, fail_commits, client) = faulty();
        let db = DB::open_with_client("n", "d", Arc::clone(&client)).unwrap();

        fail_commits.store(true, Ordering::SeqCst);
        assert!(matches!(db.close(), Err(Error::Backend(_))));
        assert!(!db.is_closed());

        fail_commits.store(false, Ordering::SeqCst);
        db.set(b"still", b"open").unwrap();
        db.close().unwrap();
        assert!(db.is_closed());

        // The sentinel is gone, so the namespace can be claimed again.
        let reopened = DB::open_with_client("n", "d", client).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn test_db_backend_error_passes_through() {
        let (_, fail_commits, client) = faulty();
        let db = DB::open_with_client("n", "d", client).unwrap();
        db.set(b"k", b"old").unwrap();

        fail_commits.store(true, Ordering::SeqCst);
        assert!(matches!(db.set(b"k", b"new"), Err(Error::Backend(_))));
        assert!(matches!(db.delete_sync(b"k"), Err(Error::Backend(_))));

        fail_commits.store(false, Ordering::SeqCst);
        assert_eq!(db.get(b"k").unwrap(), Some(b"old".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_db_failed_batch_keeps_operations() {
        let (backend, fail_commits, client) = faulty();
        let db = DB::open_with_client("n", "d", client).unwrap();

        let mut batch = db.new_batch();
        batch.set(b"a", b"1").unwrap();
        batch.delete(b"b").unwrap();
        let size = batch.approximate_size();

        fail_commits.store(true, Ordering::SeqCst);
        let before = backend.last_commit_ts();
        assert!(matches!(batch.write(), Err(Error::Backend(_))));
        assert!(matches!(batch.write_sync(), Err(Error::Backend(_))));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.approximate_size(), size);
        assert_eq!(backend.last_commit_ts(), before);

        fail_commits.store(false, Ordering::SeqCst);
        assert_eq!(db.get(b"a").unwrap(), None);
        batch.write().unwrap();
        assert!(batch.is_empty());
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));

        drop(batch);
        db.close().unwrap();
    }

    #[test]
    #[should_panic(expected = "is closed")]
    fn test_db_get_after_close_panics() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        db.close().unwrap();
        let _ = db.get(b"key");
    }

    #[test]
    #[should_panic(expected = "is closed")]
    fn test_db_iterator_after_close_panics() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        db.close().unwrap();
        let _ = db.iterator(None, None);
    }

    #[test]
    fn test_db_stats() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        let stats = db.stats();
        assert_eq!(stats.get("database.type").map(String::as_str), Some("memory"));
        assert_eq!(stats.get("database.prefix").map(String::as_str), Some("d/n/"));
        db.close().unwrap();
    }

    #[test]
    fn test_db_dump() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        db.set(&[0x01], &[0xAB]).unwrap();
        db.set(&[0x02], &[0xCD, 0xEF]).unwrap();

        let mut out = Vec::new();
        db.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "prefix: d/n/\n[01]:\t[AB]\n[02]:\t[CDEF]\n");
        db.close().unwrap();
    }

    #[test]
    fn test_db_accessors() {
        let db = DB::open_with_client("n", "d", shared()).unwrap();
        assert_eq!(db.name(), "n");
        assert_eq!(db.dir(), "d");
        assert_eq!(db.prefix(), b"d/n/");
        assert!(!db.is_closed());
        db.close().unwrap();
    }
}
