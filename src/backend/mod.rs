//! # Backend abstraction
//!
//! prefixkv never talks to a storage engine directly. It consumes a
//! transactional, ordered key-value service through three traits:
//!
//! - [`TxnClient`]: a long-lived, thread-safe handle that starts transactions
//! - [`Transaction`]: a unit of work with point reads, buffered writes and
//!   native cursors
//! - [`RawIterator`]: a backend cursor yielding physical keys in
//!   byte-lexicographic order
//!
//! The native cursors are deliberately primitive: the forward one iterates
//! `[lower, upper)`, the reverse one iterates everything strictly below an
//! exclusive upper bound with no lower bound at all. Neither knows about
//! namespaces; that is the job of [`DBIterator`](crate::DBIterator).
//!
//! Two implementations ship with the crate: [`MemoryBackend`] and, with the
//! `tikv` feature, `TikvClient`.

mod memory;
#[cfg(feature = "tikv")]
mod tikv;

pub use memory::MemoryBackend;
#[cfg(feature = "tikv")]
pub use tikv::TikvClient;

use std::sync::Arc;

use crate::config::{BackendKind, Options};
use crate::Result;

/// How a transaction's commit is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Best-effort commit. Backends with an asynchronous commit protocol use
    /// it; the call still returns the backend's verdict.
    #[default]
    Async,

    /// Commit is fully acknowledged before returning.
    Sync,
}

/// A thread-safe handle to a transactional key-value service.
pub trait TxnClient: Send + Sync {
    /// Starts a new transaction.
    fn begin(&self, mode: CommitMode) -> Result<Box<dyn Transaction>>;

    /// Short backend name, reported by [`DB::stats`](crate::DB::stats).
    fn name(&self) -> &'static str;
}

/// A single unit of work against the backend.
///
/// A transaction must end with [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback).
pub trait Transaction: Send {
    /// Reads `key`. Returns `Ok(None)` if the key does not exist.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffers a write of `value` under `key`.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Buffers a deletion of `key`.
    fn delete(&mut self, key: Vec<u8>) -> Result<()>;

    /// Opens an ascending cursor over `[lower, upper)`.
    ///
    /// Every cursor of one transaction reads the same consistent snapshot,
    /// taken no earlier than the transaction's start. The cursor may outlive
    /// the transaction.
    fn iter(&mut self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn RawIterator>>;

    /// Opens a descending cursor over every key strictly below `upper`.
    fn iter_reverse(&mut self, upper: &[u8]) -> Result<Box<dyn RawIterator>>;

    /// Applies the buffered writes atomically.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the buffered writes.
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A backend cursor.
pub trait RawIterator: Send {
    /// Returns true while the cursor is positioned on an entry.
    fn valid(&self) -> bool;

    /// Returns the current physical key, or an empty slice when invalid.
    fn key(&self) -> &[u8];

    /// Returns the current value, or an empty slice when invalid.
    fn value(&self) -> &[u8];

    /// Moves to the next entry in the cursor's direction.
    fn next(&mut self) -> Result<()>;

    /// Releases the cursor. The cursor is invalid afterwards.
    fn close(&mut self);
}

/// Creates a client for the backend selected in `options`.
pub fn connect(options: &Options) -> Result<Arc<dyn TxnClient>> {
    options.validate()?;
    match options.backend {
        BackendKind::Memory => {
            log::info!("Using in-process memory backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "tikv")]
        BackendKind::Tikv => {
            log::info!("Connecting to TiKV via PD {:?}", options.pd_endpoints);
            Ok(Arc::new(TikvClient::connect(options)?))
        }
        #[cfg(not(feature = "tikv"))]
        BackendKind::Tikv => Err(crate::Error::invalid_argument(
            "the tikv backend requires the `tikv` cargo feature",
        )),
    }
}
