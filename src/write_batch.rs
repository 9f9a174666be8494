//! WriteBatch provides atomic batch write operations.
//!
//! A WriteBatch records set and delete operations against one namespace and
//! applies them together, in append order, inside a single backend
//! transaction.
//!
//! # Example
//!
//! ```rust
//! use prefixkv::{Options, DB};
//!
//! # fn main() -> Result<(), prefixkv::Error> {
//! let db = DB::open("state", "chain", Options::default())?;
//! let mut batch = db.new_batch();
//!
//! // Add multiple operations to the batch
//! batch.set(b"key1", b"value1")?;
//! batch.set(b"key2", b"value2")?;
//! batch.delete(b"key3")?;
//!
//! // Apply all operations atomically
//! batch.write_sync()?;
//! assert_eq!(db.get(b"key1")?, Some(b"value1".to_vec()));
//! # drop(batch);
//! # db.close()?;
//! # Ok(())
//! # }
//! ```

use crate::backend::CommitMode;
use crate::txn::check_key;
use crate::{Result, DB};

/// Type of write operation in a batch.
///
/// Keys are stored in their physical, prefixed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set operation with key and value
    Set {
        /// Physical key to write
        key: Vec<u8>,
        /// Value to associate with the key
        value: Vec<u8>,
    },
    /// Delete operation with key
    Delete {
        /// Physical key to delete
        key: Vec<u8>,
    },
}

/// WriteBatch accumulates a sequence of write operations to be applied atomically.
///
/// Keys are converted to physical form when an operation is appended, so
/// later changes to the caller's buffers have no effect. A batch is cleared
/// after a successful write and can be reused. It is not meant to be shared
/// between threads.
#[derive(Debug)]
pub struct WriteBatch<'a> {
    db: &'a DB,
    operations: Vec<WriteOp>,
    approximate_size: usize,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(db: &'a DB) -> Self {
        Self { db, operations: Vec::new(), approximate_size: 0 }
    }

    /// Adds a Set operation to the batch.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        let key = self.db.namespace().physical_key(key);
        self.approximate_size += key.len() + value.len() + 8; // Approximate overhead
        self.operations.push(WriteOp::Set { key, value: value.to_vec() });
        Ok(())
    }

    /// Adds a Delete operation to the batch.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let key = self.db.namespace().physical_key(key);
        self.approximate_size += key.len() + 4; // Approximate overhead
        self.operations.push(WriteOp::Delete { key });
        Ok(())
    }

    /// Applies the batch using the best-effort commit path.
    ///
    /// Like [`write_sync`](WriteBatch::write_sync), this returns only after
    /// the backend has acknowledged the commit.
    pub fn write(&mut self) -> Result<()> {
        self.apply(CommitMode::Async)
    }

    /// Applies the batch and waits for a fully acknowledged commit.
    pub fn write_sync(&mut self) -> Result<()> {
        self.apply(CommitMode::Sync)
    }

    fn apply(&mut self, mode: CommitMode) -> Result<()> {
        let runner = self.db.runner();
        if self.operations.is_empty() {
            return Ok(());
        }

        let operations = &self.operations;
        runner.run(mode, |txn| {
            for op in operations {
                match op {
                    WriteOp::Set { key, value } => txn.set(key.clone(), value.clone())?,
                    WriteOp::Delete { key } => txn.delete(key.clone())?,
                }
            }
            Ok(())
        })?;

        log::debug!(
            "Applied batch of {} operations to {}",
            self.operations.len(),
            self.db.namespace().label()
        );
        self.clear();
        Ok(())
    }

    /// Discards the pending operations without touching the backend.
    pub fn close(&mut self) {
        self.clear();
    }

    /// Clears all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the approximate size of the batch in bytes.
    ///
    /// This is an estimate and may not reflect the exact memory usage.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Returns an iterator over the operations in the batch.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }
}
