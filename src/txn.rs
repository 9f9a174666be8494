//! Transactional operation runner.
//!
//! Every point operation is its own transaction: begin, operate, commit.
//! When the operation fails the transaction is rolled back and the original
//! error is returned.

use std::sync::Arc;

use crate::backend::{CommitMode, Transaction, TxnClient};
use crate::keys::Namespace;
use crate::{Error, Result};

/// Runs closures inside backend transactions.
#[derive(Clone)]
pub(crate) struct TxnRunner {
    client: Arc<dyn TxnClient>,
}

impl std::fmt::Debug for TxnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnRunner").field("backend", &self.client.name()).finish()
    }
}

impl TxnRunner {
    pub(crate) fn new(client: Arc<dyn TxnClient>) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &Arc<dyn TxnClient> {
        &self.client
    }

    /// Runs `op` in a fresh transaction and commits it.
    pub(crate) fn run<T>(
        &self,
        mode: CommitMode,
        op: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.client.begin(mode)?;
        match op(txn.as_mut()) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    log::warn!("Rollback after failed operation also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    pub(crate) fn get(&self, ns: &Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let physical = ns.physical_key(key);
        self.run(CommitMode::Async, |txn| txn.get(&physical))
    }

    pub(crate) fn has(&self, ns: &Namespace, key: &[u8]) -> Result<bool> {
        Ok(self.get(ns, key)?.is_some())
    }

    pub(crate) fn set(
        &self,
        ns: &Namespace,
        key: &[u8],
        value: &[u8],
        mode: CommitMode,
    ) -> Result<()> {
        check_key(key)?;
        let physical = ns.physical_key(key);
        self.run(mode, |txn| txn.set(physical, value.to_vec()))
    }

    pub(crate) fn delete(&self, ns: &Namespace, key: &[u8], mode: CommitMode) -> Result<()> {
        check_key(key)?;
        let physical = ns.physical_key(key);
        self.run(mode, |txn| txn.delete(physical))
    }

    /// Claims the namespace sentinel.
    ///
    /// Read and write happen in one transaction, so two concurrent claims
    /// conflict at commit and only one of them wins.
    pub(crate) fn claim(&self, ns: &Namespace) -> Result<()> {
        let sentinel = ns.sentinel_key();
        let claimed = self.run(CommitMode::Sync, |txn| {
            if txn.get(&sentinel)?.is_some() {
                return Err(Error::AlreadyInUse(ns.label()));
            }
            txn.set(sentinel.clone(), SENTINEL_VALUE.to_vec())
        });
        match claimed {
            Err(err) if err.is_conflict() => Err(Error::AlreadyInUse(ns.label())),
            other => other,
        }
    }

    /// Releases the namespace sentinel.
    pub(crate) fn release(&self, ns: &Namespace) -> Result<()> {
        let sentinel = ns.sentinel_key();
        self.run(CommitMode::Sync, |txn| txn.delete(sentinel))
    }
}

/// Value stored under a claimed sentinel key.
pub(crate) const SENTINEL_VALUE: &[u8] = b"1";

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}
