//! Database iterator for scanning a namespace.
//!
//! A [`DBIterator`] turns a logical range `[start, end)` into calls against
//! the backend's native cursors, which know nothing about namespaces:
//!
//! - ascending scans drive `iter(lower, upper)` with both bounds translated
//!   into physical keys;
//! - descending scans drive `iter_reverse(origin)`, which has no lower bound
//!   and may run into neighbouring namespaces, so the start bound is checked
//!   on every step.
//!
//! Every position is checked, in order, against the range bound, the
//! cursor's liveness and the namespace prefix. A key outside the prefix is a
//! consistency violation: it is recorded as [`Error::InvalidKey`] and ends
//! the iteration.

use crate::backend::{CommitMode, RawIterator};
use crate::keys::Namespace;
use crate::txn::TxnRunner;
use crate::{Error, Result};

/// Iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// A cursor over the key-value pairs of one namespace.
///
/// The cursor is single use and not meant to be shared between threads.
/// It becomes permanently invalid once exhausted, errored or closed.
///
/// # Example
///
/// ```rust
/// use prefixkv::{Options, DB};
///
/// # fn main() -> Result<(), prefixkv::Error> {
/// let db = DB::open("state", "chain", Options::default())?;
/// db.set(b"key1", b"value1")?;
/// db.set(b"key2", b"value2")?;
///
/// let mut iter = db.iterator(None, None)?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key(), iter.value());
///     iter.next();
/// }
/// assert!(iter.error().is_none());
/// # db.close()?;
/// # Ok(())
/// # }
/// ```
pub struct DBIterator {
    /// Backend cursor, `None` once closed
    source: Option<Box<dyn RawIterator>>,

    /// Namespace every key must belong to
    namespace: Namespace,

    /// Logical bounds as given by the caller
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,

    /// Physical bounds: inclusive lower, exclusive upper
    lower: Vec<u8>,
    upper: Vec<u8>,

    direction: Direction,
    is_valid: bool,
    err: Option<Error>,
}

impl std::fmt::Debug for DBIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBIterator")
            .field("namespace", &self.namespace.label())
            .field("direction", &self.direction)
            .field("valid", &self.is_valid)
            .field("err", &self.err)
            .finish()
    }
}

impl DBIterator {
    /// Creates an iterator over `[start, end)` of `ns`.
    ///
    /// The backend cursor is opened inside its own transaction, which is
    /// committed as soon as the cursor exists.
    pub(crate) fn new(
        runner: &TxnRunner,
        ns: &Namespace,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        direction: Direction,
    ) -> Result<Self> {
        if start.is_some_and(<[u8]>::is_empty) || end.is_some_and(<[u8]>::is_empty) {
            return Err(Error::EmptyBound);
        }

        let lower = start.map_or_else(|| ns.prefix().to_vec(), |s| ns.physical_key(s));
        let upper = end.map_or_else(|| ns.upper_bound().to_vec(), |e| ns.physical_key(e));

        let source = runner.run(CommitMode::Async, |txn| match direction {
            Direction::Forward => txn.iter(&lower, &upper),
            Direction::Reverse => {
                let source = txn.iter_reverse(&upper)?;
                if source.valid() || end.is_none() {
                    return Ok(source);
                }
                // Nothing below the requested end: retry from the namespace
                // upper bound and let the bound checks trim the result.
                let mut source = source;
                source.close();
                log::debug!("Reverse scan origin empty, retrying from namespace bound");
                txn.iter_reverse(ns.upper_bound())
            }
        })?;

        let mut iter = Self {
            source: Some(source),
            namespace: ns.clone(),
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
            lower,
            upper,
            direction,
            is_valid: true,
            err: None,
        };
        iter.settle();
        Ok(iter)
    }

    /// Re-evaluates the current position, skipping entries that must not be
    /// exposed.
    fn settle(&mut self) {
        loop {
            let Some(source) = self.source.as_mut() else {
                self.is_valid = false;
                return;
            };

            if !self.is_valid || self.err.is_some() || !source.valid() {
                self.is_valid = false;
                return;
            }

            let key = source.key();
            let in_bound = match self.direction {
                Direction::Forward => key < self.upper.as_slice(),
                Direction::Reverse => key >= self.lower.as_slice(),
            };
            if !in_bound {
                self.is_valid = false;
                return;
            }

            let Some(logical) = self.namespace.logical_key(key) else {
                let err = Error::invalid_key(key, self.namespace.prefix());
                log::warn!("Iterator stopped: {}", err);
                self.err = Some(err);
                self.is_valid = false;
                return;
            };

            // A reverse scan that fell back to the namespace bound may start
            // above the requested end; the prefix itself is the reserved
            // empty logical key.
            let above_end = self.direction == Direction::Reverse && key >= self.upper.as_slice();
            if !above_end && !logical.is_empty() {
                return;
            }

            if let Err(err) = source.next() {
                self.err = Some(err);
                self.is_valid = false;
                return;
            }
        }
    }

    /// Returns true if the iterator is positioned at a valid entry.
    pub fn valid(&self) -> bool {
        self.is_valid
    }

    /// Returns the logical key at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid. Call `valid()` first to check.
    pub fn key(&self) -> &[u8] {
        let source = self.assert_valid();
        self.namespace.logical_key(source.key()).unwrap_or_default()
    }

    /// Returns the value at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid. Call `valid()` first to check.
    pub fn value(&self) -> &[u8] {
        self.assert_valid().value()
    }

    /// Moves to the next entry in the iterator's direction.
    ///
    /// A backend failure makes the iterator invalid; check `error()`.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn next(&mut self) {
        self.assert_valid();
        if let Some(source) = self.source.as_mut() {
            if let Err(err) = source.next() {
                self.err = Some(err);
                self.is_valid = false;
                return;
            }
        }
        self.settle();
    }

    /// Returns the error that stopped the iteration, if any.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Takes the recorded error out of the iterator.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    /// Returns the logical bounds the iterator was created with.
    pub fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        (self.start.as_deref(), self.end.as_deref())
    }

    /// Returns the iteration direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Releases the backend cursor. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.is_valid = false;
    }

    fn assert_valid(&self) -> &dyn RawIterator {
        match self.source.as_deref() {
            Some(source) if self.is_valid => source,
            _ => panic!("Iterator not valid"),
        }
    }
}

impl Drop for DBIterator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Transaction, TxnClient};
    use std::sync::Arc;

    fn setup(keys: &[&[u8]]) -> (TxnRunner, Namespace) {
        let backend = MemoryBackend::new();
        let runner = TxnRunner::new(Arc::new(backend));
        let ns = Namespace::new("d", "n");
        runner
            .run(CommitMode::Sync, |txn| {
                for key in keys {
                    txn.set(ns.physical_key(key), key.to_vec())?;
                }
                Ok(())
            })
            .unwrap();
        (runner, ns)
    }

    fn drain(mut iter: DBIterator) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while iter.valid() {
            assert_eq!(iter.key(), iter.value());
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert!(iter.error().is_none());
        keys
    }

    fn keys(list: &[&[u8]]) -> Vec<Vec<u8>> {
        list.iter().map(|k| k.to_vec()).collect()
    }

    #[test]
    fn test_forward_range() {
        let (runner, ns) = setup(&[b"a", b"b", b"c", b"d"]);
        let iter =
            DBIterator::new(&runner, &ns, Some(b"b"), Some(b"d"), Direction::Forward).unwrap();
        assert_eq!(drain(iter), keys(&[b"b", b"c"]));
    }

    #[test]
    fn test_reverse_range() {
        let (runner, ns) = setup(&[b"a", b"b", b"c", b"d"]);
        let iter =
            DBIterator::new(&runner, &ns, Some(b"b"), Some(b"d"), Direction::Reverse).unwrap();
        assert_eq!(drain(iter), keys(&[b"c", b"b"]));
    }

    #[test]
    fn test_unbounded_both_directions() {
        let (runner, ns) = setup(&[b"a", b"b", b"c"]);
        let forward = DBIterator::new(&runner, &ns, None, None, Direction::Forward).unwrap();
        assert_eq!(drain(forward), keys(&[b"a", b"b", b"c"]));
        let reverse = DBIterator::new(&runner, &ns, None, None, Direction::Reverse).unwrap();
        assert_eq!(drain(reverse), keys(&[b"c", b"b", b"a"]));
    }

    #[test]
    fn test_empty_bound_rejected() {
        let (runner, ns) = setup(&[]);
        for direction in [Direction::Forward, Direction::Reverse] {
            let err = DBIterator::new(&runner, &ns, Some(b""), None, direction).unwrap_err();
            assert!(matches!(err, Error::EmptyBound));
            let err = DBIterator::new(&runner, &ns, None, Some(b""), direction).unwrap_err();
            assert!(matches!(err, Error::EmptyBound));
        }
    }

    #[test]
    fn test_skips_prefix_key() {
        let (runner, ns) = setup(&[b"a"]);
        runner
            .run(CommitMode::Sync, |txn| txn.set(ns.prefix().to_vec(), b"reserved".to_vec()))
            .unwrap();

        let forward = DBIterator::new(&runner, &ns, None, None, Direction::Forward).unwrap();
        assert_eq!(drain(forward), keys(&[b"a"]));
        let reverse = DBIterator::new(&runner, &ns, None, None, Direction::Reverse).unwrap();
        assert_eq!(drain(reverse), keys(&[b"a"]));
    }

    #[test]
    fn test_reverse_end_past_last_key() {
        let (runner, ns) = setup(&[b"a", b"b"]);
        let iter = DBIterator::new(&runner, &ns, None, Some(b"zzz"), Direction::Reverse).unwrap();
        assert_eq!(drain(iter), keys(&[b"b", b"a"]));
    }

    #[test]
    fn test_reverse_fallback_keeps_end_exclusive() {
        // Nothing in the whole keyspace sorts below "d/n/c", so the first
        // reverse cursor is empty and the fallback starts above the end.
        let (runner, ns) = setup(&[b"m", b"x"]);
        let iter = DBIterator::new(&runner, &ns, None, Some(b"c"), Direction::Reverse).unwrap();
        assert!(drain(iter).is_empty());

        let iter = DBIterator::new(&runner, &ns, None, Some(b"n"), Direction::Reverse).unwrap();
        assert_eq!(drain(iter), keys(&[b"m"]));
    }

    #[test]
    fn test_reverse_stops_at_neighbour_namespace() {
        let (runner, ns) = setup(&[b"a"]);
        runner
            .run(CommitMode::Sync, |txn| txn.set(b"d/m/x".to_vec(), b"other".to_vec()))
            .unwrap();
        let iter = DBIterator::new(&runner, &ns, None, None, Direction::Reverse).unwrap();
        assert_eq!(drain(iter), keys(&[b"a"]));
    }

    #[test]
    fn test_domain_and_close() {
        let (runner, ns) = setup(&[b"a", b"b"]);
        let mut iter = DBIterator::new(&runner, &ns, Some(b"a"), None, Direction::Forward).unwrap();
        assert_eq!(iter.domain(), (Some(&b"a"[..]), None));
        assert_eq!(iter.direction(), Direction::Forward);
        assert!(iter.valid());
        iter.close();
        assert!(!iter.valid());
        iter.close();
    }

    #[test]
    #[should_panic(expected = "Iterator not valid")]
    fn test_key_on_exhausted_iterator_panics() {
        let (runner, ns) = setup(&[]);
        let iter = DBIterator::new(&runner, &ns, None, None, Direction::Forward).unwrap();
        iter.key();
    }

    /// Backend whose cursors return a fixed, possibly bogus, key list.
    struct ScriptedBackend {
        keys: Vec<Vec<u8>>,
    }

    struct ScriptedTxn {
        keys: Vec<Vec<u8>>,
    }

    struct ScriptedCursor {
        keys: Vec<Vec<u8>>,
        pos: usize,
    }

    impl TxnClient for ScriptedBackend {
        fn begin(&self, _mode: CommitMode) -> Result<Box<dyn Transaction>> {
            Ok(Box::new(ScriptedTxn { keys: self.keys.clone() }))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    impl Transaction for ScriptedTxn {
        fn get(&mut self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn set(&mut self, _key: Vec<u8>, _value: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn delete(&mut self, _key: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn iter(&mut self, _lower: &[u8], _upper: &[u8]) -> Result<Box<dyn RawIterator>> {
            Ok(Box::new(ScriptedCursor { keys: self.keys.clone(), pos: 0 }))
        }
        fn iter_reverse(&mut self, _upper: &[u8]) -> Result<Box<dyn RawIterator>> {
            Err(Error::backend("reverse scans unavailable"))
        }
        fn commit(self: Box<Self>) -> Result<()> {
            Ok(())
        }
        fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl RawIterator for ScriptedCursor {
        fn valid(&self) -> bool {
            self.pos < self.keys.len()
        }
        fn key(&self) -> &[u8] {
            self.keys.get(self.pos).map_or(&[][..], |k| k.as_slice())
        }
        fn value(&self) -> &[u8] {
            b"v"
        }
        fn next(&mut self) -> Result<()> {
            self.pos += 1;
            Ok(())
        }
        fn close(&mut self) {
            self.pos = self.keys.len();
        }
    }

    #[test]
    fn test_key_outside_prefix_is_consistency_error() {
        let backend = ScriptedBackend { keys: vec![b"d/n/a".to_vec(), b"d/m/x".to_vec()] };
        let runner = TxnRunner::new(Arc::new(backend));
        let ns = Namespace::new("d", "n");

        let mut iter = DBIterator::new(&runner, &ns, None, None, Direction::Forward).unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"a");
        iter.next();
        assert!(!iter.valid());
        assert!(matches!(iter.error(), Some(Error::InvalidKey { .. })));
    }

    #[test]
    fn test_backend_error_on_construction() {
        let runner = TxnRunner::new(Arc::new(ScriptedBackend { keys: Vec::new() }));
        let ns = Namespace::new("d", "n");
        let err = DBIterator::new(&runner, &ns, None, None, Direction::Reverse).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
