//! Namespace key codec.
//!
//! Every database owns the slice of the shared keyspace that starts with
//! `"<dir>/<name>/"`. Logical keys are stored under that prefix. A separate
//! sentinel key, `"<dir>-<name>/tikv.state"`, marks the namespace as held.
//!
//! ```text
//! logical  "user:1"
//! physical "chain/state/user:1"
//! sentinel "chain-state/tikv.state"
//! ```

use std::cmp::Ordering;

/// Maps logical keys of one database to physical backend keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    dir: String,
    name: String,
    prefix: Vec<u8>,
    upper_bound: Vec<u8>,
}

impl Namespace {
    /// Creates the codec for the namespace `(dir, name)`.
    pub fn new(dir: &str, name: &str) -> Self {
        let prefix = format!("{}/{}/", dir, name).into_bytes();
        // The prefix ends with '/', so incrementing never overflows.
        let upper_bound = increment(&prefix).unwrap_or_default();
        Self { dir: dir.to_string(), name: name.to_string(), prefix, upper_bound }
    }

    /// Returns the directory component.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Returns the name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the physical prefix, `"<dir>/<name>/"`.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Returns the exclusive upper bound of the namespace.
    ///
    /// This is the prefix incremented as a big-endian number, so every key
    /// that starts with the prefix sorts strictly below it regardless of the
    /// bytes the logical key contains.
    pub fn upper_bound(&self) -> &[u8] {
        &self.upper_bound
    }

    /// Converts a logical key into its physical key.
    ///
    /// The empty logical key maps to the prefix itself, the namespace's lower
    /// boundary.
    pub fn physical_key(&self, logical: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + logical.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(logical);
        key
    }

    /// Strips the prefix from a physical key.
    ///
    /// Returns `None` if the key does not belong to this namespace.
    pub fn logical_key<'a>(&self, physical: &'a [u8]) -> Option<&'a [u8]> {
        physical.strip_prefix(self.prefix.as_slice())
    }

    /// Returns true if `physical` lies inside this namespace.
    pub fn contains(&self, physical: &[u8]) -> bool {
        physical.starts_with(&self.prefix)
    }

    /// Returns the reserved key that marks the namespace as held.
    ///
    /// The key uses `-` between dir and name, so it never falls under this
    /// namespace's own data prefix. The join is not injective: `("a-b", "c")`
    /// and `("a", "b-c")` share one sentinel, so opening the second while the
    /// first is held fails with `AlreadyInUse` even though their data
    /// prefixes are disjoint. Existing deployments rely on this layout.
    pub fn sentinel_key(&self) -> Vec<u8> {
        format!("{}-{}/tikv.state", self.dir, self.name).into_bytes()
    }

    /// Returns the `"<dir>/<name>"` label used in messages.
    pub fn label(&self) -> String {
        format!("{}/{}", self.dir, self.name)
    }
}

/// Returns a copy of `bytes` incremented by one as a big-endian number.
///
/// Returns `None` on overflow (every byte is `0xFF`).
///
/// # Panics
///
/// Panics if `bytes` is empty.
pub fn increment(bytes: &[u8]) -> Option<Vec<u8>> {
    assert!(!bytes.is_empty(), "increment expects a non-empty key");
    let mut ret = bytes.to_vec();
    for i in (0..ret.len()).rev() {
        if ret[i] < 0xFF {
            ret[i] += 1;
            return Some(ret);
        }
        ret[i] = 0x00;
    }
    None
}

/// Returns true if `start <= key` and, when `end` is given, `key < end`.
pub fn is_key_in_domain(key: &[u8], start: &[u8], end: Option<&[u8]>) -> bool {
    if key.cmp(start) == Ordering::Less {
        return false;
    }
    match end {
        Some(end) => key < end,
        None => true,
    }
}
