//! Sorted key-value stores that back the queues.
//!
//! A [Store] only needs to provide point reads, ordered range scans and atomic batch writes.
//! Two implementations are provided:
//! - [Memory]: an ordered map shared between clones (useful for tests and ephemeral queues).
//! - [Journaled]: an ordered map rebuilt on startup from a checksummed, periodically compacted log
//!   of committed batches persisted to [commonware_runtime::Blob]s.

use std::{future::Future, ops::Bound};
use thiserror::Error;

pub mod journaled;
pub use journaled::Journaled;
mod memory;
pub use memory::Memory;

#[cfg(test)]
pub(crate) mod mocks;

/// Errors that can occur when interacting with a [Store].
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("record too large: {0}")]
    RecordTooLarge(usize),
    #[error("store unavailable")]
    Unavailable,
}

/// Bounds of an ordered scan (supports `gt`, `gte`, `lt`, `lte` and unbounded ends).
pub type Range = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// A single change in a [Batch].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered collection of changes applied atomically by [Store::write].
///
/// If the same key is changed more than once, the last change wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Put(key, value));
        self
    }

    /// Remove `key` (a no-op if it does not exist).
    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Delete(key));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

impl IntoIterator for Batch {
    type Item = Op;
    type IntoIter = std::vec::IntoIter<Op>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// A sorted key-value store with atomic batch writes.
///
/// Clones must refer to the same underlying data.
pub trait Store: Clone + Send + Sync + 'static {
    /// Get the value of `key`, if any.
    fn get(&self, key: &[u8]) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send;

    /// Return up to `limit` entries within `range`, in ascending key order.
    fn scan(
        &self,
        range: Range,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<(Vec<u8>, Vec<u8>)>, Error>> + Send;

    /// Apply all changes in `batch` or none of them.
    fn write(&self, batch: Batch) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Returns true if no key can satisfy `range`.
///
/// [std::collections::BTreeMap::range] panics on such ranges, so stores must check first.
pub(crate) fn is_empty(range: &Range) -> bool {
    match range {
        (Bound::Included(start), Bound::Included(end)) => start > end,
        (Bound::Included(start), Bound::Excluded(end))
        | (Bound::Excluded(start), Bound::Included(end))
        | (Bound::Excluded(start), Bound::Excluded(end)) => start >= end,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ranges() {
        let key = |k: &[u8]| k.to_vec();
        assert!(!is_empty(&(Bound::Unbounded, Bound::Unbounded)));
        assert!(!is_empty(&(Bound::Included(key(b"a")), Bound::Included(key(b"a")))));
        assert!(is_empty(&(Bound::Included(key(b"a")), Bound::Excluded(key(b"a")))));
        assert!(is_empty(&(Bound::Excluded(key(b"a")), Bound::Excluded(key(b"a")))));
        assert!(is_empty(&(Bound::Excluded(key(b"b")), Bound::Excluded(key(b"a")))));
        assert!(!is_empty(&(Bound::Excluded(key(b"a")), Bound::Excluded(key(b"b")))));
    }

    #[test]
    fn test_batch_order() {
        let mut batch = Batch::new();
        batch.put(b"a".to_vec(), b"1".to_vec()).delete(b"b".to_vec());
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.into_iter().collect::<Vec<_>>(),
            vec![Op::Put(b"a".to_vec(), b"1".to_vec()), Op::Delete(b"b".to_vec())]
        );
    }
}
