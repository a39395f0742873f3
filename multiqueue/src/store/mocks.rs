//! Store wrappers for exercising failure paths and interleavings.

use super::{Batch, Error, Range, Store};
use commonware_runtime::reschedule;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Wraps a [Store], counting operations and optionally failing writes.
#[derive(Clone)]
pub struct Counting<S: Store> {
    inner: S,
    ops: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl<S: Store> Counting<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ops: Arc::new(AtomicUsize::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Total number of reads, scans and writes issued so far.
    pub fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail with [Error::Unavailable].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl<S: Store> Store for Counting<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn scan(
        &self,
        range: Range,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(range, limit).await
    }

    async fn write(&self, batch: Batch) -> Result<(), Error> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable);
        }
        self.inner.write(batch).await
    }
}

/// Wraps a [Store], yielding to the runtime before every operation so concurrent tasks
/// interleave between reads and writes.
#[derive(Clone)]
pub struct Yielding<S: Store> {
    inner: S,
}

impl<S: Store> Yielding<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Store> Store for Yielding<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        reschedule().await;
        self.inner.get(key).await
    }

    async fn scan(
        &self,
        range: Range,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        reschedule().await;
        self.inner.scan(range, limit).await
    }

    async fn write(&self, batch: Batch) -> Result<(), Error> {
        reschedule().await;
        self.inner.write(batch).await
    }
}
