//! Assign (or accept) sequences for enqueued items and persist them.
//!
//! The strategy is chosen once, when the [crate::Engine] is created:
//! - [Autoincrement]: the engine assigns consecutive sequences per queue.
//! - [Custom]: every item carries a caller-chosen sequence that is validated and stored as-is.

use crate::{
    keys::Keys,
    store::{Batch, Store},
    Entry, Error, Tracker,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

mod autoincrement;
pub(crate) use autoincrement::Autoincrement;
mod custom;
pub(crate) use custom::Custom;

/// An item whose value has already been validated and serialized.
pub(crate) struct Pending {
    pub seq: Option<u64>,
    pub raw: Vec<u8>,
}

/// A sequence allocation strategy.
pub(crate) trait Sequencer: Send + Sync {
    /// The first sequence of a fresh queue.
    fn first(&self) -> u64;

    /// Validate (and order) a batch before any I/O is performed.
    fn prepare(&self, entries: &mut [Entry]) -> Result<(), Error>;

    /// Account for a dequeue that consumed every sequence through `seq`, returning true if the
    /// tip advanced.
    fn consume(&self, tracker: &mut Tracker, seq: u64) -> bool;

    /// Rebuild the tip state of `queue` from durable state alone.
    fn recover(&self, queue: &str) -> impl Future<Output = Result<Tracker, Error>> + Send;

    /// Persist `items` in one atomic write, returning their sequences in input order.
    fn persist(
        &self,
        queue: &str,
        items: Vec<Pending>,
    ) -> impl Future<Output = Result<Vec<u64>, Error>> + Send;

    /// Atomically delete every item of `queue` and any per-queue allocation state, along with
    /// the changes already in `batch`.
    fn clear(&self, queue: &str, batch: Batch) -> impl Future<Output = Result<(), Error>> + Send;
}

/// The strategy selected for an [crate::Engine].
pub(crate) enum Allocator<S: Store> {
    Autoincrement(Autoincrement<S>),
    Custom(Custom<S>),
}

impl<S: Store> Allocator<S> {
    pub fn new(store: S, keys: Keys, autoincrement: bool) -> Self {
        if autoincrement {
            Self::Autoincrement(Autoincrement::new(store, keys))
        } else {
            Self::Custom(Custom::new(store, keys))
        }
    }

    pub fn is_autoincrement(&self) -> bool {
        matches!(self, Self::Autoincrement(_))
    }
}

impl<S: Store> Sequencer for Allocator<S> {
    fn first(&self) -> u64 {
        match self {
            Self::Autoincrement(allocator) => allocator.first(),
            Self::Custom(allocator) => allocator.first(),
        }
    }

    fn prepare(&self, entries: &mut [Entry]) -> Result<(), Error> {
        match self {
            Self::Autoincrement(allocator) => allocator.prepare(entries),
            Self::Custom(allocator) => allocator.prepare(entries),
        }
    }

    fn consume(&self, tracker: &mut Tracker, seq: u64) -> bool {
        match self {
            Self::Autoincrement(allocator) => allocator.consume(tracker, seq),
            Self::Custom(allocator) => allocator.consume(tracker, seq),
        }
    }

    async fn recover(&self, queue: &str) -> Result<Tracker, Error> {
        match self {
            Self::Autoincrement(allocator) => allocator.recover(queue).await,
            Self::Custom(allocator) => allocator.recover(queue).await,
        }
    }

    async fn persist(&self, queue: &str, items: Vec<Pending>) -> Result<Vec<u64>, Error> {
        match self {
            Self::Autoincrement(allocator) => allocator.persist(queue, items).await,
            Self::Custom(allocator) => allocator.persist(queue, items).await,
        }
    }

    async fn clear(&self, queue: &str, batch: Batch) -> Result<(), Error> {
        match self {
            Self::Autoincrement(allocator) => allocator.clear(queue, batch).await,
            Self::Custom(allocator) => allocator.clear(queue, batch).await,
        }
    }
}

/// Per-queue async locks, created on first use.
pub(crate) struct Locks<T> {
    locks: Mutex<HashMap<String, Arc<async_lock::Mutex<T>>>>,
}

impl<T> Default for Locks<T> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Default> Locks<T> {
    pub fn get(&self, queue: &str) -> Arc<async_lock::Mutex<T>> {
        self.locks
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(async_lock::Mutex::new(T::default())))
            .clone()
    }
}

/// Add a delete for every item of `queue` to `batch`.
pub(crate) async fn delete_items<S: Store>(
    store: &S,
    keys: &Keys,
    queue: &str,
    batch: &mut Batch,
) -> Result<usize, Error> {
    let items = store.scan(keys.queue(queue, None, None), None).await?;
    let count = items.len();
    for (key, _) in items {
        batch.delete(key);
    }
    Ok(count)
}
