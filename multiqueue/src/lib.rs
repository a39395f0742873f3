//! Maintain many sequenced FIFO queues over a shared sorted key-value store.
//!
//! # Overview
//!
//! An [Engine] multiplexes any number of independently named queues onto a single [store::Store].
//! Every queue supports:
//! - sequenced enqueue (one item or a batch), where sequences are either assigned by the engine
//!   (autoincrement) or supplied by the caller,
//! - checkpointed dequeue by a single consumer,
//! - historical reads over a range of sequences, optionally followed by a live tail of newly
//!   enqueued items.
//!
//! Queues are discovered by scanning the key space (see [keys] for the layout), so no index of
//! queue names is maintained.
//!
//! # Tip
//!
//! Concurrent enqueues on the same queue may finish writing in a different order than the one
//! their sequences were assigned in. For each queue, the engine tracks a _tip_: the highest
//! sequence such that every sequence from the first up to it is known to be durably stored.
//! Sequences that complete ahead of a gap are buffered until the gap is filled, at which point the
//! tip advances over all of them. The tip is not persisted: it is recovered from the store the first
//! time a queue is used after a restart.
//!
//! # Notifications
//!
//! Subscribers can follow `enqueue`, `dequeue` and `tip` events via [Engine::subscribe_enqueue],
//! [Engine::subscribe_dequeue] and [Engine::subscribe_tip]. Delivery is best-effort: every
//! subscriber has a bounded buffer and events that do not fit are dropped (and counted).
//!
//! # Status
//!
//! `commonware-multiqueue` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```rust
//! use commonware_multiqueue::{store::Memory, Config, Engine, Value};
//! use commonware_runtime::{deterministic, Runner};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     // Create an engine over an in-memory store
//!     let engine = Engine::new(context, Memory::default(), Config::default()).unwrap();
//!
//!     // Enqueue an item (the first sequence is 0)
//!     let enqueued = engine
//!         .enqueue("jobs", Value::Binary("hello".into()), None)
//!         .await
//!         .unwrap();
//!     assert_eq!(enqueued.seq, 0);
//!     assert_eq!(enqueued.tip, Some(0));
//!
//!     // Consume it
//!     let dequeued = engine.dequeue("jobs").await.unwrap();
//!     assert_eq!(dequeued.seq, 0);
//!     assert_eq!(engine.checkpoint("jobs").await.unwrap(), Some(0));
//! });
//! ```

mod allocator;
mod bus;
mod checkpoint;
mod engine;
pub mod keys;
mod metrics;
mod registry;
pub mod store;
mod stream;
mod tip;
mod value;

pub use engine::{Engine, Queue};
pub use stream::{ReadOptions, ReadStream};
pub use tip::Tracker;
pub use value::{Encoding, Value};

use thiserror::Error;

/// Errors that can occur when interacting with an [Engine].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid queue name: {0:?}")]
    InvalidQueueName(String),
    #[error("invalid value: expected {0:?}")]
    InvalidValue(Encoding),
    #[error("missing sequence")]
    MissingSequence,
    #[error("duplicate sequence: {0}")]
    DuplicateSequence(u64),
    #[error("sequence space exhausted")]
    SequenceExhausted,
    #[error("invalid separator: {0:#04x}")]
    InvalidSeparator(u8),
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("corrupt value: {0}")]
    CorruptValue(String),
    #[error("corrupt sequence: {0}")]
    CorruptSequence(commonware_codec::Error),
    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

/// Configuration for an [Engine].
#[derive(Clone, Debug)]
pub struct Config {
    /// Byte delimiting queue names inside item keys.
    ///
    /// Must be ASCII, above `0x01` and not a hex digit. Queue names may not contain it.
    pub separator: u8,

    /// Whether the engine assigns sequences (`true`) or callers supply them (`false`).
    pub autoincrement: bool,

    /// Encoding every enqueued value must conform to.
    pub encoding: Encoding,

    /// Number of undelivered events buffered for each notification subscriber.
    pub notification_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            separator: b'!',
            autoincrement: true,
            encoding: Encoding::Binary,
            notification_buffer: 1024,
        }
    }
}

/// An item submitted to a batch enqueue.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub value: Value,

    /// Sequence to store the item at (ignored when sequences are assigned by the engine).
    pub seq: Option<u64>,
}

impl Entry {
    pub fn new(value: impl Into<Value>, seq: Option<u64>) -> Self {
        Self {
            value: value.into(),
            seq,
        }
    }
}

/// An item that was durably enqueued.
#[derive(Clone, Debug, PartialEq)]
pub struct Enqueued {
    pub key: Vec<u8>,
    pub value: Value,
    pub queue: String,
    pub seq: u64,

    /// The queue's tip immediately after this item was accounted for.
    ///
    /// May be below `seq` (or absent) if earlier sequences are not yet stored.
    pub tip: Option<u64>,
}

/// A sequence consumed from a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dequeued {
    pub queue: String,
    pub seq: u64,
}

/// A queue's tip advanced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tip {
    pub queue: String,
    pub tip: u64,
}

/// An item returned by a read stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub queue: String,
    pub seq: u64,
    pub value: Value,
}

impl From<Enqueued> for Item {
    fn from(enqueued: Enqueued) -> Self {
        Self {
            queue: enqueued.queue,
            seq: enqueued.seq,
            value: enqueued.value,
        }
    }
}
