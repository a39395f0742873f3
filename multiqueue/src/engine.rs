//! Compose sequencing, tip tracking, checkpoints and notifications into queues.

use crate::{
    allocator::{Allocator, Pending, Sequencer},
    bus::Bus,
    checkpoint,
    keys::Keys,
    metrics::{Metrics, QueueLabel},
    registry,
    store::{Batch, Store},
    stream::{self, ReadOptions, ReadStream},
    tip::Tracker,
    Config, Dequeued, Encoding, Enqueued, Entry, Error, Tip, Value,
};
use commonware_runtime::Metrics as RuntimeMetrics;
use futures::channel::mpsc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// State shared by the engine and every queue handle.
struct Shared<S: Store> {
    store: S,
    keys: Keys,
    encoding: Encoding,
    allocator: Allocator<S>,
    bus: Bus,
    metrics: Metrics,
}

impl<S: Store> Shared<S> {
    fn validate(&self, queue: &str) -> Result<(), Error> {
        if queue.is_empty() || queue.as_bytes().contains(&self.keys.separator()) {
            return Err(Error::InvalidQueueName(queue.to_string()));
        }
        Ok(())
    }
}

/// In-memory state of one queue.
#[derive(Default)]
struct State {
    /// Tip of the queue (`None` until recovered from the store).
    tracker: async_lock::Mutex<Option<Tracker>>,

    /// Serializes operations that read and then move the checkpoint.
    cursor: async_lock::Mutex<()>,
}

/// Many named queues over a single [Store].
///
/// Cloning an [Engine] is cheap and clones share all state.
#[derive(Clone)]
pub struct Engine<S: Store> {
    shared: Arc<Shared<S>>,
    queues: Arc<Mutex<HashMap<String, Queue<S>>>>,
}

impl<S: Store> Engine<S> {
    /// Create an engine over `store`, registering its metrics with `context`.
    pub fn new<E: RuntimeMetrics>(context: E, store: S, cfg: Config) -> Result<Self, Error> {
        let keys = Keys::new(cfg.separator)?;
        let metrics = Metrics::init(&context);
        let bus = Bus::new(cfg.notification_buffer, metrics.dropped.clone());
        let allocator = Allocator::new(store.clone(), keys, cfg.autoincrement);
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                keys,
                encoding: cfg.encoding,
                allocator,
                bus,
                metrics,
            }),
            queues: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Get the handle of `name`, creating its in-memory state on first use.
    ///
    /// Concurrent callers asking for the same queue always receive handles sharing one state.
    pub fn queue(&self, name: &str) -> Result<Queue<S>, Error> {
        self.shared.validate(name)?;
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get(name) {
            return Ok(queue.clone());
        }
        let queue = Queue {
            name: name.to_string(),
            shared: self.shared.clone(),
            state: Arc::new(State::default()),
        };
        queues.insert(name.to_string(), queue.clone());
        self.shared.metrics.queues.set(queues.len() as i64);
        Ok(queue)
    }

    /// Enqueue `value` into `queue` (see [Queue::enqueue]).
    pub async fn enqueue(
        &self,
        queue: &str,
        value: Value,
        seq: Option<u64>,
    ) -> Result<Enqueued, Error> {
        self.queue(queue)?.enqueue(value, seq).await
    }

    /// Enqueue `entries` into `queue` (see [Queue::batch_enqueue]).
    pub async fn batch_enqueue(
        &self,
        queue: &str,
        entries: Vec<Entry>,
    ) -> Result<Vec<Enqueued>, Error> {
        self.queue(queue)?.batch_enqueue(entries).await
    }

    /// Consume the next sequence of `queue` (see [Queue::dequeue]).
    pub async fn dequeue(&self, queue: &str) -> Result<Dequeued, Error> {
        self.queue(queue)?.dequeue().await
    }

    /// Open a read stream over one queue (if `opts.queue` is set) or over all of them.
    pub async fn read(&self, opts: ReadOptions) -> Result<ReadStream, Error> {
        if let Some(queue) = &opts.queue {
            self.shared.validate(queue)?;
        }
        let shared = &self.shared;
        stream::open(&shared.store, &shared.keys, shared.encoding, &shared.bus, opts).await
    }

    /// List every queue with at least one stored item, in key order.
    pub async fn queues(&self) -> Result<Vec<String>, Error> {
        registry::list(&self.shared.store, &self.shared.keys).await
    }

    /// The first queue (in key order) after `after`, or the first queue if `after` is `None`.
    pub async fn next_queue(&self, after: Option<&str>) -> Result<Option<String>, Error> {
        if let Some(after) = after {
            self.shared.validate(after)?;
        }
        registry::next(&self.shared.store, &self.shared.keys, after).await
    }

    /// The last sequence dequeued from `queue`.
    pub async fn checkpoint(&self, queue: &str) -> Result<Option<u64>, Error> {
        self.shared.validate(queue)?;
        checkpoint::get(&self.shared.store, &self.shared.keys, queue).await
    }

    /// The tip of `queue` (see [Queue::tip]).
    pub async fn tip(&self, queue: &str) -> Result<Option<u64>, Error> {
        self.queue(queue)?.tip().await
    }

    /// The first sequence of every queue.
    pub fn first(&self) -> u64 {
        self.shared.allocator.first()
    }

    /// Whether sequences are assigned by the engine.
    pub fn autoincrement(&self) -> bool {
        self.shared.allocator.is_autoincrement()
    }

    /// Subscribe to every item enqueued from now on.
    pub fn subscribe_enqueue(&self) -> mpsc::Receiver<Enqueued> {
        self.shared.bus.enqueue.subscribe()
    }

    /// Subscribe to every sequence dequeued from now on.
    pub fn subscribe_dequeue(&self) -> mpsc::Receiver<Dequeued> {
        self.shared.bus.dequeue.subscribe()
    }

    /// Subscribe to every tip advance from now on.
    pub fn subscribe_tip(&self) -> mpsc::Receiver<Tip> {
        self.shared.bus.tip.subscribe()
    }
}

/// A handle to one queue of an [Engine].
///
/// Handles are cheap to clone and all handles of a queue share its state.
#[derive(Clone)]
pub struct Queue<S: Store> {
    name: String,
    shared: Arc<Shared<S>>,
    state: Arc<State>,
}

impl<S: Store> Queue<S> {
    /// Name of the queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recover the tip from the store if it is not yet known.
    async fn load<'a>(&self, slot: &'a mut Option<Tracker>) -> Result<&'a mut Tracker, Error> {
        let tracker = match slot.take() {
            Some(tracker) => tracker,
            None => {
                let tracker = self.shared.allocator.recover(&self.name).await?;
                debug!(
                    queue = self.name.as_str(),
                    tip = ?tracker.tip(),
                    pending = tracker.pending(),
                    "recovered tip"
                );
                tracker
            }
        };
        Ok(slot.insert(tracker))
    }

    /// Report a tip advance.
    fn advanced(&self, tracker: &Tracker) {
        let Some(tip) = tracker.tip() else {
            return;
        };
        debug!(queue = self.name.as_str(), tip, "tip advanced");
        let shared = &self.shared;
        shared
            .metrics
            .tip
            .get_or_create(&QueueLabel::new(&self.name))
            .set(tip as i64);
        shared.bus.tip.publish(Tip {
            queue: self.name.clone(),
            tip,
        });
    }

    /// Enqueue a single item.
    ///
    /// `seq` is required when callers supply sequences and ignored otherwise.
    pub async fn enqueue(&self, value: Value, seq: Option<u64>) -> Result<Enqueued, Error> {
        let mut enqueued = self.batch_enqueue(vec![Entry { value, seq }]).await?;
        Ok(enqueued.remove(0))
    }

    /// Enqueue `entries` with one atomic write.
    ///
    /// Returns one record per entry, each annotated with the tip observed right after it was
    /// accounted for. When callers supply sequences, records are returned in ascending sequence
    /// order, otherwise in input order. Nothing is written if any entry is rejected.
    pub async fn batch_enqueue(&self, mut entries: Vec<Entry>) -> Result<Vec<Enqueued>, Error> {
        let shared = &self.shared;
        shared.allocator.prepare(&mut entries)?;
        let pending = entries
            .iter()
            .map(|entry| -> Result<Pending, Error> {
                Ok(Pending {
                    seq: entry.seq,
                    raw: shared.encoding.encode(&entry.value)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        // Caller-supplied sequences are checked against the checkpoint, so a dequeue must not move
        // it between that check and the write
        let _cursor = if shared.allocator.is_autoincrement() {
            None
        } else {
            Some(self.state.cursor.lock().await)
        };

        // Recover the tip first so it cannot already include the sequences about to be written
        {
            let mut slot = self.state.tracker.lock().await;
            self.load(&mut slot).await?;
        }
        let seqs = shared.allocator.persist(&self.name, pending).await?;

        let mut enqueued = Vec::with_capacity(seqs.len());
        {
            let mut slot = self.state.tracker.lock().await;
            let tracker = self.load(&mut slot).await?;
            for (entry, seq) in entries.into_iter().zip(seqs) {
                if tracker.observe(seq) {
                    self.advanced(tracker);
                }
                enqueued.push(Enqueued {
                    key: shared.keys.encode(&self.name, seq),
                    value: entry.value,
                    queue: self.name.clone(),
                    seq,
                    tip: tracker.tip(),
                });
            }
            shared
                .metrics
                .pending
                .get_or_create(&QueueLabel::new(&self.name))
                .set(tracker.pending() as i64);
        }

        for item in &enqueued {
            shared.bus.enqueue.publish(item.clone());
        }
        shared.metrics.enqueued.inc_by(enqueued.len() as u64);
        debug!(queue = self.name.as_str(), count = enqueued.len(), "enqueued");
        Ok(enqueued)
    }

    /// Consume the sequence after the checkpoint: delete its item and advance the checkpoint in
    /// one atomic write.
    ///
    /// The checkpoint advances even if no item is stored at that sequence. When callers supply
    /// sequences, the consumed sequence also counts toward the tip (it can never be enqueued).
    pub async fn dequeue(&self) -> Result<Dequeued, Error> {
        let shared = &self.shared;
        let _cursor = self.state.cursor.lock().await;

        let checkpoint = checkpoint::get(&shared.store, &shared.keys, &self.name).await?;
        let seq = checkpoint::next(checkpoint, shared.allocator.first())?;
        let mut batch = Batch::new();
        batch
            .delete(shared.keys.encode(&self.name, seq))
            .put(shared.keys.checkpoint(&self.name), checkpoint::encode(seq));
        shared.store.write(batch).await?;

        // A recovered tracker already starts at the checkpoint
        {
            let mut slot = self.state.tracker.lock().await;
            if let Some(tracker) = slot.as_mut() {
                if shared.allocator.consume(tracker, seq) {
                    self.advanced(tracker);
                    shared
                        .metrics
                        .pending
                        .get_or_create(&QueueLabel::new(&self.name))
                        .set(tracker.pending() as i64);
                }
            }
        }

        let dequeued = Dequeued {
            queue: self.name.clone(),
            seq,
        };
        shared.bus.dequeue.publish(dequeued.clone());
        shared.metrics.dequeued.inc();
        debug!(queue = self.name.as_str(), seq, "dequeued");
        Ok(dequeued)
    }

    /// Open a read stream over this queue (`opts.queue` is ignored).
    pub async fn read(&self, mut opts: ReadOptions) -> Result<ReadStream, Error> {
        opts.queue = Some(self.name.clone());
        let shared = &self.shared;
        stream::open(&shared.store, &shared.keys, shared.encoding, &shared.bus, opts).await
    }

    /// Highest sequence such that every sequence from the first through it is stored.
    pub async fn tip(&self) -> Result<Option<u64>, Error> {
        let mut slot = self.state.tracker.lock().await;
        Ok(self.load(&mut slot).await?.tip())
    }

    /// Delete every item, the checkpoint and any allocation state of this queue.
    ///
    /// Items enqueued concurrently with a clear may or may not survive it.
    pub async fn clear(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let _cursor = self.state.cursor.lock().await;
        let mut slot = self.state.tracker.lock().await;

        let mut batch = Batch::new();
        batch.delete(shared.keys.checkpoint(&self.name));
        shared.allocator.clear(&self.name, batch).await?;
        *slot = None;

        let label = QueueLabel::new(&self.name);
        shared.metrics.tip.remove(&label);
        shared.metrics.pending.remove(&label);
        debug!(queue = self.name.as_str(), "cleared");
        Ok(())
    }

    /// The last sequence dequeued from this queue.
    pub async fn checkpoint(&self) -> Result<Option<u64>, Error> {
        checkpoint::get(&self.shared.store, &self.shared.keys, &self.name).await
    }
}
