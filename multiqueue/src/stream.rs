//! Read stored items, optionally followed by a live tail of new ones.

use crate::{bus::Bus, keys::Keys, store::Store, Encoding, Enqueued, Error, Item};
use futures::{
    future,
    stream::{self, BoxStream},
    StreamExt,
};
use tracing::trace;

/// A stream of items produced by [crate::Engine::read] or [crate::Queue::read].
pub type ReadStream = BoxStream<'static, Result<Item, Error>>;

/// Options for a read stream.
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Queue to read (every queue when `None`).
    pub queue: Option<String>,

    /// Keep the stream open after stored items are exhausted, delivering newly enqueued items.
    ///
    /// Live items are only delivered once every stored item has been yielded. Items enqueued
    /// while the stream is opened may be delivered twice.
    pub live: bool,

    /// Only include sequences strictly greater than this.
    pub gt: Option<u64>,

    /// Only include sequences strictly less than this.
    pub lt: Option<u64>,

    /// Maximum number of stored items to return (does not bound the live tail).
    pub limit: Option<usize>,
}

impl ReadOptions {
    /// Read everything stored in `queue`.
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..Default::default()
        }
    }

    fn includes(&self, queue: &str, seq: u64) -> bool {
        self.queue.as_deref().is_none_or(|q| q == queue)
            && self.gt.is_none_or(|gt| seq > gt)
            && self.lt.is_none_or(|lt| seq < lt)
    }
}

/// Open a read stream.
///
/// The live subscription (if requested) is registered before stored items are scanned, so no
/// item is missed between the two. Events buffer in the subscription until the stored items
/// are drained.
pub(crate) async fn open<S: Store>(
    store: &S,
    keys: &Keys,
    encoding: Encoding,
    bus: &Bus,
    opts: ReadOptions,
) -> Result<ReadStream, Error> {
    let live = opts.live.then(|| bus.enqueue.subscribe());

    // A global scan may contain keys that are filtered out after decoding, so it cannot be limited
    // by the store
    let (range, limit) = match &opts.queue {
        Some(queue) => (keys.queue(queue, opts.gt, opts.lt), opts.limit),
        None => (keys.items(), None),
    };
    let scanned = store.scan(range, limit).await?;
    let mut stored = Vec::with_capacity(scanned.len());
    for (key, raw) in scanned {
        if opts.limit.is_some_and(|limit| stored.len() >= limit) {
            break;
        }
        let (queue, seq) = match keys.decode(&key) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!(?err, "skipping key");
                continue;
            }
        };
        if !opts.includes(&queue, seq) {
            continue;
        }
        stored.push(encoding.decode(raw).map(|value| Item { queue, seq, value }));
    }
    let stored = stream::iter(stored);

    let Some(live) = live else {
        return Ok(stored.boxed());
    };
    let live = live.filter_map(move |enqueued: Enqueued| {
        let item = opts
            .includes(&enqueued.queue, enqueued.seq)
            .then(|| Ok(Item::from(enqueued)));
        future::ready(item)
    });
    Ok(stored.chain(live).boxed())
}
