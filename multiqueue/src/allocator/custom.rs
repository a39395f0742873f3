use super::{delete_items, Locks, Pending, Sequencer};
use crate::{
    checkpoint,
    keys::Keys,
    store::{Batch, Store},
    Entry, Error, Tracker,
};
use std::ops::Bound;
use tracing::debug;

/// First sequence of every queue.
const FIRST: u64 = 0;

/// Number of items read per scan while recovering the tip state.
const RECOVERY_PAGE: usize = 256;

/// Stores items at caller-supplied sequences.
///
/// A batch is rejected before anything is written if any item lacks a sequence, repeats a
/// sequence in the same batch, or names a sequence that is already stored or already consumed
/// (at or below the checkpoint). Writes to the same queue are serialized so the duplicate check
/// cannot race with another batch.
pub(crate) struct Custom<S: Store> {
    store: S,
    keys: Keys,

    locks: Locks<()>,
}

impl<S: Store> Custom<S> {
    pub fn new(store: S, keys: Keys) -> Self {
        Self {
            store,
            keys,
            locks: Locks::default(),
        }
    }
}

impl<S: Store> Sequencer for Custom<S> {
    fn first(&self) -> u64 {
        FIRST
    }

    fn prepare(&self, entries: &mut [Entry]) -> Result<(), Error> {
        if entries.iter().any(|entry| entry.seq.is_none()) {
            return Err(Error::MissingSequence);
        }
        entries.sort_by_key(|entry| entry.seq);
        for window in entries.windows(2) {
            if window[0].seq == window[1].seq {
                return Err(Error::DuplicateSequence(window[0].seq.unwrap_or_default()));
            }
        }
        Ok(())
    }

    fn consume(&self, tracker: &mut Tracker, seq: u64) -> bool {
        // A consumed sequence is rejected by persist, so it can never fill a gap
        tracker.advance_floor(seq)
    }

    async fn recover(&self, queue: &str) -> Result<Tracker, Error> {
        // Everything up to the checkpoint has been consumed, so the contiguous run starts after it
        let checkpoint = checkpoint::get(&self.store, &self.keys, queue).await?;
        let mut tracker = Tracker::new(FIRST, checkpoint);
        let (mut start, end) = self.keys.queue(queue, checkpoint, None);
        loop {
            let page = self
                .store
                .scan((start, end.clone()), Some(RECOVERY_PAGE))
                .await?;
            let full = page.len() == RECOVERY_PAGE;
            let Some((last, _)) = page.last() else {
                return Ok(tracker);
            };
            start = Bound::Excluded(last.clone());
            for (key, _) in &page {
                let (_, seq) = self.keys.decode(key)?;
                tracker.observe(seq);
            }
            if !full {
                return Ok(tracker);
            }
        }
    }

    async fn persist(&self, queue: &str, items: Vec<Pending>) -> Result<Vec<u64>, Error> {
        let lock = self.locks.get(queue);
        let _guard = lock.lock().await;

        let checkpoint = checkpoint::get(&self.store, &self.keys, queue).await?;
        let mut batch = Batch::new();
        let mut seqs = Vec::with_capacity(items.len());
        for item in items {
            let seq = item.seq.ok_or(Error::MissingSequence)?;
            if checkpoint.is_some_and(|checkpoint| seq <= checkpoint) {
                return Err(Error::DuplicateSequence(seq));
            }
            let key = self.keys.encode(queue, seq);
            if self.store.get(&key).await?.is_some() {
                return Err(Error::DuplicateSequence(seq));
            }
            batch.put(key, item.raw);
            seqs.push(seq);
        }
        self.store.write(batch).await?;

        debug!(queue, count = seqs.len(), "stored sequences");
        Ok(seqs)
    }

    async fn clear(&self, queue: &str, mut batch: Batch) -> Result<(), Error> {
        let lock = self.locks.get(queue);
        let _guard = lock.lock().await;
        delete_items(&self.store, &self.keys, queue, &mut batch).await?;
        self.store.write(batch).await?;
        Ok(())
    }
}
