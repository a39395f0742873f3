use super::{delete_items, Locks, Pending, Sequencer};
use crate::{
    checkpoint,
    keys::Keys,
    store::{Batch, Store},
    Entry, Error, Tracker,
};
use tracing::debug;

/// First sequence assigned in every queue.
const FIRST: u64 = 0;

/// Assigns consecutive sequences per queue.
///
/// The next sequence of each queue is persisted in the same batch as the items it was assigned
/// to, so the counter always equals one past the last durably stored item. Allocation and the
/// write are performed under a per-queue lock: concurrent batches on one queue receive disjoint,
/// gapless ranges and a failed write never consumes sequences.
pub(crate) struct Autoincrement<S: Store> {
    store: S,
    keys: Keys,

    /// Cached next sequence of each queue (`None` until loaded from the store).
    counters: Locks<Option<u64>>,
}

impl<S: Store> Autoincrement<S> {
    pub fn new(store: S, keys: Keys) -> Self {
        Self {
            store,
            keys,
            counters: Locks::default(),
        }
    }

    /// Read the persisted next sequence of `queue`.
    async fn load(&self, queue: &str) -> Result<u64, Error> {
        let next = self
            .store
            .get(&self.keys.counter(queue))
            .await?
            .map(|raw| checkpoint::decode(&raw))
            .transpose()?;
        Ok(next.unwrap_or(FIRST))
    }
}

impl<S: Store> Sequencer for Autoincrement<S> {
    fn first(&self) -> u64 {
        FIRST
    }

    fn prepare(&self, _: &mut [Entry]) -> Result<(), Error> {
        Ok(())
    }

    fn consume(&self, _: &mut Tracker, _: u64) -> bool {
        // The tip follows the counter alone
        false
    }

    async fn recover(&self, queue: &str) -> Result<Tracker, Error> {
        // Every sequence below the counter was written with it
        let tip = self.load(queue).await?.checked_sub(1);
        Ok(Tracker::new(FIRST, tip))
    }

    async fn persist(&self, queue: &str, items: Vec<Pending>) -> Result<Vec<u64>, Error> {
        let counter = self.counters.get(queue);
        let mut next = counter.lock().await;
        let start = match *next {
            Some(cached) => cached,
            None => self.load(queue).await?,
        };
        let end = start
            .checked_add(items.len() as u64)
            .ok_or(Error::SequenceExhausted)?;

        let mut batch = Batch::new();
        for (seq, item) in (start..end).zip(items) {
            batch.put(self.keys.encode(queue, seq), item.raw);
        }
        batch.put(self.keys.counter(queue), checkpoint::encode(end));
        self.store.write(batch).await?;
        *next = Some(end);

        debug!(queue, start, end, "assigned sequences");
        Ok((start..end).collect())
    }

    async fn clear(&self, queue: &str, mut batch: Batch) -> Result<(), Error> {
        let counter = self.counters.get(queue);
        let mut next = counter.lock().await;
        delete_items(&self.store, &self.keys, queue, &mut batch).await?;
        batch.delete(self.keys.counter(queue));
        self.store.write(batch).await?;
        *next = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{mocks::Counting, Memory};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner, Spawner};

    fn pending(n: usize) -> Vec<Pending> {
        (0..n)
            .map(|i| Pending {
                seq: None,
                raw: vec![i as u8],
            })
            .collect()
    }

    #[test_traced]
    fn test_assigns_consecutive_ranges() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = Memory::default();
            let keys = Keys::new(b'!').unwrap();
            let allocator = Autoincrement::new(store.clone(), keys);
            assert_eq!(allocator.recover("jobs").await.unwrap().tip(), None);

            assert_eq!(allocator.persist("jobs", pending(3)).await.unwrap(), vec![0, 1, 2]);
            assert_eq!(allocator.persist("jobs", pending(2)).await.unwrap(), vec![3, 4]);
            assert_eq!(allocator.persist("other", pending(1)).await.unwrap(), vec![0]);
            assert_eq!(allocator.recover("jobs").await.unwrap().tip(), Some(4));

            // A fresh allocator over the same store continues where the last one stopped
            let allocator = Autoincrement::new(store.clone(), keys);
            assert_eq!(allocator.recover("jobs").await.unwrap().tip(), Some(4));
            assert_eq!(allocator.persist("jobs", pending(1)).await.unwrap(), vec![5]);
            assert_eq!(
                store.get(&keys.encode("jobs", 5)).await.unwrap(),
                Some(vec![0])
            );
        });
    }

    #[test_traced]
    fn test_concurrent_batches_are_disjoint() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let keys = Keys::new(b'!').unwrap();
            let allocator = std::sync::Arc::new(Autoincrement::new(Memory::default(), keys));

            let mut handles = Vec::new();
            for i in 0..8 {
                let allocator = allocator.clone();
                handles.push(context.clone().spawn(move |_| async move {
                    allocator.persist("jobs", pending(i + 1)).await.unwrap()
                }));
            }
            let mut all = Vec::new();
            for handle in handles {
                let seqs = handle.await.unwrap();
                assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
                all.extend(seqs);
            }
            all.sort();
            assert_eq!(all, (0..36).collect::<Vec<_>>());
        });
    }

    #[test_traced]
    fn test_failed_write_does_not_consume_sequences() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = Counting::new(Memory::default());
            let allocator = Autoincrement::new(store.clone(), Keys::new(b'!').unwrap());
            assert_eq!(allocator.persist("jobs", pending(2)).await.unwrap(), vec![0, 1]);

            store.fail_writes(true);
            assert!(matches!(
                allocator.persist("jobs", pending(2)).await,
                Err(Error::Store(crate::store::Error::Unavailable))
            ));

            store.fail_writes(false);
            assert_eq!(allocator.persist("jobs", pending(1)).await.unwrap(), vec![2]);
        });
    }

    #[test_traced]
    fn test_clear_resets_counter() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = Memory::default();
            let allocator = Autoincrement::new(store.clone(), Keys::new(b'!').unwrap());
            allocator.persist("jobs", pending(3)).await.unwrap();
            allocator.persist("other", pending(1)).await.unwrap();

            allocator.clear("jobs", Batch::new()).await.unwrap();
            assert_eq!(allocator.recover("jobs").await.unwrap().tip(), None);
            assert_eq!(allocator.persist("jobs", pending(1)).await.unwrap(), vec![0]);

            // Other queues are untouched (one item, one counter, plus the new item and counter)
            assert_eq!(allocator.recover("other").await.unwrap().tip(), Some(0));
            assert_eq!(store.len(), 4);
        });
    }
}
