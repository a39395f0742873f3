//! Discover queues by scanning the item band.
//!
//! No index of queue names is kept: the next queue after `q` is found by seeking past every item
//! key of `q` and decoding the first key found. Listing all queues therefore costs one scan per
//! queue.

use crate::{keys::Keys, store::Store, Error};
use std::ops::Bound;
use tracing::trace;

/// Find the first queue (in key order) that sorts after `after`, or the first queue overall.
pub(crate) async fn next<S: Store>(
    store: &S,
    keys: &Keys,
    after: Option<&str>,
) -> Result<Option<String>, Error> {
    let (mut start, end) = match after {
        Some(queue) => keys.after(queue),
        None => keys.items(),
    };
    loop {
        let Some((key, _)) = store
            .scan((start, end.clone()), Some(1))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        match keys.decode(&key) {
            Ok((queue, _)) => return Ok(Some(queue)),
            Err(err) => {
                trace!(?err, "skipping key");
                start = Bound::Excluded(key);
            }
        }
    }
}

/// List every queue with at least one stored item.
pub(crate) async fn list<S: Store>(store: &S, keys: &Keys) -> Result<Vec<String>, Error> {
    let mut queues = Vec::new();
    let mut after = None;
    while let Some(queue) = next(store, keys, after.as_deref()).await? {
        queues.push(queue.clone());
        after = Some(queue);
    }
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checkpoint,
        store::{Batch, Memory},
    };
    use futures::executor::block_on;

    async fn put(store: &Memory, keys: &Keys, queue: &str, seq: u64) {
        let mut batch = Batch::new();
        batch.put(keys.encode(queue, seq), vec![0]);
        store.write(batch).await.unwrap();
    }

    #[test]
    fn test_list_queues() {
        block_on(async {
            let store = Memory::default();
            let keys = Keys::new(b'!').unwrap();
            assert_eq!(next(&store, &keys, None).await.unwrap(), None);
            assert!(list(&store, &keys).await.unwrap().is_empty());

            for seq in 0..300 {
                put(&store, &keys, "jobs", seq).await;
            }
            put(&store, &keys, "emails", 4).await;
            put(&store, &keys, "jobsx", 0).await;
            put(&store, &keys, "job", 1).await;

            // Checkpoints and counters live in other bands and are never reported
            let mut batch = Batch::new();
            batch.put(keys.checkpoint("hidden"), checkpoint::encode(1));
            batch.put(keys.counter("hidden"), checkpoint::encode(2));
            store.write(batch).await.unwrap();

            assert_eq!(
                list(&store, &keys).await.unwrap(),
                vec!["emails", "job", "jobs", "jobsx"]
            );
            assert_eq!(
                next(&store, &keys, Some("jobs")).await.unwrap(),
                Some("jobsx".to_string())
            );
            assert_eq!(
                next(&store, &keys, Some("a")).await.unwrap(),
                Some("emails".to_string())
            );
            assert_eq!(next(&store, &keys, Some("jobsx")).await.unwrap(), None);
        });
    }

    #[test]
    fn test_skips_malformed_keys() {
        block_on(async {
            let store = Memory::default();
            let keys = Keys::new(b'!').unwrap();
            let mut batch = Batch::new();
            batch.put(b"!broken".to_vec(), vec![0]);
            batch.put(b"!jobs!zz".to_vec(), vec![0]);
            store.write(batch).await.unwrap();
            put(&store, &keys, "later", 0).await;

            assert_eq!(
                next(&store, &keys, None).await.unwrap(),
                Some("later".to_string())
            );
            assert_eq!(list(&store, &keys).await.unwrap(), vec!["later"]);
        });
    }
}
