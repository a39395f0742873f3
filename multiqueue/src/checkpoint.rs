//! Persist the sequence last delivered to each queue's consumer.
//!
//! A checkpoint is absent until the first dequeue, after which the next sequence to deliver is
//! always `checkpoint + 1`. Sequence values (checkpoints and autoincrement counters) are stored as
//! fixed-size big-endian integers.

use crate::{keys::Keys, store::Store, Error};
use commonware_codec::{DecodeExt, Encode};

/// Serialize a sequence for storage.
pub(crate) fn encode(seq: u64) -> Vec<u8> {
    seq.encode().to_vec()
}

/// Deserialize a stored sequence.
pub(crate) fn decode(raw: &[u8]) -> Result<u64, Error> {
    u64::decode(raw).map_err(Error::CorruptSequence)
}

/// Read the checkpoint of `queue`.
pub(crate) async fn get<S: Store>(
    store: &S,
    keys: &Keys,
    queue: &str,
) -> Result<Option<u64>, Error> {
    store
        .get(&keys.checkpoint(queue))
        .await?
        .map(|raw| decode(&raw))
        .transpose()
}

/// The sequence a dequeue should deliver given the current checkpoint.
pub(crate) fn next(checkpoint: Option<u64>, first: u64) -> Result<u64, Error> {
    match checkpoint {
        Some(checkpoint) => checkpoint.checked_add(1).ok_or(Error::SequenceExhausted),
        None => Ok(first),
    }
}
