use super::{is_empty, Batch, Error, Op, Range, Store};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// An in-memory [Store].
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct Memory {
    map: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Memory {
    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply `batch` to `map` in order.
fn apply(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: Batch) {
    for op in batch {
        match op {
            Op::Put(key, value) => {
                map.insert(key, value);
            }
            Op::Delete(key) => {
                map.remove(&key);
            }
        }
    }
}

/// Collect up to `limit` entries of `range` from `map`.
pub(super) fn collect(
    map: &BTreeMap<Vec<u8>, Vec<u8>>,
    range: Range,
    limit: Option<usize>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    if is_empty(&range) {
        return Vec::new();
    }
    map.range(range)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl Store for Memory {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    async fn scan(
        &self,
        range: Range,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(collect(&self.map.lock().unwrap(), range, limit))
    }

    async fn write(&self, batch: Batch) -> Result<(), Error> {
        apply(&mut self.map.lock().unwrap(), batch);
        Ok(())
    }
}
