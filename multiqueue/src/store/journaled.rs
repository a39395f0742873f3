//! A [Store] that persists every batch to an append-only log and periodically compacts it.
//!
//! # Format
//!
//! The log lives in one of two blobs (`left` and `right`). Each starts with a header naming its
//! generation, followed by one record per committed [Batch]:
//!
//! ```text
//! Header = Generation (u64) | CRC32(Generation) (u32)
//!
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |   Len(Body) (u32) |  CRC32(Body) (u32)|             Body              |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//!
//! Body = Op1 | Op2 | ...
//! Op   = 0x00 | Len(Key) (u32) | Key | Len(Value) (u32) | Value   (put)
//!      | 0x01 | Len(Key) (u32) | Key                              (delete)
//! ```
//!
//! # Atomicity
//!
//! A record is synced before [Store::write] returns. On [Journaled::init], the blob with the
//! highest valid generation is replayed in order into an in-memory ordered map. The first record
//! that is incomplete or fails its checksum (for example, after an unclean shutdown during an
//! append) is treated as never written: the blob is truncated to the end of the last valid record.
//! Recovered state is therefore always the result of applying some prefix of the committed
//! batches, each batch in full.
//!
//! # Compaction
//!
//! Once the active log is at least [Config::compaction_size] bytes and at least twice the size of
//! a snapshot of the live keys, the live keys are written as put records to the other blob. Its
//! header (with the next generation) is written and synced last, so a compaction interrupted at
//! any point leaves the previous log in charge. The log never grows much past the larger of
//! [Config::compaction_size] and twice the live data.

use super::{memory::collect, Batch, Error, Op, Range, Store};
use async_lock::RwLock;
use bytes::{Buf, BufMut};
use commonware_runtime::{Blob, Metrics, Storage};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, warn};

/// Names of the blobs that alternate holding the log.
const BLOB_NAMES: [&[u8]; 2] = [b"left", b"right"];

/// Size of the generation and checksum at the start of every blob.
const BLOB_HEADER_SIZE: usize = 12;

/// Size of the length and checksum that precede every record body.
const HEADER_SIZE: usize = 8;

/// Approximate body size of each record written during compaction.
const SNAPSHOT_RECORD_SIZE: usize = 1 << 20;

const PUT: u8 = 0;
const DELETE: u8 = 1;

/// Configuration for [Journaled] storage.
#[derive(Clone)]
pub struct Config {
    /// The [commonware_runtime::Storage] partition to use for the log.
    pub partition: String,

    /// Minimum size of the active log (in bytes) before it is considered for compaction.
    pub compaction_size: u64,
}

impl Config {
    /// Use `partition` with a compaction size of 1 MiB.
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            compaction_size: 1 << 20,
        }
    }
}

/// Encoded size of a put of `key` and `value`.
fn footprint(key: usize, value: usize) -> u64 {
    (1 + 4 + key + 4 + value) as u64
}

/// The live keys and the size of a snapshot of them.
#[derive(Default)]
struct Table {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    live: u64,
}

impl Table {
    fn apply(&mut self, batch: Batch) {
        for op in batch {
            match op {
                Op::Put(key, value) => {
                    let key_len = key.len();
                    self.live += footprint(key_len, value.len());
                    if let Some(old) = self.map.insert(key, value) {
                        self.live -= footprint(key_len, old.len());
                    }
                }
                Op::Delete(key) => {
                    if let Some(old) = self.map.remove(&key) {
                        self.live -= footprint(key.len(), old.len());
                    }
                }
            }
        }
    }
}

struct Inner<B: Blob> {
    blobs: [B; 2],
    cursor: usize,
    generation: u64,
    size: u64,
    table: Table,
}

impl<B: Blob> Inner<B> {
    fn should_compact(&self, compaction_size: u64) -> bool {
        self.size >= compaction_size && self.size >= self.table.live.saturating_mul(2)
    }

    /// Write a snapshot of the live keys to the inactive blob and make it active.
    async fn compact(&mut self) -> Result<(), Error> {
        let target = 1 - self.cursor;
        let generation = self.generation + 1;
        let blob = &self.blobs[target];
        blob.resize(0).await?;
        blob.sync().await?;

        // The header stays invalid until the snapshot is durable
        blob.write_at(vec![0u8; BLOB_HEADER_SIZE], 0).await?;
        let mut offset = BLOB_HEADER_SIZE as u64;
        let mut batch = Batch::new();
        let mut pending = 0;
        for (key, value) in &self.table.map {
            batch.put(key.clone(), value.clone());
            pending += key.len() + value.len();
            if pending >= SNAPSHOT_RECORD_SIZE {
                let record = encode(&std::mem::take(&mut batch))?;
                let len = record.len() as u64;
                blob.write_at(record, offset).await?;
                offset += len;
                pending = 0;
            }
        }
        if !batch.is_empty() {
            let record = encode(&batch)?;
            let len = record.len() as u64;
            blob.write_at(record, offset).await?;
            offset += len;
        }
        blob.sync().await?;
        if let Err(err) = commit(blob, generation).await {
            // The header may still reach disk, so the snapshot must not be left to win on restart
            blob.resize(0).await?;
            blob.sync().await?;
            return Err(err);
        }

        let previous = std::mem::replace(&mut self.cursor, target);
        let reclaimed = self.size.saturating_sub(offset);
        self.generation = generation;
        self.size = offset;
        debug!(generation, size = offset, reclaimed, "compacted log");

        self.blobs[previous].resize(0).await?;
        self.blobs[previous].sync().await?;
        Ok(())
    }
}

/// A durable [Store] backed by a pair of [commonware_runtime::Blob]s.
#[derive(Clone)]
pub struct Journaled<B: Blob> {
    inner: Arc<RwLock<Inner<B>>>,
    compaction_size: u64,

    syncs: Counter,
    compactions: Counter,
    keys: Gauge,
    size: Gauge,
}

fn header(generation: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOB_HEADER_SIZE);
    buf.put_u64(generation);
    buf.put_u32(crc32fast::hash(&generation.to_be_bytes()));
    buf
}

/// Write and sync the header that makes `blob` the active log.
async fn commit<B: Blob>(blob: &B, generation: u64) -> Result<(), Error> {
    blob.write_at(header(generation), 0).await?;
    blob.sync().await?;
    Ok(())
}

/// Read the generation of `blob`, if its header is intact.
async fn generation<B: Blob>(blob: &B, len: u64) -> Result<Option<u64>, Error> {
    if len < BLOB_HEADER_SIZE as u64 {
        return Ok(None);
    }
    let raw = blob.read_at(vec![0u8; BLOB_HEADER_SIZE], 0).await?;
    let mut buf: &[u8] = raw.as_ref();
    let generation = buf.get_u64();
    let checksum = buf.get_u32();
    if crc32fast::hash(&generation.to_be_bytes()) != checksum {
        return Ok(None);
    }
    Ok(Some(generation))
}

impl<B: Blob> Journaled<B> {
    /// Open (or create) the log in `cfg.partition` and replay it.
    pub async fn init<E: Storage<Blob = B> + Metrics>(
        context: E,
        cfg: Config,
    ) -> Result<Self, Error> {
        let (left, left_len) = context.open(&cfg.partition, BLOB_NAMES[0]).await?;
        let (right, right_len) = context.open(&cfg.partition, BLOB_NAMES[1]).await?;
        let generations = [
            generation(&left, left_len).await?,
            generation(&right, right_len).await?,
        ];
        let blobs = [left, right];

        // Pick the most recent intact log (starting a fresh one if there is none)
        let (cursor, generation, len) = match generations {
            [None, None] => {
                blobs[0].resize(0).await?;
                blobs[0].write_at(header(0), 0).await?;
                blobs[0].sync().await?;
                (0, 0, BLOB_HEADER_SIZE as u64)
            }
            [Some(left), Some(right)] if right > left => (1, right, right_len),
            [Some(left), _] => (0, left, left_len),
            [None, Some(right)] => (1, right, right_len),
        };

        let mut table = Table::default();
        let mut size = BLOB_HEADER_SIZE;
        let mut records = 0usize;
        if len > BLOB_HEADER_SIZE as u64 {
            let buf = blobs[cursor].read_at(vec![0u8; len as usize], 0).await?;
            let data: &[u8] = buf.as_ref();
            while let Some((consumed, batch)) = next(&data[size..]) {
                table.apply(batch);
                size += consumed;
                records += 1;
            }
            if size < data.len() {
                warn!(
                    partition = cfg.partition.as_str(),
                    old_size = data.len(),
                    new_size = size,
                    "corruption detected: truncating log"
                );
                blobs[cursor].resize(size as u64).await?;
                blobs[cursor].sync().await?;
            }
        }
        debug!(
            partition = cfg.partition.as_str(),
            generation,
            records,
            keys = table.map.len(),
            "replayed log"
        );

        let syncs = Counter::default();
        let compactions = Counter::default();
        let keys = Gauge::default();
        let size_gauge = Gauge::default();
        context.register("syncs", "Number of log syncs", syncs.clone());
        context.register(
            "compactions",
            "Number of log compactions",
            compactions.clone(),
        );
        context.register("keys", "Number of keys tracked", keys.clone());
        context.register("size", "Size of the active log in bytes", size_gauge.clone());
        keys.set(table.map.len() as i64);
        size_gauge.set(size as i64);

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                blobs,
                cursor,
                generation,
                size: size as u64,
                table,
            })),
            compaction_size: cfg.compaction_size,
            syncs,
            compactions,
            keys,
            size: size_gauge,
        })
    }
}

/// Parse the record at the start of `buf`, returning its total size and batch.
fn next(buf: &[u8]) -> Option<(usize, Batch)> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let mut header = &buf[..HEADER_SIZE];
    let len = header.get_u32() as usize;
    let stored_checksum = header.get_u32();
    let body = buf.get(HEADER_SIZE..HEADER_SIZE.checked_add(len)?)?;
    let checksum = crc32fast::hash(body);
    if checksum != stored_checksum {
        debug!(
            stored = stored_checksum,
            computed = checksum,
            "checksum mismatch"
        );
        return None;
    }
    let batch = decode(body)?;
    Some((HEADER_SIZE + len, batch))
}

fn decode(mut body: &[u8]) -> Option<Batch> {
    let mut batch = Batch::new();
    while body.has_remaining() {
        match body.get_u8() {
            PUT => {
                let key = take(&mut body)?;
                let value = take(&mut body)?;
                batch.put(key, value);
            }
            DELETE => {
                batch.delete(take(&mut body)?);
            }
            _ => return None,
        }
    }
    Some(batch)
}

fn encode(batch: &Batch) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    for op in batch.ops() {
        match op {
            Op::Put(key, value) => {
                body.put_u8(PUT);
                put(&mut body, key)?;
                put(&mut body, value)?;
            }
            Op::Delete(key) => {
                body.put_u8(DELETE);
                put(&mut body, key)?;
            }
        }
    }
    let len = u32::try_from(body.len()).map_err(|_| Error::RecordTooLarge(body.len()))?;
    let mut record = Vec::with_capacity(HEADER_SIZE + body.len());
    record.put_u32(len);
    record.put_u32(crc32fast::hash(&body));
    record.extend_from_slice(&body);
    Ok(record)
}

fn put(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::RecordTooLarge(bytes.len()))?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

fn take(buf: &mut &[u8]) -> Option<Vec<u8>> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return None;
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Some(bytes)
}

impl<B: Blob> Store for Journaled<B> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.inner.read().await.table.map.get(key).cloned())
    }

    async fn scan(
        &self,
        range: Range,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(collect(&self.inner.read().await.table.map, range, limit))
    }

    async fn write(&self, batch: Batch) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let record = encode(&batch)?;
        let len = record.len() as u64;

        let mut inner = self.inner.write().await;
        let offset = inner.size;
        let blob = &inner.blobs[inner.cursor];
        blob.write_at(record, offset).await?;
        blob.sync().await?;
        inner.size += len;
        inner.table.apply(batch);
        self.syncs.inc();

        // The batch is already durable, so a failed compaction is retried on a later write
        if inner.should_compact(self.compaction_size) {
            match inner.compact().await {
                Ok(()) => {
                    self.compactions.inc();
                }
                Err(err) => warn!(?err, "compaction failed"),
            }
        }
        self.keys.set(inner.table.map.len() as i64);
        self.size.set(inner.size as i64);
        Ok(())
    }
}
