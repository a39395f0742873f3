//! Map `(queue, sequence)` pairs to keys whose byte order matches sequence order.
//!
//! # Bands
//!
//! All queues share a single key space, split into bands by their first byte:
//!
//! ```text
//! 0x00 | queue                                 checkpoint of the queue's cursor
//! 0x01 | queue                                 next sequence (autoincrement only)
//! sep  | queue | sep | hex(lexint(sequence))   item
//! ```
//!
//! The separator must be an ASCII byte above `0x01` that is not a hex digit, so every
//! checkpoint and counter key sorts before every item key and no item suffix can ever
//! contain the separator.
//!
//! # Sequence Encoding
//!
//! Sequences are packed with a length-prefixed lexicographic integer encoding: values below
//! `248` are a single byte, larger values are a marker byte `247 + L` followed by
//! `sequence - 248` in the minimal `L` big-endian bytes. Comparing two packed sequences
//! byte-by-byte yields the same result as comparing the integers (for the full `u64` range),
//! which zero-padded decimal would only do up to its padding width.

use crate::{store::Range, Error};
use commonware_utils::{from_hex, hex};
use std::ops::Bound;

/// First byte of every checkpoint key.
pub const CHECKPOINT_BAND: u8 = 0x00;

/// First byte of every autoincrement counter key.
pub const COUNTER_BAND: u8 = 0x01;

/// Appended to a prefix to bound all keys that extend it.
const MAX_BYTE: u8 = 0xff;

/// Sequences below this value are packed into a single byte.
const INLINE_LIMIT: u64 = 248;

/// Marker bytes are `MARKER_BASE + len` for `len` in `1..=8`.
const MARKER_BASE: u8 = 247;

/// Pack `seq` into its order-preserving byte representation.
pub fn pack(seq: u64) -> Vec<u8> {
    if seq < INLINE_LIMIT {
        return vec![seq as u8];
    }
    let offset = seq - INLINE_LIMIT;
    let len = (8 - offset.leading_zeros() as usize / 8).max(1);
    let mut packed = Vec::with_capacity(len + 1);
    packed.push(MARKER_BASE + len as u8);
    packed.extend_from_slice(&offset.to_be_bytes()[8 - len..]);
    packed
}

/// Unpack a sequence produced by [pack].
///
/// Returns `None` for truncated, oversized or non-canonical input.
pub fn unpack(packed: &[u8]) -> Option<u64> {
    let (&marker, rest) = packed.split_first()?;
    if (marker as u64) < INLINE_LIMIT {
        return rest.is_empty().then_some(marker as u64);
    }
    let len = (marker - MARKER_BASE) as usize;
    if rest.len() != len || (len > 1 && rest[0] == 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - len..].copy_from_slice(rest);
    u64::from_be_bytes(buf).checked_add(INLINE_LIMIT)
}

/// Builds and parses keys for a fixed separator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Keys {
    separator: u8,
}

impl Keys {
    /// Create a key codec, rejecting separators that would break the band layout.
    pub fn new(separator: u8) -> Result<Self, Error> {
        if !separator.is_ascii() || separator <= COUNTER_BAND || separator.is_ascii_hexdigit() {
            return Err(Error::InvalidSeparator(separator));
        }
        Ok(Self { separator })
    }

    /// The byte that delimits queue names inside item keys.
    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Prefix shared by every item key of `queue`.
    pub fn prefix(&self, queue: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(queue.len() + 2);
        prefix.push(self.separator);
        prefix.extend_from_slice(queue.as_bytes());
        prefix.push(self.separator);
        prefix
    }

    /// Key of the item at `seq` in `queue`.
    ///
    /// Assumes `queue` has already been validated (it must not contain the separator).
    pub fn encode(&self, queue: &str, seq: u64) -> Vec<u8> {
        let mut key = self.prefix(queue);
        key.extend_from_slice(hex(&pack(seq)).as_bytes());
        key
    }

    /// Split an item key back into its queue and sequence.
    pub fn decode(&self, key: &[u8]) -> Result<(String, u64), Error> {
        let malformed = || Error::MalformedKey(hex(key));
        let rest = key.strip_prefix(&[self.separator][..]).ok_or_else(malformed)?;
        let split = rest
            .iter()
            .position(|b| *b == self.separator)
            .ok_or_else(malformed)?;
        let (queue, suffix) = (&rest[..split], &rest[split + 1..]);
        if queue.is_empty() || suffix.contains(&self.separator) {
            return Err(malformed());
        }
        let queue = std::str::from_utf8(queue).map_err(|_| malformed())?;
        let seq = std::str::from_utf8(suffix)
            .ok()
            .and_then(from_hex)
            .and_then(|packed| unpack(&packed))
            .ok_or_else(malformed)?;
        Ok((queue.to_string(), seq))
    }

    /// Items of `queue` with sequences strictly between `gt` and `lt` (when provided).
    pub fn queue(&self, queue: &str, gt: Option<u64>, lt: Option<u64>) -> Range {
        let start = match gt {
            Some(seq) => self.encode(queue, seq),
            None => self.prefix(queue),
        };
        let end = match lt {
            Some(seq) => self.encode(queue, seq),
            None => self.upper(queue),
        };
        (Bound::Excluded(start), Bound::Excluded(end))
    }

    /// The entire item band.
    pub fn items(&self) -> Range {
        (
            Bound::Excluded(vec![self.separator]),
            Bound::Excluded(vec![self.separator + 1]),
        )
    }

    /// Item keys of every queue that sorts after `queue`.
    pub fn after(&self, queue: &str) -> Range {
        (
            Bound::Excluded(self.upper(queue)),
            Bound::Excluded(vec![self.separator + 1]),
        )
    }

    /// Key holding the checkpoint of `queue`.
    pub fn checkpoint(&self, queue: &str) -> Vec<u8> {
        Self::banded(CHECKPOINT_BAND, queue)
    }

    /// Key holding the next autoincrement sequence of `queue`.
    pub fn counter(&self, queue: &str) -> Vec<u8> {
        Self::banded(COUNTER_BAND, queue)
    }

    fn upper(&self, queue: &str) -> Vec<u8> {
        let mut upper = self.prefix(queue);
        upper.push(MAX_BYTE);
        upper
    }

    fn banded(band: u8, queue: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(queue.len() + 1);
        key.push(band);
        key.extend_from_slice(queue.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::ops::RangeBounds;
    use test_case::test_case;

    fn keys() -> Keys {
        Keys::new(b'!').unwrap()
    }

    #[test_case(0 ; "zero")]
    #[test_case(247 ; "largest inline")]
    #[test_case(248 ; "smallest marked")]
    #[test_case(503 ; "largest one byte offset")]
    #[test_case(504 ; "smallest two byte offset")]
    #[test_case(65_783 ; "largest two byte offset")]
    #[test_case((1 << 31) - 1 ; "largest i32")]
    #[test_case(u64::MAX ; "largest u64")]
    fn test_pack_roundtrip(seq: u64) {
        assert_eq!(unpack(&pack(seq)), Some(seq));
        let key = keys().encode("jobs", seq);
        assert_eq!(keys().decode(&key).unwrap(), ("jobs".to_string(), seq));
    }

    #[test]
    fn test_pack_lengths() {
        assert_eq!(pack(0), vec![0]);
        assert_eq!(pack(247), vec![247]);
        assert_eq!(pack(248), vec![248, 0]);
        assert_eq!(pack(504), vec![249, 1, 0]);
        assert_eq!(pack(u64::MAX).len(), 9);
    }

    #[test]
    fn test_unpack_rejects_invalid() {
        assert_eq!(unpack(&[]), None);
        assert_eq!(unpack(&[5, 0]), None);
        assert_eq!(unpack(&[249, 0]), None);
        assert_eq!(unpack(&[249, 0, 7]), None);
        assert_eq!(unpack(&[255, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]), None);
    }

    #[test]
    fn test_key_order_matches_sequence_order() {
        let keys = keys();
        let boundaries = [0u64, 1, 246, 247, 248, 249, 503, 504, 505, 65_783, 65_784, 1 << 31];
        for window in boundaries.windows(2) {
            assert!(keys.encode("q", window[0]) < keys.encode("q", window[1]));
        }

        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..10_000 {
            let a = rng.gen_range(0..1u64 << 31);
            let b = rng.gen_range(0..1u64 << 31);
            let (ka, kb) = (keys.encode("q", a), keys.encode("q", b));
            assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }

    #[test]
    fn test_decode_malformed() {
        let keys = keys();
        let bad: [&[u8]; 7] = [
            b"",
            b"\x00jobs",
            b"!jobs",
            b"!!00",
            b"!jobs!",
            b"!jobs!zz",
            b"!jobs!00!00",
        ];
        for key in bad {
            assert!(matches!(keys.decode(key), Err(Error::MalformedKey(_))));
        }
    }

    #[test]
    fn test_queue_ranges_do_not_overlap() {
        let keys = keys();
        let range = keys.queue("jobs", None, None);
        assert!(range.contains(&keys.encode("jobs", 0)));
        assert!(range.contains(&keys.encode("jobs", u64::MAX)));
        assert!(!range.contains(&keys.encode("jobsx", 0)));
        assert!(!range.contains(&keys.encode("job", u64::MAX)));
        assert!(!range.contains(&keys.checkpoint("jobs")));

        let after = keys.after("jobs");
        assert!(after.contains(&keys.encode("jobsx", 0)));
        assert!(!after.contains(&keys.encode("jobs", u64::MAX)));

        let items = keys.items();
        assert!(items.contains(&keys.encode("a", 0)));
        assert!(!items.contains(&keys.checkpoint("a")));
        assert!(!items.contains(&keys.counter("a")));
    }

    #[test]
    fn test_bounded_queue_range() {
        let keys = keys();
        let range = keys.queue("jobs", Some(2), Some(5));
        assert!(!range.contains(&keys.encode("jobs", 2)));
        assert!(range.contains(&keys.encode("jobs", 3)));
        assert!(range.contains(&keys.encode("jobs", 4)));
        assert!(!range.contains(&keys.encode("jobs", 5)));
    }

    #[test]
    fn test_invalid_separator() {
        for separator in [0x00, 0x01, b'0', b'a', b'F', 0x80, 0xff] {
            assert!(matches!(
                Keys::new(separator),
                Err(Error::InvalidSeparator(s)) if s == separator
            ));
        }
        for separator in [0x02, b'/', b'~', 0x7f] {
            assert!(Keys::new(separator).is_ok());
        }
    }
}
