//! Track the highest contiguous sequence known to be durably stored.

use commonware_storage::rmap::RMap;

/// Reconciles sequences completed in any order into a monotonic watermark.
///
/// # Invariants
///
/// - `tip` never decreases.
/// - Every sequence in `have` is greater than `tip + 1` (or than `first` when there is no tip).
/// - A sequence leaves `have` exactly when the tip advances over it.
pub struct Tracker {
    first: u64,
    tip: Option<u64>,

    /// Sequences stored ahead of a gap, kept as ranges.
    have: RMap,
}

impl Tracker {
    /// Create a tracker for a queue whose first sequence is `first`, seeded with a recovered tip.
    pub fn new(first: u64, tip: Option<u64>) -> Self {
        Self {
            first,
            tip,
            have: RMap::new(),
        }
    }

    /// Highest sequence such that all sequences from `first` through it are stored.
    pub fn tip(&self) -> Option<u64> {
        self.tip
    }

    /// Inclusive ranges of sequences stored ahead of a gap, in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.have.iter().map(|(&start, &end)| (start, end))
    }

    /// Number of sequences stored ahead of a gap.
    pub fn pending(&self) -> u64 {
        self.ranges().map(|(start, end)| end - start + 1).sum()
    }

    fn next(&self) -> Option<u64> {
        match self.tip {
            Some(tip) => tip.checked_add(1),
            None => Some(self.first),
        }
    }

    /// Move the tip to `tip` and absorb the buffered range that continues it.
    fn extend(&mut self, mut tip: u64) {
        if let Some(following) = tip.checked_add(1) {
            if let Some((_, end)) = self.have.get(&following) {
                self.have.remove(following, end);
                tip = end;
            }
        }
        self.tip = Some(tip);
    }

    /// Record that `seq` is durably stored, returning true if the tip advanced.
    ///
    /// Sequences at or below the tip are ignored.
    pub fn observe(&mut self, seq: u64) -> bool {
        let Some(next) = self.next() else {
            return false;
        };
        if seq < next {
            return false;
        }
        if seq > next {
            self.have.insert(seq);
            return false;
        }
        self.extend(seq);
        true
    }

    /// Record that every sequence through `seq` has been consumed, returning true if the tip
    /// advanced.
    ///
    /// Consumed sequences can never be stored again, so they count as part of the contiguous run.
    pub fn advance_floor(&mut self, seq: u64) -> bool {
        if self.tip.is_some_and(|tip| tip >= seq) {
            return false;
        }
        self.have.remove(0, seq);
        self.extend(seq);
        true
    }
}
