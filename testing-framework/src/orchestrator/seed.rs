// File: testing-framework/src/orchestrator/seed.rs
//
// Seed Sequence
//
// Key material in a run is derived from small integer seeds. The sequence
// hands out disjoint seed ranges so no two participants (or two phases of
// the same participant) ever derive the same key.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic allocator of seed ranges
///
/// Shared by reference; reservation is a single atomic add, so concurrent
/// callers still receive disjoint ranges.
#[derive(Debug)]
pub struct SeedSequence {
    next: AtomicU64,
}

impl SeedSequence {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Reserve `count` consecutive seeds and return the first one
    pub fn reserve(&self, count: u64) -> u64 {
        self.next.fetch_add(count, Ordering::SeqCst)
    }

    /// First seed the next reservation will receive
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Seed number as key-derivation input: minimal big-endian bytes
pub fn seed_bytes(seed: u64) -> Vec<u8> {
    let bytes = seed.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_seed_bytes() {
        assert_eq!(seed_bytes(0), vec![0x00]);
        assert_eq!(seed_bytes(2), vec![0x02]);
        assert_eq!(seed_bytes(0x012c), vec![0x01, 0x2c]);
    }

    #[test]
    fn test_concurrent_reservations_are_disjoint() {
        let sequence = Arc::new(SeedSequence::new(2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sequence = sequence.clone();
                std::thread::spawn(move || (0..50).map(|_| sequence.reserve(6)).collect::<Vec<_>>())
            })
            .collect();

        let mut starts: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        starts.sort_unstable();
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], 6);
        }
        assert_eq!(sequence.peek(), 2 + 8 * 50 * 6);
    }

    proptest! {
        #[test]
        fn prop_ranges_never_overlap(start in 0u64..1_000, counts in proptest::collection::vec(1u64..10, 1..40)) {
            let sequence = SeedSequence::new(start);
            let mut ranges = Vec::new();
            for count in counts {
                let first = sequence.reserve(count);
                ranges.push(first..first + count);
            }
            for (i, a) in ranges.iter().enumerate() {
                for b in &ranges[i + 1..] {
                    prop_assert!(a.end <= b.start || b.end <= a.start);
                }
            }
        }

        #[test]
        fn prop_seed_bytes_are_minimal(seed in 1u64..u64::MAX) {
            let bytes = seed_bytes(seed);
            prop_assert_ne!(bytes[0], 0);
            let mut padded = [0u8; 8];
            padded[8 - bytes.len()..].copy_from_slice(&bytes);
            prop_assert_eq!(u64::from_be_bytes(padded), seed);
        }
    }
}
