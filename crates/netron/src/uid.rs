//! Monotonic identifier sources for definition-id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use netron_common::DefinitionId;

/// A source of identifiers where each value is strictly greater than the one
/// before it, starting from 1, in the source's own ordering domain.
pub trait IdSequence: Send + Sync {
    fn get(&self) -> DefinitionId;
}

/// Fast generator that wraps silently at the 32-bit unsigned boundary back
/// to 1. Callers must never assume uniqueness across a wrap; a peer minting
/// more than 2^32 definitions is an accepted non-goal of this variant.
#[derive(Default)]
pub struct FastUniqueId {
    counter: AtomicU64,
}

impl FastUniqueId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSequence for FastUniqueId {
    fn get(&self) -> DefinitionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        (n & 0xFFFF_FFFF) + 1
    }
}

/// Generator that never wraps within the lifetime of a peer process.
#[derive(Default)]
pub struct LongUniqueId {
    counter: AtomicU64,
}

impl LongUniqueId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSequence for LongUniqueId {
    fn get(&self) -> DefinitionId {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_ids_start_at_one_and_increase() {
        let uid = LongUniqueId::new();
        let values: Vec<_> = (0..1000).map(|_| uid.get()).collect();
        assert_eq!(values[0], 1);
        assert!(values.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_long_ids_pairwise_distinct() {
        use std::collections::HashSet;
        let uid = LongUniqueId::new();
        let values: HashSet<_> = (0..10_000).map(|_| uid.get()).collect();
        assert_eq!(values.len(), 10_000);
    }

    #[test]
    fn test_fast_ids_match_wrapping_formula() {
        let uid = FastUniqueId::new();
        for n in 1u64..=4096 {
            assert_eq!(uid.get(), ((n - 1) % (1 << 32)) + 1);
        }
    }

    #[test]
    fn test_fast_ids_wrap_at_u32_boundary() {
        let uid = FastUniqueId::new();
        uid.counter.store(u64::from(u32::MAX), Ordering::Relaxed);
        assert_eq!(uid.get(), 1 << 32);
        assert_eq!(uid.get(), 1);
        assert_eq!(uid.get(), 2);
    }
}
