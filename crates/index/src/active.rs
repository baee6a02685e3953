//! Handle to the snapshot currently being served.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::vector_index::Snapshot;

#[derive(Debug, Default)]
struct Slot {
    snapshot: Option<Arc<Snapshot>>,
    generation: u64,
}

/// The served snapshot plus a generation counter bumped on every swap.
///
/// Readers clone the `Arc` once per query and work on that snapshot until
/// they are done, so a concurrent swap never mixes two snapshots in one
/// result. The lock is only held long enough to clone or replace the `Arc`.
#[derive(Debug, Default)]
pub struct ActiveIndex {
    slot: RwLock<Slot>,
}

impl ActiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The served snapshot, if any.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.slot.read().snapshot.clone()
    }

    /// The served snapshot together with its generation, read atomically.
    pub fn current_with_generation(&self) -> (Option<Arc<Snapshot>>, u64) {
        let slot = self.slot.read();
        (slot.snapshot.clone(), slot.generation)
    }

    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().snapshot.is_none()
    }

    /// Replace the served snapshot and return the new generation.
    pub fn swap(&self, snapshot: Arc<Snapshot>) -> u64 {
        let mut slot = self.slot.write();
        slot.snapshot = Some(snapshot);
        slot.generation += 1;
        slot.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::tests::chunk;

    #[test]
    fn test_swap_bumps_generation() {
        let active = ActiveIndex::new();
        assert!(active.is_empty());
        assert_eq!(active.generation(), 0);

        let first = Arc::new(Snapshot::build(vec![chunk(0, vec![1.0])], "a").unwrap());
        assert_eq!(active.swap(first.clone()), 1);

        let held = active.current().unwrap();
        let second = Arc::new(Snapshot::build(vec![chunk(5, vec![1.0])], "b").unwrap());
        assert_eq!(active.swap(second), 2);

        // A reader that grabbed the old snapshot keeps it intact
        assert_eq!(held.model(), "a");
        let (current, generation) = active.current_with_generation();
        assert_eq!(current.unwrap().model(), "b");
        assert_eq!(generation, 2);
    }
}
