//! Device-to-slot assignments.
//!
//! An assignment links one physical device to one virtual slot through a
//! mapping config. A device may feed several slots, and a slot may be fed
//! by several devices; each link is its own assignment.
//!
//! The assignment list is the pipeline's hottest shared input, so it is
//! double-buffered: writers install a whole new list, and the pipeline
//! picks up the latest one at the start of a cycle with a single short
//! lock and an `Arc` clone. No per-cycle allocation, no lock held across
//! stages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::DeviceId;
use crate::mapping::MappingConfig;

/// Number of virtual controller slots.
pub const SLOT_COUNT: usize = 4;

/// One (device, slot, mapping) link.
#[derive(Clone, Debug)]
pub struct SlotAssignment {
    /// Source device instance id.
    pub device: DeviceId,
    /// Target virtual slot, `0..SLOT_COUNT`.
    pub slot: usize,
    /// Translation profile (shared when identical).
    pub mapping: Arc<MappingConfig>,
    /// Disabled assignments are skipped by every stage.
    pub enabled: bool,
    /// Tie-break order inside a slot; lower wins.
    pub sort_order: u32,
}

impl SlotAssignment {
    pub fn new(device: DeviceId, slot: usize, mapping: Arc<MappingConfig>) -> SlotAssignment {
        SlotAssignment {
            device,
            slot,
            mapping,
            enabled: true,
            sort_order: 0,
        }
    }
}

/// Double-buffered assignment list shared between UI writers and the
/// pipeline.
#[derive(Debug, Default)]
pub struct AssignmentSet {
    current: Mutex<Arc<Vec<SlotAssignment>>>,
    generation: AtomicU64,
}

impl AssignmentSet {
    pub fn new() -> AssignmentSet {
        AssignmentSet::default()
    }

    /// Install a replacement list. Entries are ordered by
    /// `(slot, sort_order)` on the way in so per-slot iteration order --
    /// and with it the combiner's tie-break -- is deterministic no matter
    /// how the caller assembled the list.
    pub fn install(&self, mut assignments: Vec<SlotAssignment>) {
        assignments.retain(|a| a.slot < SLOT_COUNT);
        assignments.sort_by(|a, b| {
            (a.slot, a.sort_order, &a.device).cmp(&(b.slot, b.sort_order, &b.device))
        });
        *self.current.lock().expect("assignment lock") = Arc::new(assignments);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Current list plus its generation counter. The pipeline compares the
    /// generation to decide whether staging buffers need rebuilding.
    pub fn snapshot(&self) -> (Arc<Vec<SlotAssignment>>, u64) {
        let list = self.current.lock().expect("assignment lock").clone();
        (list, self.generation.load(Ordering::Acquire))
    }

    /// Find the shared mapping config with the given checksum, if any
    /// installed assignment references it.
    pub fn find_mapping(&self, checksum: &str) -> Option<Arc<MappingConfig>> {
        let (list, _) = self.snapshot();
        list.iter()
            .find(|a| a.mapping.checksum() == checksum)
            .map(|a| a.mapping.clone())
    }
}
