use std::collections::{BTreeSet, HashSet};

use trellis_types::ObjectId;

/// Object id allocator shared by the store backends.
///
/// Ids are handed out lowest-free-first, so ids released by `free` are
/// reused before the high-water mark grows. Reserved ids (allocated but not
/// yet written) are tracked so they are never handed out twice.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
    free: BTreeSet<ObjectId>,
    reserved: HashSet<ObjectId>,
}

impl IdAllocator {
    /// Allocator for an empty store; the first id is 1.
    pub fn new() -> Self {
        Self {
            next: 1,
            free: BTreeSet::new(),
            reserved: HashSet::new(),
        }
    }

    /// Rebuild allocation state from the set of live ids.
    ///
    /// Every id below the high-water mark that is not live becomes free.
    pub fn from_live<'a>(live: impl IntoIterator<Item = &'a ObjectId>, high_water: u64) -> Self {
        let live: HashSet<ObjectId> = live.into_iter().copied().collect();
        let max_live = live.iter().map(ObjectId::get).max().unwrap_or(0);
        let next = high_water.max(max_live) + 1;
        let free = (1..next)
            .map(ObjectId::new)
            .filter(|id| !live.contains(id))
            .collect();
        Self {
            next,
            free,
            reserved: HashSet::new(),
        }
    }

    /// Reserve the lowest available id.
    pub fn alloc(&mut self) -> ObjectId {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = ObjectId::new(self.next);
                self.next += 1;
                id
            }
        };
        self.reserved.insert(id);
        id
    }

    /// Record that `id` now holds a slot.
    pub fn mark_live(&mut self, id: ObjectId) {
        self.reserved.remove(&id);
        self.free.remove(&id);
        if id.get() >= self.next {
            for gap in self.next..id.get() {
                self.free.insert(ObjectId::new(gap));
            }
            self.next = id.get() + 1;
        }
    }

    /// Return `id` to the free pool.
    pub fn release(&mut self, id: ObjectId) {
        if id.is_null() || id.get() >= self.next {
            return;
        }
        self.reserved.remove(&id);
        self.free.insert(id);
    }

    /// Returns `true` if `id` is reserved but not yet written.
    pub fn is_reserved(&self, id: ObjectId) -> bool {
        self.reserved.contains(&id)
    }

    /// One past the highest id ever handed out.
    pub fn high_water(&self) -> u64 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
