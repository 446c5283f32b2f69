use std::collections::BTreeMap;

use parking_lot::RwLock;
use trellis_types::ObjectId;

use crate::alloc::IdAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BatchOp, Slot, SlotStore, WriteBatch};

/// In-memory, map-based slot store.
///
/// Intended for tests and embedding. All state lives behind one `RwLock`, so
/// a batch applied under the write lock is atomic with respect to readers.
/// Slot offsets are positions in a virtual append-only arena.
pub struct InMemorySlotStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    slots: BTreeMap<ObjectId, (Slot, Vec<u8>)>,
    header: Option<Vec<u8>>,
    alloc: IdAllocator,
    arena_len: u64,
}

impl MemoryState {
    fn place(&mut self, bytes: &[u8]) -> Slot {
        let slot = Slot::new(self.arena_len, bytes.len() as u32);
        self.arena_len += bytes.len() as u64;
        slot
    }
}

impl InMemorySlotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.state.read().slots.len()
    }

    /// Returns `true` if no slot is stored.
    pub fn is_empty(&self) -> bool {
        self.state.read().slots.is_empty()
    }

    /// Total bytes across all live slots.
    pub fn total_bytes(&self) -> u64 {
        self.state
            .read()
            .slots
            .values()
            .map(|(slot, _)| u64::from(slot.length))
            .sum()
    }
}

impl Default for InMemorySlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore for InMemorySlotStore {
    fn read(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.state.read().slots.get(&id).map(|(_, b)| b.clone()))
    }

    fn alloc(&self) -> StoreResult<ObjectId> {
        Ok(self.state.write().alloc.alloc())
    }

    fn slot(&self, id: ObjectId) -> StoreResult<Option<Slot>> {
        Ok(self.state.read().slots.get(&id).map(|(slot, _)| *slot))
    }

    fn read_header(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.state.read().header.clone())
    }

    fn apply(&self, batch: &WriteBatch) -> StoreResult<()> {
        // Validate before touching state so a bad batch changes nothing.
        for op in batch.ops() {
            match op {
                BatchOp::Write { id, .. } | BatchOp::Free { id } if id.is_null() => {
                    return Err(StoreError::NullObjectId);
                }
                _ => {}
            }
        }

        let mut state = self.state.write();
        for op in batch.ops() {
            match op {
                BatchOp::Write { id, bytes } => {
                    let slot = state.place(bytes);
                    state.slots.insert(*id, (slot, bytes.clone()));
                    state.alloc.mark_live(*id);
                }
                BatchOp::Free { id } => {
                    // An id with no slot may be reserved by another writer.
                    if state.slots.remove(id).is_some() {
                        state.alloc.release(*id);
                    }
                }
                BatchOp::Header { bytes } => {
                    state.header = Some(bytes.clone());
                }
            }
        }
        Ok(())
    }

    fn ids(&self) -> StoreResult<Vec<ObjectId>> {
        Ok(self.state.read().slots.keys().copied().collect())
    }

    fn release(&self, id: ObjectId) -> StoreResult<()> {
        let mut state = self.state.write();
        if !state.slots.contains_key(&id) {
            state.alloc.release(id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemorySlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySlotStore")
            .field("slot_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Core read / write / free
    // -----------------------------------------------------------------------

    #[test]
    fn write_and_read_slot() {
        let store = InMemorySlotStore::new();
        let id = store.alloc().unwrap();
        store.write(id, b"hello").unwrap();
        assert_eq!(store.read(id).unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(store.exists(id).unwrap());
    }

    #[test]
    fn read_missing_returns_none() {
        let store = InMemorySlotStore::new();
        assert!(store.read(ObjectId::new(9)).unwrap().is_none());
        assert!(store.slot(ObjectId::new(9)).unwrap().is_none());
    }

    #[test]
    fn free_reports_presence_and_reuses_id() {
        let store = InMemorySlotStore::new();
        let a = store.alloc().unwrap();
        let b = store.alloc().unwrap();
        store.write(a, b"a").unwrap();
        store.write(b, b"b").unwrap();

        assert!(store.free(a).unwrap());
        assert!(!store.free(a).unwrap());
        assert_eq!(store.alloc().unwrap(), a);
    }

    #[test]
    fn free_of_unwritten_id_keeps_reservation() {
        let store = InMemorySlotStore::new();
        let a = store.alloc().unwrap();
        store.write(a, b"a").unwrap();
        assert!(store.free(a).unwrap());

        let reused = store.alloc().unwrap();
        assert_eq!(reused, a);
        let mut batch = WriteBatch::new();
        batch.free(a);
        store.apply(&batch).unwrap();
        assert_ne!(store.alloc().unwrap(), reused);
    }

    #[test]
    fn null_id_is_rejected() {
        let store = InMemorySlotStore::new();
        let err = store.write(ObjectId::null(), b"x").unwrap_err();
        assert!(matches!(err, StoreError::NullObjectId));
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    #[test]
    fn batch_applies_in_order() {
        let store = InMemorySlotStore::new();
        let id = store.alloc().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .write(id, b"first".to_vec())
            .write(id, b"second".to_vec())
            .header(b"meta".to_vec());
        store.apply(&batch).unwrap();

        assert_eq!(store.read(id).unwrap().unwrap(), b"second");
        assert_eq!(store.read_header().unwrap().unwrap(), b"meta");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn batch_with_null_id_changes_nothing() {
        let store = InMemorySlotStore::new();
        let id = store.alloc().unwrap();
        let mut batch = WriteBatch::new();
        batch.write(id, b"ok".to_vec()).free(ObjectId::null());
        assert!(store.apply(&batch).is_err());
        assert!(store.read(id).unwrap().is_none());
    }

    #[test]
    fn release_returns_unwritten_id() {
        let store = InMemorySlotStore::new();
        let a = store.alloc().unwrap();
        let _b = store.alloc().unwrap();
        store.release(a).unwrap();
        assert_eq!(store.alloc().unwrap(), a);
    }

    #[test]
    fn slots_move_on_rewrite() {
        let store = InMemorySlotStore::new();
        let id = store.alloc().unwrap();
        store.write(id, b"aaaa").unwrap();
        let first = store.slot(id).unwrap().unwrap();
        store.write(id, b"bb").unwrap();
        let second = store.slot(id).unwrap().unwrap();
        assert_ne!(first.offset, second.offset);
        assert_eq!(second.length, 2);
    }

    #[test]
    fn ids_are_sorted() {
        let store = InMemorySlotStore::new();
        for _ in 0..4 {
            let id = store.alloc().unwrap();
            store.write(id, b"x").unwrap();
        }
        let ids = store.ids().unwrap();
        assert_eq!(ids.len(), 4);
        for w in ids.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert_eq!(store.total_bytes(), 4);
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemorySlotStore::new());
        let id = store.alloc().unwrap();
        store.write(id, b"shared").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    assert_eq!(store.read(id).unwrap().unwrap(), b"shared");
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
    }

    #[test]
    fn debug_format() {
        let store = InMemorySlotStore::new();
        let debug = format!("{store:?}");
        assert!(debug.contains("slot_count"));
    }
}
