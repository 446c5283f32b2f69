use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use trellis_store::SlotStore;
use trellis_types::{ActivationPurpose, ActivationState, FieldLink, ObjectId, OpaqueHandle};

use crate::codec::{Decoded, ObjectCodec};
use crate::error::{RefError, RefResult};
use crate::table::ReferenceTable;

/// Drives [`ObjectReference`](crate::ObjectReference) state transitions.
///
/// Activation decodes a slot into a live value on demand and offers the
/// value's outgoing references to activation in turn, up to a depth bound.
/// The per-id lock is held for the whole read-and-decode of that id, so a
/// second caller waits and then observes the first caller's value; it is
/// released before any child is activated.
pub struct ActivationEngine {
    table: Arc<ReferenceTable>,
    store: Arc<dyn SlotStore>,
    codec: Arc<dyn ObjectCodec>,
    decodes: AtomicU64,
}

impl ActivationEngine {
    pub fn new(
        table: Arc<ReferenceTable>,
        store: Arc<dyn SlotStore>,
        codec: Arc<dyn ObjectCodec>,
    ) -> Self {
        Self {
            table,
            store,
            codec,
            decodes: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &Arc<ReferenceTable> {
        &self.table
    }

    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn ObjectCodec> {
        &self.codec
    }

    /// Number of slot decodes performed so far.
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    /// Activate `id` and return its live value.
    ///
    /// An already active reference is returned as is (a `Write` purpose
    /// marks it dirty). Otherwise the slot is read and decoded, and each
    /// outgoing reference is activated for `Read` with `depth - 1` unless it
    /// is already active. Depth 0 activates this object only. Dangling child
    /// links are skipped.
    pub fn activate(
        &self,
        id: ObjectId,
        purpose: ActivationPurpose,
        depth: u32,
    ) -> RefResult<OpaqueHandle> {
        let (value, children) = self.activate_one(id, purpose)?;

        let mut pending: Vec<(ObjectId, u32)> = Vec::new();
        if depth > 0 {
            pending.extend(children.iter().rev().map(|link| (link.target, depth - 1)));
        }
        while let Some((child, remaining)) = pending.pop() {
            let grandchildren = match self.activate_one(child, ActivationPurpose::Read) {
                Ok((_, links)) => links,
                Err(RefError::NotFound(_)) => {
                    debug!(parent = %id, child = %child, "skipping dangling reference");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if remaining > 0 {
                pending.extend(
                    grandchildren
                        .iter()
                        .rev()
                        .map(|link| (link.target, remaining - 1)),
                );
            }
        }

        Ok(value)
    }

    /// Activate one reference. Returns its value plus the links to fan out
    /// through, which are empty when the reference was already active.
    fn activate_one(
        &self,
        id: ObjectId,
        purpose: ActivationPurpose,
    ) -> RefResult<(OpaqueHandle, Vec<FieldLink>)> {
        let shared = self.table.get_or_create(id);
        let mut reference = shared.lock();

        if let Some(value) = reference.value().cloned() {
            if purpose.is_write() {
                reference.set_dirty(true);
            }
            return Ok((value, Vec::new()));
        }

        let previous = reference.begin_activation();
        match self.read_and_decode(id, purpose) {
            Ok(Decoded { value, children }) => {
                reference.set_active(value.clone(), children.clone());
                if purpose.is_write() {
                    reference.set_dirty(true);
                }
                debug!(id = %id, links = children.len(), ?purpose, "object activated");
                Ok((value, children))
            }
            Err(e) => {
                reference.abort_activation(previous);
                drop(reference);
                if previous == ActivationState::Virgin && matches!(e, RefError::NotFound(_)) {
                    self.table.remove(id);
                }
                Err(e)
            }
        }
    }

    fn read_and_decode(&self, id: ObjectId, purpose: ActivationPurpose) -> RefResult<Decoded> {
        let bytes = self.store.read(id)?.ok_or(RefError::NotFound(id))?;
        self.decodes.fetch_add(1, Ordering::Relaxed);
        self.codec
            .decode(&bytes, purpose)
            .map_err(|e| RefError::StorageCorruption {
                id,
                reason: e.to_string(),
            })
    }

    /// Drop the live value of `id` and, up to `depth` hops, of the objects
    /// it references.
    ///
    /// A dirty root is rejected; dirty descendants are left active.
    pub fn deactivate(&self, id: ObjectId, depth: u32) -> RefResult<()> {
        let mut pending = vec![(id, depth)];
        let mut root = true;
        while let Some((current, remaining)) = pending.pop() {
            let Some(shared) = self.table.get(current) else {
                root = false;
                continue;
            };
            let links = {
                let mut reference = shared.lock();
                if reference.is_dirty() {
                    if root {
                        return Err(RefError::Dirty(current));
                    }
                    continue;
                }
                if !reference.state().is_active() {
                    root = false;
                    continue;
                }
                let links = reference.links().to_vec();
                reference.set_deactivated();
                links
            };
            root = false;
            debug!(id = %current, "object deactivated");
            if remaining > 0 {
                pending.extend(links.iter().map(|link| (link.target, remaining - 1)));
            }
        }
        Ok(())
    }

    /// Re-read `id` from the store, replacing its cached value.
    ///
    /// Rejected for dirty references, whose cached value is the only copy of
    /// the pending write intent.
    pub fn refresh(&self, id: ObjectId) -> RefResult<OpaqueHandle> {
        let shared = self.table.get_or_create(id);
        let mut reference = shared.lock();
        if reference.is_dirty() {
            return Err(RefError::Dirty(id));
        }
        let previous = reference.begin_activation();
        match self.read_and_decode(id, ActivationPurpose::Read) {
            Ok(Decoded { value, children }) => {
                reference.set_active(value.clone(), children);
                debug!(id = %id, "object refreshed");
                Ok(value)
            }
            Err(e) => {
                reference.abort_activation(previous);
                drop(reference);
                if previous == ActivationState::Virgin && matches!(e, RefError::NotFound(_)) {
                    self.table.remove(id);
                }
                Err(e)
            }
        }
    }

    /// The cached value of `id`, without I/O.
    pub fn peek(&self, id: ObjectId) -> Option<OpaqueHandle> {
        self.table
            .get(id)
            .and_then(|shared| shared.lock().value().cloned())
    }

    /// Returns `true` if `id` has an active reference.
    pub fn is_active(&self, id: ObjectId) -> bool {
        self.table
            .state(id)
            .map(|state| state.is_active())
            .unwrap_or(false)
    }

    /// Make `value` the clean, active value of `id`. Called once the value
    /// is durable.
    pub fn install(&self, id: ObjectId, value: OpaqueHandle) -> RefResult<()> {
        let links = self.codec.links(&value)?;
        let shared = self.table.get_or_create(id);
        let mut reference = shared.lock();
        reference.set_active(value, links);
        reference.set_dirty(false);
        Ok(())
    }

    /// Drop any cached value and write intent for `id`, so the next
    /// activation re-reads durable state.
    pub fn invalidate(&self, id: ObjectId) {
        if let Some(shared) = self.table.get(id) {
            let mut reference = shared.lock();
            if reference.state().is_active() {
                reference.set_deactivated();
            }
            reference.set_dirty(false);
        }
    }

    /// Remove the reference for `id` from the table.
    pub fn evict(&self, id: ObjectId) -> bool {
        self.table.remove(id)
    }
}

impl std::fmt::Debug for ActivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationEngine")
            .field("table", &self.table)
            .field("decodes", &self.decode_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use trellis_store::InMemorySlotStore;
    use trellis_types::ContainerId;

    use super::*;
    use crate::codec::CodecError;
    use crate::record::{Record, RecordCodec, Value};

    /// Five records in a ring: 1 -> 2 -> 3 -> 4 -> 5 -> 1.
    fn ring_store() -> Arc<InMemorySlotStore> {
        let store = Arc::new(InMemorySlotStore::new());
        let codec = RecordCodec::new();
        for raw in 1..=5u64 {
            let next = if raw == 5 { 1 } else { raw + 1 };
            let record = Record::new("Node")
                .with("n", raw as i64)
                .with("next", Value::Ref(ObjectId::new(next)));
            let bytes = codec.encode(&record.into()).unwrap();
            store.write(ObjectId::new(raw), &bytes).unwrap();
        }
        store
    }

    fn engine_over(store: Arc<InMemorySlotStore>) -> ActivationEngine {
        ActivationEngine::new(
            Arc::new(ReferenceTable::new(ContainerId::next())),
            store,
            Arc::new(RecordCodec::new()),
        )
    }

    fn n_of(value: &OpaqueHandle) -> Option<i64> {
        match value.downcast_ref::<Record>()?.get("n")? {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Codec that sleeps while decoding, to widen race windows.
    struct SlowCodec(RecordCodec);

    impl ObjectCodec for SlowCodec {
        fn decode(&self, bytes: &[u8], purpose: ActivationPurpose) -> Result<Decoded, CodecError> {
            thread::sleep(Duration::from_millis(20));
            self.0.decode(bytes, purpose)
        }
        fn encode(&self, value: &OpaqueHandle) -> Result<Vec<u8>, CodecError> {
            self.0.encode(value)
        }
        fn scan_references(&self, bytes: &[u8]) -> Result<Vec<FieldLink>, CodecError> {
            self.0.scan_references(bytes)
        }
        fn links(&self, value: &OpaqueHandle) -> Result<Vec<FieldLink>, CodecError> {
            self.0.links(value)
        }
        fn field_value(&self, value: &OpaqueHandle, field: &str) -> Option<String> {
            self.0.field_value(value, field)
        }
    }

    // -----------------------------------------------------------------------
    // Depth-bounded activation
    // -----------------------------------------------------------------------

    #[test]
    fn depth_zero_activates_only_the_root() {
        let engine = engine_over(ring_store());
        let value = engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 0)
            .unwrap();
        assert_eq!(n_of(&value), Some(1));
        assert!(engine.is_active(ObjectId::new(1)));
        assert!(!engine.is_active(ObjectId::new(2)));
        assert_eq!(engine.decode_count(), 1);
    }

    #[test]
    fn depth_bounds_eager_fan_out() {
        let engine = engine_over(ring_store());
        engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 2)
            .unwrap();
        assert!(engine.is_active(ObjectId::new(1)));
        assert!(engine.is_active(ObjectId::new(2)));
        assert!(engine.is_active(ObjectId::new(3)));
        assert!(!engine.is_active(ObjectId::new(4)));
        assert_eq!(engine.decode_count(), 3);
    }

    #[test]
    fn cyclic_graph_terminates() {
        let engine = engine_over(ring_store());
        engine
            .activate(ObjectId::new(3), ActivationPurpose::Read, 100)
            .unwrap();
        for raw in 1..=5 {
            assert!(engine.is_active(ObjectId::new(raw)));
        }
        assert_eq!(engine.decode_count(), 5);
    }

    #[test]
    fn active_reference_is_not_reread() {
        let engine = engine_over(ring_store());
        let first = engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 0)
            .unwrap();
        let second = engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 3)
            .unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(engine.decode_count(), 1);
    }

    #[test]
    fn write_purpose_marks_dirty_even_when_active() {
        let engine = engine_over(ring_store());
        let id = ObjectId::new(1);
        engine.activate(id, ActivationPurpose::Read, 0).unwrap();
        assert!(engine.table().dirty_ids().is_empty());
        engine.activate(id, ActivationPurpose::Write, 0).unwrap();
        assert_eq!(engine.table().dirty_ids(), vec![id]);
        assert_eq!(engine.decode_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[test]
    fn missing_slot_is_not_found_and_leaves_no_reference() {
        let engine = engine_over(ring_store());
        let err = engine
            .activate(ObjectId::new(99), ActivationPurpose::Read, 0)
            .unwrap_err();
        assert!(matches!(err, RefError::NotFound(_)));
        assert!(!engine.table().contains(ObjectId::new(99)));
    }

    #[test]
    fn corrupt_slot_leaves_reference_virgin() {
        let store = ring_store();
        store.write(ObjectId::new(2), &[0xFF, 0x00, 0x13]).unwrap();
        let engine = engine_over(store);
        let err = engine
            .activate(ObjectId::new(2), ActivationPurpose::Read, 0)
            .unwrap_err();
        assert!(matches!(err, RefError::StorageCorruption { .. }));
        assert_eq!(
            engine.table().state(ObjectId::new(2)),
            Some(ActivationState::Virgin)
        );
    }

    #[test]
    fn corrupt_child_fails_the_activation() {
        let store = ring_store();
        store.write(ObjectId::new(2), &[0xFF]).unwrap();
        let engine = engine_over(store);
        let err = engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 1)
            .unwrap_err();
        assert!(matches!(err, RefError::StorageCorruption { id, .. } if id == ObjectId::new(2)));
    }

    #[test]
    fn dangling_child_is_skipped() {
        let store = ring_store();
        store.free(ObjectId::new(2)).unwrap();
        let engine = engine_over(store);
        engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 3)
            .unwrap();
        assert!(engine.is_active(ObjectId::new(1)));
        assert!(!engine.table().contains(ObjectId::new(2)));
    }

    // -----------------------------------------------------------------------
    // Deactivate / refresh / install
    // -----------------------------------------------------------------------

    #[test]
    fn deactivate_cascades_by_depth() {
        let engine = engine_over(ring_store());
        engine
            .activate(ObjectId::new(1), ActivationPurpose::Read, 4)
            .unwrap();
        engine.deactivate(ObjectId::new(1), 1).unwrap();
        assert!(!engine.is_active(ObjectId::new(1)));
        assert!(!engine.is_active(ObjectId::new(2)));
        assert!(engine.is_active(ObjectId::new(3)));
        assert_eq!(
            engine.table().state(ObjectId::new(1)),
            Some(ActivationState::Deactivated)
        );
    }

    #[test]
    fn deactivate_rejects_dirty_root() {
        let engine = engine_over(ring_store());
        let id = ObjectId::new(1);
        engine.activate(id, ActivationPurpose::Write, 0).unwrap();
        assert!(matches!(
            engine.deactivate(id, 0).unwrap_err(),
            RefError::Dirty(_)
        ));
        assert!(engine.is_active(id));
    }

    #[test]
    fn reactivation_after_deactivate_rereads() {
        let engine = engine_over(ring_store());
        let id = ObjectId::new(4);
        engine.activate(id, ActivationPurpose::Read, 0).unwrap();
        engine.deactivate(id, 0).unwrap();
        engine.activate(id, ActivationPurpose::Read, 0).unwrap();
        assert_eq!(engine.decode_count(), 2);
        assert!(engine.peek(id).is_some());
    }

    #[test]
    fn refresh_picks_up_store_changes() {
        let store = ring_store();
        let engine = engine_over(Arc::clone(&store));
        let id = ObjectId::new(1);
        engine.activate(id, ActivationPurpose::Read, 0).unwrap();

        let changed = Record::new("Node").with("n", 100i64);
        store
            .write(id, &RecordCodec::new().encode(&changed.into()).unwrap())
            .unwrap();
        assert_eq!(n_of(&engine.peek(id).unwrap()), Some(1));
        let refreshed = engine.refresh(id).unwrap();
        assert_eq!(n_of(&refreshed), Some(100));
    }

    #[test]
    fn install_and_invalidate() {
        let engine = engine_over(ring_store());
        let id = ObjectId::new(9);
        let value: OpaqueHandle = Record::new("Node").with("n", 9i64).into();
        engine.install(id, value.clone()).unwrap();
        assert!(engine.peek(id).unwrap().ptr_eq(&value));
        assert!(engine.table().dirty_ids().is_empty());

        engine.invalidate(id);
        assert!(engine.peek(id).is_none());
        assert_eq!(
            engine.table().state(id),
            Some(ActivationState::Deactivated)
        );
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_activation_decodes_once() {
        let engine = Arc::new(ActivationEngine::new(
            Arc::new(ReferenceTable::new(ContainerId::next())),
            ring_store(),
            Arc::new(SlowCodec(RecordCodec::new())),
        ));
        let id = ObjectId::new(3);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.activate(id, ActivationPurpose::Read, 0).unwrap())
            })
            .collect();
        let values: Vec<OpaqueHandle> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert_eq!(engine.decode_count(), 1);
        for v in &values {
            assert!(v.ptr_eq(&values[0]));
        }
    }

    // -----------------------------------------------------------------------
    // Invariant: Active iff a value is owned
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        Activate { id: u64, write: bool, depth: u32 },
        Deactivate { id: u64, depth: u32 },
        Refresh { id: u64 },
        Invalidate { id: u64 },
        Install { id: u64 },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..=6, any::<bool>(), 0u32..4)
                .prop_map(|(id, write, depth)| Op::Activate { id, write, depth }),
            (1u64..=6, 0u32..3).prop_map(|(id, depth)| Op::Deactivate { id, depth }),
            (1u64..=6).prop_map(|id| Op::Refresh { id }),
            (1u64..=6).prop_map(|id| Op::Invalidate { id }),
            (1u64..=6).prop_map(|id| Op::Install { id }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn active_iff_value_present(ops in prop::collection::vec(arb_op(), 1..40)) {
            let engine = engine_over(ring_store());
            for op in ops {
                // Errors (dirty, missing) are part of the sequence; only the
                // invariant matters.
                match op {
                    Op::Activate { id, write, depth } => {
                        let purpose = if write {
                            ActivationPurpose::Write
                        } else {
                            ActivationPurpose::Read
                        };
                        let _ = engine.activate(ObjectId::new(id), purpose, depth);
                    }
                    Op::Deactivate { id, depth } => {
                        let _ = engine.deactivate(ObjectId::new(id), depth);
                    }
                    Op::Refresh { id } => {
                        let _ = engine.refresh(ObjectId::new(id));
                    }
                    Op::Invalidate { id } => engine.invalidate(ObjectId::new(id)),
                    Op::Install { id } => {
                        let value: OpaqueHandle = Record::new("Node").with("n", id as i64).into();
                        engine.install(ObjectId::new(id), value).unwrap();
                    }
                }
                for id in engine.table().ids() {
                    let shared = engine.table().get(id).unwrap();
                    let reference = shared.lock();
                    prop_assert_eq!(reference.state().is_active(), reference.value().is_some());
                    prop_assert_ne!(reference.state(), ActivationState::Activating);
                }
            }
        }
    }
}
