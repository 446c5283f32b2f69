use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use trellis_types::{ActivationState, ContainerId, ObjectId};

use crate::reference::ObjectReference;

/// A reference behind its per-id lock.
pub type SharedReference = Arc<Mutex<ObjectReference>>;

/// Per-container map from object id to its [`ObjectReference`].
///
/// The table owns every reference of its container. Each entry sits behind
/// its own mutex, which is the per-id activation lock; the map itself is
/// only locked long enough to look an entry up or insert one.
pub struct ReferenceTable {
    owner: ContainerId,
    entries: RwLock<HashMap<ObjectId, SharedReference>>,
}

impl ReferenceTable {
    /// Create an empty table for the given container.
    pub fn new(owner: ContainerId) -> Self {
        Self {
            owner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The container this table belongs to.
    pub fn owner(&self) -> ContainerId {
        self.owner
    }

    /// Look up the reference for `id`.
    pub fn get(&self, id: ObjectId) -> Option<SharedReference> {
        self.entries.read().get(&id).cloned()
    }

    /// Look up the reference for `id`, creating a `Virgin` one if absent.
    pub fn get_or_create(&self, id: ObjectId) -> SharedReference {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        let owner = self.owner;
        self.entries
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(ObjectReference::new(id, owner))))
            .clone()
    }

    /// Remove the reference for `id`. Returns `true` if one was present.
    pub fn remove(&self, id: ObjectId) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    /// Returns `true` if a reference exists for `id`.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Current state of `id`, if a reference exists.
    pub fn state(&self, id: ObjectId) -> Option<ActivationState> {
        self.get(id).map(|r| r.lock().state())
    }

    /// All ids with a reference, ascending.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.entries.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ids whose references carry uncommitted write intent, ascending.
    pub fn dirty_ids(&self) -> Vec<ObjectId> {
        let entries: Vec<SharedReference> = self.entries.read().values().cloned().collect();
        let mut ids: Vec<ObjectId> = entries
            .iter()
            .filter_map(|r| {
                let r = r.lock();
                r.is_dirty().then_some(r.id())
            })
            .collect();
        ids.sort();
        ids
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the table holds no references.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every reference. Used when the container closes.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl std::fmt::Debug for ReferenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTable")
            .field("owner", &self.owner)
            .field("references", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_stable() {
        let table = ReferenceTable::new(ContainerId::next());
        let a = table.get_or_create(ObjectId::new(1));
        let b = table.get_or_create(ObjectId::new(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
        assert_eq!(table.state(ObjectId::new(1)), Some(ActivationState::Virgin));
    }

    #[test]
    fn references_record_owner() {
        let owner = ContainerId::next();
        let table = ReferenceTable::new(owner);
        let r = table.get_or_create(ObjectId::new(5));
        assert_eq!(r.lock().owner(), owner);
    }

    #[test]
    fn remove_and_contains() {
        let table = ReferenceTable::new(ContainerId::next());
        table.get_or_create(ObjectId::new(2));
        assert!(table.contains(ObjectId::new(2)));
        assert!(table.remove(ObjectId::new(2)));
        assert!(!table.remove(ObjectId::new(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn dirty_ids_are_sorted() {
        let table = ReferenceTable::new(ContainerId::next());
        for raw in [4, 1, 3] {
            table.get_or_create(ObjectId::new(raw)).lock().set_dirty(true);
        }
        table.get_or_create(ObjectId::new(2));
        assert_eq!(
            table.dirty_ids(),
            vec![ObjectId::new(1), ObjectId::new(3), ObjectId::new(4)]
        );
    }
}
