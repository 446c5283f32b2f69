use std::collections::BTreeMap;

use trellis_types::{ObjectId, OpaqueHandle, TransactionId};

use crate::set::CommitSet;

/// The last recorded mutation of one id.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// A new object, not yet durable.
    Add(OpaqueHandle),
    /// A new value for an existing object.
    Update(OpaqueHandle),
    /// The object's slot is freed on commit.
    Delete,
}

impl Mutation {
    /// The staged value, for adds and updates.
    pub fn value(&self) -> Option<&OpaqueHandle> {
        match self {
            Self::Add(value) | Self::Update(value) => Some(value),
            Self::Delete => None,
        }
    }
}

/// What a rollback leaves for the caller to undo.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rollback {
    /// Ids allocated for objects that never became durable.
    pub released: Vec<ObjectId>,
    /// Durable ids whose cached state may be stale.
    pub touched: Vec<ObjectId>,
}

/// Mutation log of one transaction.
///
/// The log is keyed by id and coalesces last-state-wins:
///
/// | earlier | later  | result                   |
/// |---------|--------|--------------------------|
/// | add     | update | add (new value)          |
/// | add     | delete | dropped, id released     |
/// | update  | delete | delete                   |
/// | delete  | update | update                   |
///
/// A transaction is owned by one thread; it is `Send` but needs no locking.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    log: BTreeMap<ObjectId, Mutation>,
    dropped: Vec<ObjectId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            log: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Record a new object under a freshly allocated id.
    pub fn add(&mut self, id: ObjectId, value: OpaqueHandle) {
        let mutation = match self.log.get(&id) {
            Some(Mutation::Update(_)) | Some(Mutation::Delete) => Mutation::Update(value),
            Some(Mutation::Add(_)) | None => Mutation::Add(value),
        };
        self.log.insert(id, mutation);
    }

    /// Record a new value for `id`.
    pub fn update(&mut self, id: ObjectId, value: OpaqueHandle) {
        let mutation = match self.log.get(&id) {
            Some(Mutation::Add(_)) => Mutation::Add(value),
            _ => Mutation::Update(value),
        };
        self.log.insert(id, mutation);
    }

    /// Record deletes. Deleting an object added in this transaction drops
    /// it from the log instead.
    pub fn delete(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        for id in ids {
            match self.log.get(&id) {
                Some(Mutation::Add(_)) => {
                    self.log.remove(&id);
                    self.dropped.push(id);
                }
                _ => {
                    self.log.insert(id, Mutation::Delete);
                }
            }
        }
    }

    /// Forget the mutation of `id`. A removed add releases its id.
    pub fn remove_mutation(&mut self, id: ObjectId) -> Option<Mutation> {
        let removed = self.log.remove(&id);
        if matches!(removed, Some(Mutation::Add(_))) {
            self.dropped.push(id);
        }
        removed
    }

    pub fn get(&self, id: ObjectId) -> Option<&Mutation> {
        self.log.get(&id)
    }

    /// The staged value of `id`, if added or updated here.
    pub fn pending_value(&self, id: ObjectId) -> Option<&OpaqueHandle> {
        self.log.get(&id).and_then(Mutation::value)
    }

    pub fn is_deleted(&self, id: ObjectId) -> bool {
        matches!(self.log.get(&id), Some(Mutation::Delete))
    }

    /// Mutations in id order.
    pub fn mutations(&self) -> impl Iterator<Item = (ObjectId, &Mutation)> {
        self.log.iter().map(|(id, m)| (*id, m))
    }

    /// Ids allocated for adds that were later dropped.
    pub fn dropped(&self) -> &[ObjectId] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Returns `true` if nothing would be committed.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Phase 1: coalesce the log into disjoint id sets. `write_intent` ids
    /// (write-activated references) join `updated` unless the log already
    /// mentions them.
    pub fn snapshot(&self, write_intent: &[ObjectId]) -> CommitSet {
        let mut set = CommitSet::new(self.id);
        for (id, mutation) in &self.log {
            match mutation {
                Mutation::Add(_) => set.added.insert(*id),
                Mutation::Update(_) => set.updated.insert(*id),
                Mutation::Delete => set.deleted.insert(*id),
            };
        }
        for id in write_intent {
            if !self.log.contains_key(id) {
                set.updated.insert(*id);
            }
        }
        set
    }

    /// Discard every mutation. Returns what the caller must undo.
    pub fn rollback(&mut self) -> Rollback {
        let mut rollback = Rollback::default();
        for (id, mutation) in std::mem::take(&mut self.log) {
            match mutation {
                Mutation::Add(_) => rollback.released.push(id),
                Mutation::Update(_) | Mutation::Delete => rollback.touched.push(id),
            }
        }
        rollback.released.append(&mut self.dropped);
        rollback.released.sort();
        self.id = TransactionId::new();
        rollback
    }

    /// Clear the log after a durable commit. Returns ids to release.
    pub(crate) fn finish(&mut self) -> Vec<ObjectId> {
        self.log.clear();
        self.id = TransactionId::new();
        std::mem::take(&mut self.dropped)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
