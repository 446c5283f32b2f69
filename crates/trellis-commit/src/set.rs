use std::collections::BTreeSet;

use trellis_types::{ObjectId, TransactionId};

/// The ids a transaction adds, updates, and deletes.
///
/// Built fresh for each commit attempt. An id appears in at most one of the
/// three sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitSet {
    pub transaction: TransactionId,
    pub added: BTreeSet<ObjectId>,
    pub updated: BTreeSet<ObjectId>,
    pub deleted: BTreeSet<ObjectId>,
}

impl CommitSet {
    pub fn new(transaction: TransactionId) -> Self {
        Self {
            transaction,
            added: BTreeSet::new(),
            updated: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Added and updated ids, ascending within each group.
    pub fn written(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.added.iter().chain(self.updated.iter()).copied()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.added.contains(&id) || self.updated.contains(&id) || self.deleted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disjoint(&self) -> bool {
        self.added.is_disjoint(&self.updated)
            && self.added.is_disjoint(&self.deleted)
            && self.updated.is_disjoint(&self.deleted)
    }
}
