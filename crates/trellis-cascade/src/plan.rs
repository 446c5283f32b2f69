use std::collections::HashSet;

use trellis_types::ObjectId;

/// The delete closure of one root.
///
/// `order` lists every id whose slot is freed, children before parents.
/// Ids reached through a link but holding no slot are recorded separately;
/// they are tolerated, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletePlan {
    root: ObjectId,
    requested_depth: u32,
    order: Vec<ObjectId>,
    members: HashSet<ObjectId>,
    missing: Vec<ObjectId>,
}

impl DeletePlan {
    pub(crate) fn new(root: ObjectId, requested_depth: u32) -> Self {
        Self {
            root,
            requested_depth,
            order: Vec::new(),
            members: HashSet::new(),
            missing: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, id: ObjectId) {
        if self.members.insert(id) {
            self.order.push(id);
        }
    }

    pub(crate) fn push_missing(&mut self, id: ObjectId) {
        if !self.missing.contains(&id) {
            self.missing.push(id);
        }
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn requested_depth(&self) -> u32 {
        self.requested_depth
    }

    /// Ids to free, children before parents.
    pub fn ids(&self) -> &[ObjectId] {
        &self.order
    }

    /// Ids reached but already without a slot.
    pub fn missing(&self) -> &[ObjectId] {
        &self.missing
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Merge another plan's ids into this one, keeping first-seen order.
    pub fn merge(&mut self, other: &DeletePlan) {
        for id in &other.order {
            self.push(*id);
        }
        for id in &other.missing {
            self.push_missing(*id);
        }
    }
}
