use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use trellis_refs::ObjectCodec;
use trellis_store::SlotStore;
use trellis_types::ObjectId;

use crate::error::{CascadeError, CascadeResult};
use crate::plan::DeletePlan;
use crate::policy::CascadePolicies;

/// Where a cascade walk reads slot bytes.
///
/// Every [`SlotStore`] is a reader. A transaction overlays its own staged
/// writes on top of the store, so objects added in the same transaction are
/// visible to the walk.
pub trait SlotReader {
    fn read_slot(&self, id: ObjectId) -> CascadeResult<Option<Vec<u8>>>;
}

impl<S: SlotStore + ?Sized> SlotReader for S {
    fn read_slot(&self, id: ObjectId) -> CascadeResult<Option<Vec<u8>>> {
        Ok(self.read(id)?)
    }
}

/// One node on the walk stack: its id and the children still to visit,
/// each with the levels left below it.
struct Frame {
    id: ObjectId,
    children: Vec<(ObjectId, u32)>,
    next: usize,
}

/// Plans cascading deletes.
///
/// The walk starts at a root with `requested_depth` levels below it and
/// asks [`CascadePolicies::child_budget`] for every outgoing link. A node
/// reached again with a larger budget is walked again; otherwise it is not,
/// which makes cycles terminate.
pub struct CascadeDeleteEngine {
    codec: Arc<dyn ObjectCodec>,
    policies: CascadePolicies,
}

impl CascadeDeleteEngine {
    pub fn new(codec: Arc<dyn ObjectCodec>, policies: CascadePolicies) -> Self {
        Self { codec, policies }
    }

    pub fn policies(&self) -> &CascadePolicies {
        &self.policies
    }

    /// Compute the delete closure of `root`.
    pub fn plan(
        &self,
        reader: &dyn SlotReader,
        root: ObjectId,
        requested_depth: u32,
    ) -> CascadeResult<DeletePlan> {
        let mut plan = DeletePlan::new(root, requested_depth);
        let mut best: HashMap<ObjectId, u32> = HashMap::new();
        let mut stack: Vec<Frame> = Vec::new();

        if let Some(frame) = self.enter(reader, root, requested_depth, &mut best, &mut plan)? {
            stack.push(frame);
        }

        while let Some(top) = stack.last_mut() {
            if top.next < top.children.len() {
                let (child, budget) = top.children[top.next];
                top.next += 1;
                if let Some(frame) = self.enter(reader, child, budget, &mut best, &mut plan)? {
                    stack.push(frame);
                }
            } else {
                let id = top.id;
                stack.pop();
                plan.push(id);
            }
        }

        debug!(
            root = %root,
            depth = requested_depth,
            count = plan.len(),
            missing = plan.missing().len(),
            "cascade delete planned"
        );
        Ok(plan)
    }

    /// Visit `id` with `budget` levels below it. Returns `None` when the
    /// node needs no (further) walking.
    fn enter(
        &self,
        reader: &dyn SlotReader,
        id: ObjectId,
        budget: u32,
        best: &mut HashMap<ObjectId, u32>,
        plan: &mut DeletePlan,
    ) -> CascadeResult<Option<Frame>> {
        if id.is_null() {
            return Ok(None);
        }
        if best.get(&id).is_some_and(|seen| *seen >= budget) {
            return Ok(None);
        }
        best.insert(id, budget);

        let Some(bytes) = reader.read_slot(id)? else {
            debug!(id = %id, "cascade reached an id with no slot");
            plan.push_missing(id);
            return Ok(None);
        };
        let links = self
            .codec
            .scan_references(&bytes)
            .map_err(|e| CascadeError::StorageCorruption {
                id,
                reason: e.to_string(),
            })?;

        let children = links
            .iter()
            .filter_map(|link| {
                self.policies
                    .child_budget(link, budget)
                    .map(|child_budget| (link.target, child_budget))
            })
            .collect();

        Ok(Some(Frame {
            id,
            children,
            next: 0,
        }))
    }
}

impl std::fmt::Debug for CascadeDeleteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeDeleteEngine")
            .field("policies", &self.policies)
            .finish()
    }
}
