use trellis_types::{ActivationState, ContainerId, FieldLink, ObjectId, OpaqueHandle};

/// In-memory state of one persisted object inside one container.
///
/// Fields are private: readers use the accessors, and only the
/// [`ActivationEngine`](crate::ActivationEngine) changes state and value, so
/// `state == Active` iff `value.is_some()` holds everywhere.
#[derive(Debug)]
pub struct ObjectReference {
    id: ObjectId,
    state: ActivationState,
    value: Option<OpaqueHandle>,
    links: Vec<FieldLink>,
    owner: ContainerId,
    dirty: bool,
}

impl ObjectReference {
    pub(crate) fn new(id: ObjectId, owner: ContainerId) -> Self {
        Self {
            id,
            state: ActivationState::Virgin,
            value: None,
            links: Vec::new(),
            owner,
            dirty: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// The live value while `Active`.
    pub fn value(&self) -> Option<&OpaqueHandle> {
        self.value.as_ref()
    }

    /// Outgoing links of the live value. Empty unless `Active`.
    pub fn links(&self) -> &[FieldLink] {
        &self.links
    }

    /// The container that created this reference.
    pub fn owner(&self) -> ContainerId {
        self.owner
    }

    /// Returns `true` if the reference carries write intent not yet
    /// committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn begin_activation(&mut self) -> ActivationState {
        let previous = self.state;
        self.state = ActivationState::Activating;
        previous
    }

    pub(crate) fn abort_activation(&mut self, previous: ActivationState) {
        self.state = previous;
    }

    pub(crate) fn set_active(&mut self, value: OpaqueHandle, links: Vec<FieldLink>) {
        self.value = Some(value);
        self.links = links;
        self.state = ActivationState::Active;
    }

    pub(crate) fn set_deactivated(&mut self) {
        self.value = None;
        self.links.clear();
        self.state = ActivationState::Deactivated;
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}
